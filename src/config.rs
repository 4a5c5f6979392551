//! YAML configuration
//!
//! Strict decoding: unknown fields are rejected, absent fields take explicit
//! defaults, and validation reports the first violation with a descriptive
//! message.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Complete server configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
}

/// Listener ports.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Port for the health endpoint
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// Port for HTTP-FLV, WebSocket-FLV, and the API
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Port for RTMP ingest
    #[serde(default = "default_rtmp_port")]
    pub rtmp_port: u16,
}

fn default_health_port() -> u16 {
    8080
}

fn default_http_port() -> u16 {
    8081
}

fn default_rtmp_port() -> u16 {
    1935
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
            http_port: default_http_port(),
            rtmp_port: default_rtmp_port(),
        }
    }
}

impl Config {
    /// Read and decode a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {}", path.display(), e)))?;
        Self::parse(&data)
    }

    /// Decode configuration from a YAML string.
    pub fn parse(data: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(data).map_err(|e| Error::Config(format!("decode config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is in range and the ports do not collide.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, port) in [
            ("health_port", self.health_port),
            ("http_port", self.http_port),
            ("rtmp_port", self.rtmp_port),
        ] {
            if port == 0 {
                return Err(Error::Config(format!(
                    "{} must be between 1 and 65535, got 0",
                    name
                )));
            }
        }
        if self.health_port == self.http_port {
            return Err(Error::Config(format!(
                "health_port and http_port must be different, both are {}",
                self.health_port
            )));
        }
        if self.health_port == self.rtmp_port {
            return Err(Error::Config(format!(
                "health_port and rtmp_port must be different, both are {}",
                self.health_port
            )));
        }
        if self.http_port == self.rtmp_port {
            return Err(Error::Config(format!(
                "http_port and rtmp_port must be different, both are {}",
                self.http_port
            )));
        }
        Ok(())
    }
}
