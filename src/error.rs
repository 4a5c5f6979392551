//! Unified error types for livebus

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all server operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF0 encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// A publisher already owns the stream
    PublisherBusy { app: String, name: String },
    /// Operation timed out
    Timeout,
    /// Connection was closed by the peer
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::PublisherBusy { app, name } => {
                write!(f, "Stream {}/{} already has a publisher", app, name)
            }
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    MessageTooLarge { size: u32, max: u32 },
    InvalidCommand(String),
    MissingStreamName,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::MissingStreamName => {
                write!(f, "Stream name missing from publish command")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF0 encoding/decoding errors
#[derive(Debug, PartialEq, Eq)]
pub enum AmfError {
    /// Marker byte does not name a supported type
    UnexpectedType(u8),
    /// Structurally invalid data (bad object terminator, invalid UTF-8)
    InvalidData,
    /// Buffer ended in the middle of a value
    UnexpectedEnd,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedType(m) => write!(f, "Unexpected AMF0 type marker: 0x{:02x}", m),
            AmfError::InvalidData => write!(f, "Invalid AMF0 data"),
            AmfError::UnexpectedEnd => write!(f, "Unexpected end of AMF0 data"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    /// C0/S0 carried something other than version 3.
    /// Common when a browser probes the RTMP port with HTTP; closed quietly.
    InvalidVersion(u8),
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl Error {
    /// True for errors that indicate the peer simply went away (or was never
    /// speaking RTMP at all); these are closed without a warning log.
    pub fn is_quiet_close(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::Handshake(HandshakeError::InvalidVersion(_))
        )
    }
}
