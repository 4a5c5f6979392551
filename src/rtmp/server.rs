//! RTMP ingest listener
//!
//! Accepts publisher connections and spawns one task per socket. Each task
//! owns its socket exclusively; a failing session never affects another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::bus::Registry;
use crate::error::Result;

use super::connection::Connection;

/// RTMP ingest server.
pub struct RtmpServer {
    registry: Arc<Registry>,
    next_session_id: AtomicU64,
}

impl RtmpServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "RTMP server listening");
        }

        tokio::select! {
            _ = shutdown => {
                tracing::info!("RTMP accept loop stopped");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let _ = socket.set_nodelay(true);
                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.registry);

                    tracing::debug!(session_id, peer = %peer_addr, "new connection");

                    tokio::spawn(async move {
                        let mut connection =
                            Connection::new(session_id, socket, peer_addr, registry);
                        match connection.run().await {
                            Ok(()) => {
                                tracing::debug!(session_id, "connection closed");
                            }
                            Err(e) if e.is_quiet_close() => {
                                tracing::trace!(session_id, error = %e, "connection dropped");
                            }
                            Err(e) => {
                                tracing::debug!(session_id, error = %e, "connection error");
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}
