//! Connection driver
//!
//! Owns the socket and read buffer for one client and pumps decoded frames
//! through the protocol state machine. TCP tuning for accepted sockets
//! lives here as well.

use bytes::BytesMut;
use portico_common::{PorticoError, Result};
use socket2::SockRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::handler::{handle_message, ConnectionCore, ConnectionState, Flow};
use super::protocol::backend::{write_error_response, write_ready_for_query};
use super::protocol::frontend::{decode_message, decode_startup};
use crate::config::GatewayConfig;
use crate::errors::{sqlstate, ClassifiedError};

/// Configure TCP keepalive and no-delay on an accepted socket
pub fn configure_socket(stream: &tokio::net::TcpStream, keepalive: Duration) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_keepalive(true) {
        warn!("Failed to enable TCP keepalive: {}", e);
        return;
    }

    let params = socket2::TcpKeepalive::new()
        .with_time(keepalive)
        .with_interval(keepalive / 2 + Duration::from_secs(1));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let params = params.with_retries(3);

    if let Err(e) = socket.set_tcp_keepalive(&params) {
        warn!("Failed to configure TCP keepalive timing: {}", e);
    }
}

/// One client connection: socket, buffered partial frames, and the state
/// machine core that owns session and backend client.
pub struct Connection<S> {
    core: ConnectionCore,
    socket: S,
    buffer: BytesMut,
    idle_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, socket: S, config: Arc<GatewayConfig>) -> Result<Self> {
        let idle_timeout = config.idle_timeout;
        let core = ConnectionCore::new(id, config)?;
        Ok(Self {
            core,
            socket,
            buffer: BytesMut::with_capacity(8 * 1024),
            idle_timeout,
        })
    }

    /// Drive the connection until the client leaves, the idle timeout
    /// fires, a fatal error surfaces, or shutdown is broadcast.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let result = self.pump(&mut shutdown).await;
        // Whatever the exit path, an open backend transaction is rolled
        // back best-effort before the socket drops.
        self.core.backend.cleanup().await;
        result
    }

    async fn pump(&mut self, shutdown: &mut broadcast::Receiver<()>) -> anyhow::Result<()> {
        loop {
            if !self.drain_frames().await? {
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(connection_id = self.core.id, "shutdown requested, closing connection");
                    return Ok(());
                }
                read = tokio::time::timeout(
                    self.idle_timeout,
                    self.socket.read_buf(&mut self.buffer),
                ) => match read {
                    Err(_) => {
                        debug!(connection_id = self.core.id, "idle timeout, closing connection");
                        return Ok(());
                    }
                    Ok(Ok(0)) => {
                        debug!(connection_id = self.core.id, "client disconnected");
                        return Ok(());
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    /// Process every complete frame currently buffered. Returns false once
    /// the connection is finished.
    async fn drain_frames(&mut self) -> anyhow::Result<bool> {
        loop {
            let decoded = match self.core.state {
                ConnectionState::Startup => decode_startup(&mut self.buffer),
                _ => decode_message(&mut self.buffer),
            };

            let msg = match decoded {
                Ok(Some(msg)) => msg,
                Ok(None) => return Ok(true),
                Err(e @ PorticoError::Framing(_)) => {
                    if self.core.state == ConnectionState::Ready {
                        // Report and resynchronize; the connection stays up
                        warn!(connection_id = self.core.id, error = %e, "framing error");
                        let mut out = BytesMut::new();
                        let classified =
                            ClassifiedError::new(sqlstate::PROTOCOL_VIOLATION, e.to_string());
                        write_error_response(&mut out, &classified);
                        write_ready_for_query(&mut out, self.core.txn_status());
                        self.buffer.clear();
                        self.write(&out).await?;
                        return Ok(true);
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };

            let mut out = BytesMut::new();
            let flow = handle_message(&mut self.core, msg, &mut out).await?;
            self.write(&out).await?;

            if flow == Flow::Terminate {
                return Ok(false);
            }
        }
    }

    async fn write(&mut self, out: &BytesMut) -> anyhow::Result<()> {
        if !out.is_empty() {
            self.socket.write_all(out).await?;
            self.socket.flush().await?;
        }
        Ok(())
    }
}
