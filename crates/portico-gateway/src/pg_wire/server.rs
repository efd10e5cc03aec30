//! Connection manager
//!
//! Owns the listener and the set of live connections: accepts sockets,
//! applies TCP tuning and the concurrency cap, tracks statistics, and
//! broadcasts shutdown so every connection can roll back and close.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::connection::{configure_socket, Connection};
use crate::config::GatewayConfig;
use crate::metrics;

/// Process-wide connection statistics, updated only by the manager
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    errors: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Registry entry for one live connection
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct ConnectionHandle {
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// PostgreSQL wire protocol server
pub struct PgWireServer {
    config: Arc<GatewayConfig>,
    stats: Arc<ServerStats>,
    connections: Arc<DashMap<u64, ConnectionHandle>>,
    shutdown_tx: broadcast::Sender<()>,
    next_id: AtomicU64,
}

impl PgWireServer {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            stats: Arc::new(ServerStats::new()),
            connections: Arc::new(DashMap::new()),
            shutdown_tx,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Bind and run the accept loop until shutdown is requested.
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "failed to bind listener");
            e
        })?;
        info!("PostgreSQL wire protocol server listening on {}", addr);

        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => {
                    info!("accept loop stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) if is_fatal_listener_error(&e) => {
                    error!(error = %e, "fatal listener error");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if self.stats.active_connections() >= self.config.max_connections {
                warn!(
                    peer = %peer,
                    limit = self.config.max_connections,
                    "connection limit reached, refusing client"
                );
                drop(socket);
                continue;
            }

            self.spawn_connection(socket, peer);
        }
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = id, peer = %peer, "client connected");

        configure_socket(&socket, self.config.tcp_keepalive);

        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_opened();
        self.connections.insert(
            id,
            ConnectionHandle {
                peer,
                connected_at: Utc::now(),
            },
        );

        let config = self.config.clone();
        let stats = self.stats.clone();
        let connections = self.connections.clone();
        let shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let connection = match Connection::new(id, socket, config) {
                Ok(connection) => connection,
                Err(e) => {
                    error!(connection_id = id, peer = %peer, error = %e, "failed to set up connection");
                    connections.remove(&id);
                    stats.active_connections.fetch_sub(1, Ordering::Relaxed);
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    metrics::record_connection_closed();
                    metrics::record_connection_error();
                    return;
                }
            };
            let result = connection.run(shutdown).await;

            connections.remove(&id);
            stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            metrics::record_connection_closed();

            match result {
                Ok(()) => debug!(connection_id = id, peer = %peer, "connection closed"),
                Err(e) => {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    metrics::record_connection_error();
                    let text = e.to_string();
                    if text.contains("reset") || text.contains("broken pipe") {
                        debug!(connection_id = id, peer = %peer, "client dropped: {text}");
                    } else {
                        error!(connection_id = id, peer = %peer, error = %text, "connection failed");
                    }
                }
            }
        });
    }

    /// Broadcast shutdown and wait for the active set to drain.
    pub async fn shutdown(&self) {
        info!(
            active = self.stats.active_connections(),
            "shutting down, closing active connections"
        );
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + Duration::from_secs(5);
        while self.stats.active_connections() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.stats.active_connections();
        if remaining > 0 {
            warn!(remaining, "connections still open at shutdown deadline");
        } else {
            info!("all connections closed");
        }
    }
}

fn is_fatal_listener_error(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::AddrInUse | ErrorKind::PermissionDenied)
}
