//! Portico Gateway
//!
//! PostgreSQL-compatible TCP endpoint backed by a managed cloud SQL HTTP
//! service. Clients speak ordinary PostgreSQL protocol; statements are
//! fulfilled by execute/begin/commit/rollback calls against the service,
//! so the database itself never has to be reachable on a TCP port.

mod config;
mod data_api;
mod errors;
mod http_api;
mod metrics;
mod pg_wire;
mod telemetry;

use clap::Parser;
use portico_common::config::env_parse_or_default;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::data_api::DataApiConfig;
use crate::pg_wire::PgWireServer;

#[derive(Parser, Debug)]
#[command(name = "portico-gateway")]
#[command(about = "PostgreSQL wire-protocol gateway for a managed cloud SQL service")]
struct Args {
    /// Cluster the gateway executes statements against
    #[arg(long, env = "PORTICO_CLUSTER_ID")]
    cluster_id: String,

    /// Credentials secret the backend service resolves
    #[arg(long, env = "PORTICO_SECRET_ID")]
    secret_id: String,

    /// Database name
    #[arg(long, env = "PORTICO_DATABASE")]
    database: String,

    /// Backend service region
    #[arg(long, env = "PORTICO_REGION", default_value = "us-east-1")]
    region: String,

    /// Backend endpoint override; derived from the region when unset
    #[arg(long, env = "PORTICO_ENDPOINT")]
    endpoint: Option<String>,

    /// Explicit backend access key
    #[arg(long, env = "PORTICO_ACCESS_KEY")]
    access_key: Option<String>,

    /// Explicit backend secret key
    #[arg(long, env = "PORTICO_SECRET_KEY")]
    secret_key: Option<String>,

    /// Metadata endpoint that serves short-lived credentials
    #[arg(long, env = "PORTICO_CREDENTIALS_URI")]
    credentials_uri: Option<String>,

    /// Listen address for PostgreSQL clients
    #[arg(long, env = "PORTICO_LISTEN_HOST", default_value = "127.0.0.1")]
    listen_host: String,

    /// Listen port for PostgreSQL clients
    #[arg(long, env = "PORTICO_PORT", default_value = "5432")]
    port: u16,

    /// Enable the admin HTTP surface (/health, /metrics)
    #[arg(long, env = "PORTICO_HEALTH_ENABLED", default_value = "false")]
    health_enabled: bool,

    /// Admin HTTP port
    #[arg(long, env = "PORTICO_HEALTH_PORT", default_value = "8080")]
    health_port: u16,

    /// Backend statement timeout in seconds
    #[arg(long, env = "PORTICO_QUERY_TIMEOUT_SECS", default_value = "300")]
    query_timeout_secs: u64,

    /// Version reported in ParameterStatus and SHOW server_version
    #[arg(long, env = "PORTICO_SERVER_VERSION", default_value = "14.9")]
    server_version: String,

    /// Banner returned for SELECT version()
    #[arg(
        long,
        env = "PORTICO_SERVER_VERSION_FULL",
        default_value = "PostgreSQL 14.9 (Portico Gateway) on x86_64-pc-linux-gnu"
    )]
    server_version_full: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(&args.log_level);

    // Uncaught panics still end up in the log stream
    std::panic::set_hook(Box::new(|info| {
        error!("panic: {info}");
    }));

    info!("Starting Portico Gateway");

    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| format!("https://sql.{}.clouddata.example.com", args.region));

    let credentials = config::resolve_credentials(
        args.access_key.clone(),
        args.secret_key.clone(),
        args.credentials_uri.clone(),
    )
    .await
    .map(Arc::new);

    let config = Arc::new(GatewayConfig {
        listen_host: args.listen_host,
        listen_port: args.port,
        max_connections: env_parse_or_default("PORTICO_MAX_CONNECTIONS", 100),
        idle_timeout: Duration::from_secs(env_parse_or_default("PORTICO_IDLE_TIMEOUT_SECS", 300)),
        tcp_keepalive: Duration::from_secs(env_parse_or_default(
            "PORTICO_TCP_KEEPALIVE_SECS",
            60,
        )),
        health_enabled: args.health_enabled,
        health_port: args.health_port,
        server_version: args.server_version,
        server_version_full: args.server_version_full,
        data_api: Arc::new(DataApiConfig {
            endpoint,
            cluster_id: args.cluster_id,
            secret_id: args.secret_id,
            database: args.database,
            request_timeout: Duration::from_secs(args.query_timeout_secs),
        }),
        credentials,
    });
    config.log_config();

    metrics::init_metrics();

    let server = Arc::new(PgWireServer::new(config.clone()));

    if config.health_enabled {
        let state = http_api::AppState {
            stats: server.stats(),
            server_name: "portico-gateway".to_string(),
            max_connections: config.max_connections,
        };
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = http_api::serve(state, port).await {
                error!("admin HTTP surface failed: {}", e);
            }
        });
    }

    let pg_server = server.clone();
    let mut server_task = tokio::spawn(async move { pg_server.start().await });

    let shutdown_signal = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    };

    tokio::select! {
        _ = shutdown_signal => {
            server.shutdown().await;
            info!("Portico Gateway stopped");
            Ok(())
        }
        result = &mut server_task => {
            // The accept loop only returns early on a fatal listener error
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("server error: {}", e);
                    Err(e)
                }
                Err(e) => {
                    error!("server task panicked: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}
