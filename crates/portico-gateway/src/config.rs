//! Gateway configuration
//!
//! Built once at startup from the parsed CLI/environment arguments and
//! shared read-only across every connection.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data_api::{Credentials, DataApiConfig};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// Hard cap on concurrent client connections
    pub max_connections: usize,
    /// Destroy a connection after this long without client traffic
    pub idle_timeout: Duration,
    pub tcp_keepalive: Duration,
    pub health_enabled: bool,
    pub health_port: u16,
    /// Version advertised in ParameterStatus and SHOW server_version
    pub server_version: String,
    /// Full banner returned for SELECT version()
    pub server_version_full: String,
    pub data_api: Arc<DataApiConfig>,
    pub credentials: Option<Arc<Credentials>>,
}

impl GatewayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn log_config(&self) {
        info!(
            "Gateway config: listen={}, cluster={}, database={}, max_connections={}, idle_timeout={}s",
            self.listen_addr(),
            self.data_api.cluster_id,
            self.data_api.database,
            self.max_connections,
            self.idle_timeout.as_secs()
        );
    }
}

/// Shape of the credentials document served by a metadata endpoint
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataCredentials {
    access_key_id: String,
    secret_access_key: String,
}

/// Resolve backend credentials: explicit key pair first, then a metadata
/// URI, then anonymous (the service-side default chain takes over).
pub async fn resolve_credentials(
    access_key: Option<String>,
    secret_key: Option<String>,
    metadata_uri: Option<String>,
) -> Option<Credentials> {
    if let (Some(access_key_id), Some(secret_access_key)) = (access_key, secret_key) {
        debug!("using explicit backend credentials");
        return Some(Credentials {
            access_key_id,
            secret_access_key,
        });
    }

    if let Some(uri) = metadata_uri {
        match fetch_metadata_credentials(&uri).await {
            Ok(creds) => {
                info!("resolved backend credentials from metadata endpoint");
                return Some(creds);
            }
            Err(e) => {
                warn!(error = %e, "metadata credential fetch failed, continuing anonymous");
            }
        }
    }

    debug!("no backend credentials configured, relying on service defaults");
    None
}

async fn fetch_metadata_credentials(uri: &str) -> anyhow::Result<Credentials> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let doc: MetadataCredentials = client.get(uri).send().await?.error_for_status()?.json().await?;
    Ok(Credentials {
        access_key_id: doc.access_key_id,
        secret_access_key: doc.secret_access_key,
    })
}
