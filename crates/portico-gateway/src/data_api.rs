//! Cloud SQL service client
//!
//! Issues execute/begin/commit/rollback calls against the managed SQL HTTP
//! API and normalizes responses into typed column/row form. Each client is
//! owned by exactly one connection; the transaction identifier lives here
//! and nowhere else.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pg_wire::protocol::{ColumnInfo, Scalar};

/// Transport retry budget for one logical call
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Connection settings for the cloud SQL service
#[derive(Debug, Clone)]
pub struct DataApiConfig {
    /// Base URL of the service, e.g. `https://sql.eu-west-1.example.com`
    pub endpoint: String,
    /// Cluster the statements run against
    pub cluster_id: String,
    /// Identifier of the credentials secret the service resolves
    pub secret_id: String,
    /// Database name
    pub database: String,
    pub request_timeout: Duration,
}

/// Static access credentials attached to every request. Resolution (env,
/// metadata, default chain) happens in the config layer.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DataApiError {
    /// The service answered with an error name and message
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// The request never produced a usable response
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match the service contract
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// begin/commit/rollback called in the wrong transaction state
    #[error("transaction state error: {0}")]
    TransactionState(String),
}

impl DataApiError {
    /// The service error name used for SQLSTATE mapping
    pub fn code(&self) -> &str {
        match self {
            DataApiError::Service { code, .. } => code,
            DataApiError::Transport(e) if e.is_timeout() => "StatementTimeout",
            DataApiError::Transport(_) => "ServiceUnavailable",
            DataApiError::InvalidResponse(_) => "Internal",
            DataApiError::TransactionState(_) => "Internal",
        }
    }
}

/// One tagged field value, in the service's JSON wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    IsNull(bool),
    StringValue(String),
    LongValue(i64),
    DoubleValue(f64),
    BooleanValue(bool),
    /// Base64-encoded in transit
    BlobValue(String),
}

impl Field {
    /// Tag an arbitrary JSON value the way the service expects parameters:
    /// null, string, 32-bit integer, other number, boolean, or serialized
    /// JSON text for anything structured.
    pub fn infer(value: &serde_json::Value) -> Field {
        match value {
            serde_json::Value::Null => Field::IsNull(true),
            serde_json::Value::Bool(b) => Field::BooleanValue(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i64::from(i32::MIN) && i <= i64::from(i32::MAX) {
                        return Field::LongValue(i);
                    }
                }
                Field::DoubleValue(n.as_f64().unwrap_or(0.0))
            }
            serde_json::Value::String(s) => Field::StringValue(s.clone()),
            other => Field::StringValue(other.to_string()),
        }
    }

    /// Convert a received field into a typed scalar. JSON-typed columns are
    /// parsed so the formatter can re-emit canonical JSON text.
    pub fn into_scalar(self, type_name: &str) -> Scalar {
        let ty = type_name.to_lowercase();
        match self {
            Field::IsNull(_) => Scalar::Null,
            Field::LongValue(i) => Scalar::Int(i),
            Field::DoubleValue(f) => Scalar::Float(f),
            Field::BooleanValue(b) => Scalar::Bool(b),
            Field::BlobValue(b64) => {
                match base64::engine::general_purpose::STANDARD.decode(&b64) {
                    Ok(bytes) => Scalar::Bytes(bytes),
                    Err(_) => Scalar::Text(b64),
                }
            }
            Field::StringValue(s) => {
                if ty == "json" || ty == "jsonb" {
                    match serde_json::from_str(&s) {
                        Ok(v) => Scalar::Json(v),
                        Err(_) => Scalar::Text(s),
                    }
                } else {
                    Scalar::Text(s)
                }
            }
        }
    }
}

/// A named statement parameter
#[derive(Debug, Clone, Serialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Field,
}

impl SqlParameter {
    /// Positional naming scheme the service resolves: param1..paramN
    pub fn positional(values: &[serde_json::Value]) -> Vec<SqlParameter> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| SqlParameter {
                name: format!("param{}", i + 1),
                value: Field::infer(v),
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    cluster_id: &'a str,
    secret_id: &'a str,
    database: &'a str,
    sql: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<SqlParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest<'a> {
    cluster_id: &'a str,
    secret_id: &'a str,
    database: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnMetadata {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
    #[serde(default = "default_nullable")]
    nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    #[serde(default)]
    records: Vec<Vec<Field>>,
    #[serde(default)]
    column_metadata: Vec<ColumnMetadata>,
    #[serde(default)]
    number_of_records_updated: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginResponse {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Normalized result of one execute call
#[derive(Debug, Clone)]
pub struct SqlResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Scalar>>,
    pub records_updated: Option<i64>,
}

/// Client for the cloud SQL execution service. One per connection; the
/// transaction identifier is private state behind typed operations.
pub struct DataApiClient {
    http: reqwest::Client,
    config: Arc<DataApiConfig>,
    credentials: Option<Arc<Credentials>>,
    transaction_id: Option<String>,
}

impl DataApiClient {
    pub fn new(
        config: Arc<DataApiConfig>,
        credentials: Option<Arc<Credentials>>,
    ) -> Result<Self, DataApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            config,
            credentials,
            transaction_id: None,
        })
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Execute a statement, inside the current transaction if one is held
    pub async fn execute(
        &self,
        sql: &str,
        parameters: &[SqlParameter],
    ) -> Result<SqlResult, DataApiError> {
        let request = ExecuteRequest {
            cluster_id: &self.config.cluster_id,
            secret_id: &self.config.secret_id,
            database: &self.config.database,
            sql,
            parameters: parameters.to_vec(),
            transaction_id: self.transaction_id.as_deref(),
        };

        let body = self.call("execute-statement", &request).await?;
        let response: ExecuteResponse = serde_json::from_value(body)
            .map_err(|e| DataApiError::InvalidResponse(e.to_string()))?;

        Ok(normalize(response))
    }

    /// Open a transaction and hold its identifier. Fails if one is open.
    pub async fn begin_transaction(&mut self) -> Result<(), DataApiError> {
        if self.transaction_id.is_some() {
            return Err(DataApiError::TransactionState(
                "transaction already open".into(),
            ));
        }

        let request = TransactionRequest {
            cluster_id: &self.config.cluster_id,
            secret_id: &self.config.secret_id,
            database: &self.config.database,
            transaction_id: None,
        };

        let body = self.call("begin-transaction", &request).await?;
        let response: BeginResponse = serde_json::from_value(body)
            .map_err(|e| DataApiError::InvalidResponse(e.to_string()))?;

        debug!(transaction_id = %response.transaction_id, "transaction opened");
        self.transaction_id = Some(response.transaction_id);
        Ok(())
    }

    /// Commit the open transaction. The identifier is cleared before this
    /// returns, whether or not the call succeeded.
    pub async fn commit_transaction(&mut self) -> Result<(), DataApiError> {
        self.finish_transaction("commit-transaction").await
    }

    /// Roll back the open transaction; same clearing contract as commit.
    pub async fn rollback_transaction(&mut self) -> Result<(), DataApiError> {
        self.finish_transaction("rollback-transaction").await
    }

    async fn finish_transaction(&mut self, operation: &str) -> Result<(), DataApiError> {
        let txn_id = self.transaction_id.take().ok_or_else(|| {
            DataApiError::TransactionState("no transaction open".into())
        })?;

        let request = TransactionRequest {
            cluster_id: &self.config.cluster_id,
            secret_id: &self.config.secret_id,
            database: &self.config.database,
            transaction_id: Some(&txn_id),
        };

        self.call(operation, &request).await?;
        debug!(transaction_id = %txn_id, operation, "transaction finished");
        Ok(())
    }

    /// Roll back any open transaction, swallowing but logging failures.
    /// Called when the connection goes away.
    pub async fn cleanup(&mut self) {
        if self.transaction_id.is_some() {
            if let Err(e) = self.rollback_transaction().await {
                warn!(error = %e, "rollback during connection cleanup failed");
            }
        }
    }

    async fn call<B: Serialize>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<serde_json::Value, DataApiError> {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), operation);
        let mut last_err: Option<DataApiError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS << (attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                debug!(operation, attempt, "retrying backend call");
            }

            let mut request = self
                .http
                .post(&url)
                .header("x-request-id", Uuid::new_v4().to_string())
                .json(body);
            if let Some(ref creds) = self.credentials {
                request = request
                    .header("x-api-access-key", &creds.access_key_id)
                    .header("x-api-secret-key", &creds.secret_access_key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(DataApiError::Transport(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| DataApiError::InvalidResponse(e.to_string()));
            }

            let err = service_error(status, response.text().await.unwrap_or_default());
            let retryable = matches!(
                err,
                DataApiError::Service { ref code, .. }
                    if code == "Throttling" || code == "ServiceUnavailable"
            );
            if retryable {
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or_else(|| DataApiError::InvalidResponse("no attempts made".into())))
    }
}

/// Build a service error from an HTTP status and (possibly empty) body
fn service_error(status: reqwest::StatusCode, body: String) -> DataApiError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        if let Some(code) = parsed.code {
            return DataApiError::Service {
                code,
                message: parsed.message.unwrap_or_else(|| body.clone()),
            };
        }
    }

    let code = match status.as_u16() {
        400 => "BadRequest",
        403 => "Forbidden",
        404 => "ResourceNotFound",
        408 => "StatementTimeout",
        422 => "Validation",
        429 => "Throttling",
        503 => "ServiceUnavailable",
        _ => "Internal",
    };

    DataApiError::Service {
        code: code.to_string(),
        message: if body.is_empty() {
            format!("backend returned HTTP {}", status.as_u16())
        } else {
            body
        },
    }
}

fn normalize(response: ExecuteResponse) -> SqlResult {
    let columns: Vec<ColumnInfo> = response
        .column_metadata
        .into_iter()
        .map(|meta| ColumnInfo {
            name: meta.name,
            type_name: meta.type_name.unwrap_or_else(|| "text".to_string()),
            nullable: meta.nullable,
        })
        .collect();

    let rows: Vec<Vec<Scalar>> = response
        .records
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .enumerate()
                .map(|(i, field)| {
                    let type_name = columns
                        .get(i)
                        .map(|c| c.type_name.as_str())
                        .unwrap_or("text");
                    field.into_scalar(type_name)
                })
                .collect()
        })
        .collect();

    SqlResult {
        columns,
        rows,
        records_updated: response.number_of_records_updated,
    }
}
