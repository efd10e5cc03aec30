//! Per-connection protocol state machine
//!
//! Drives one client from the unauthenticated startup state to the
//! query-accepting ready state and back to termination. Messages are
//! handled strictly in arrival order; every handler appends its replies to
//! the connection's outgoing buffer.

mod extended;
mod simple;
mod startup;

use bytes::BytesMut;
use portico_common::{PorticoError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::protocol::FrontendMessage;
use super::session::SessionState;
use crate::config::GatewayConfig;
use crate::data_api::DataApiClient;

/// Protocol phase of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Startup,
    Authentication,
    Ready,
    Terminated,
}

/// What the connection driver should do after a message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// Everything the state machine owns, separated from the socket so the
/// machine can be driven directly in tests.
pub struct ConnectionCore {
    pub id: u64,
    pub state: ConnectionState,
    pub session: SessionState,
    pub backend: DataApiClient,
    pub config: Arc<GatewayConfig>,
    pub startup_params: HashMap<String, String>,
}

impl ConnectionCore {
    pub fn new(id: u64, config: Arc<GatewayConfig>) -> Result<Self> {
        let backend = DataApiClient::new(config.data_api.clone(), config.credentials.clone())
            .map_err(|e| PorticoError::Backend(e.to_string()))?;
        Ok(Self {
            id,
            state: ConnectionState::Startup,
            session: SessionState::new(),
            backend,
            config,
            startup_params: HashMap::new(),
        })
    }

    /// The transaction status byte ReadyForQuery advertises right now
    pub fn txn_status(&self) -> u8 {
        if self.session.in_transaction() {
            super::protocol::constants::TRANSACTION_STATUS_IN_TRANSACTION
        } else {
            super::protocol::constants::TRANSACTION_STATUS_IDLE
        }
    }
}

/// Dispatch one decoded message against the current state.
pub async fn handle_message(
    core: &mut ConnectionCore,
    msg: FrontendMessage,
    out: &mut BytesMut,
) -> Result<Flow> {
    match core.state {
        ConnectionState::Startup => startup::handle_startup_phase(core, msg, out),
        ConnectionState::Authentication => startup::handle_auth_phase(core, msg, out),
        ConnectionState::Ready => handle_ready(core, msg, out).await,
        ConnectionState::Terminated => {
            // Input after termination is silently dropped
            Ok(Flow::Terminate)
        }
    }
}

async fn handle_ready(
    core: &mut ConnectionCore,
    msg: FrontendMessage,
    out: &mut BytesMut,
) -> Result<Flow> {
    match msg {
        FrontendMessage::Query(sql) => simple::handle_query(core, &sql, out).await,
        FrontendMessage::Parse { name, sql, .. } => extended::handle_parse(core, &name, &sql, out),
        FrontendMessage::Bind { .. } => extended::handle_bind(core, out),
        FrontendMessage::Describe { kind, name } => {
            extended::handle_describe(core, kind, &name, out)
        }
        FrontendMessage::Execute { portal, .. } => extended::handle_execute(core, &portal, out),
        FrontendMessage::Close { kind, name } => extended::handle_close(core, kind, &name, out),
        FrontendMessage::Sync => extended::handle_sync(core, out),
        FrontendMessage::Terminate => {
            debug!(connection_id = core.id, "client sent Terminate");
            core.backend.cleanup().await;
            core.state = ConnectionState::Terminated;
            Ok(Flow::Terminate)
        }
        FrontendMessage::Unknown(msg_type) => {
            debug!(
                connection_id = core.id,
                "ignoring unknown message type 0x{msg_type:02x}"
            );
            Ok(Flow::Continue)
        }
        other => Err(PorticoError::Protocol(format!(
            "unexpected message in ready state: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_api::DataApiConfig;
    use axum::routing::post;
    use axum::Json;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_gateway_config(endpoint: String) -> Arc<GatewayConfig> {
        Arc::new(GatewayConfig {
            listen_host: "127.0.0.1".into(),
            listen_port: 5432,
            max_connections: 100,
            idle_timeout: Duration::from_secs(300),
            tcp_keepalive: Duration::from_secs(60),
            health_enabled: false,
            health_port: 8080,
            server_version: "14.9".into(),
            server_version_full: "PostgreSQL 14.9 (Portico Gateway) on x86_64-pc-linux-gnu"
                .into(),
            data_api: Arc::new(DataApiConfig {
                endpoint,
                cluster_id: "cluster-1".into(),
                secret_id: "secret-1".into(),
                database: "db".into(),
                request_timeout: Duration::from_secs(5),
            }),
            credentials: None,
        })
    }

    /// A core whose backend endpoint is unroutable: any backend call fails,
    /// which doubles as proof that locally-answered queries never call out.
    fn offline_core() -> ConnectionCore {
        ConnectionCore::new(1, test_gateway_config("http://127.0.0.1:1".into())).unwrap()
    }

    async fn spawn_backend(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Split an outgoing buffer into (type, body) frames
    fn split_messages(buf: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut messages = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let msg_type = buf[pos];
            let len =
                i32::from_be_bytes([buf[pos + 1], buf[pos + 2], buf[pos + 3], buf[pos + 4]])
                    as usize;
            messages.push((msg_type, buf[pos + 5..pos + 1 + len].to_vec()));
            pos += 1 + len;
        }
        messages
    }

    fn startup_message() -> FrontendMessage {
        let mut params = HashMap::new();
        params.insert("user".to_string(), "alice".to_string());
        params.insert("database".to_string(), "db".to_string());
        FrontendMessage::Startup {
            version: 196608,
            params,
        }
    }

    async fn authenticate(core: &mut ConnectionCore) {
        let mut out = BytesMut::new();
        handle_message(core, startup_message(), &mut out).await.unwrap();
        let mut out = BytesMut::new();
        handle_message(core, FrontendMessage::Password("x".into()), &mut out)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_startup_then_password_reaches_ready() {
        let mut core = offline_core();

        // SSL request is declined with a single 'N' and no state change
        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::SslRequest, &mut out)
            .await
            .unwrap();
        assert_eq!(&out[..], b"N");
        assert_eq!(core.state, ConnectionState::Startup);

        // Startup elicits AuthenticationCleartextPassword
        let mut out = BytesMut::new();
        handle_message(&mut core, startup_message(), &mut out)
            .await
            .unwrap();
        assert_eq!(&out[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 3]);
        assert_eq!(core.state, ConnectionState::Authentication);

        // Any password is accepted
        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::Password("x".into()), &mut out)
            .await
            .unwrap();
        assert_eq!(core.state, ConnectionState::Ready);

        let messages = split_messages(&out);
        assert_eq!(messages[0].0, b'R'); // AuthenticationOk
        assert_eq!(messages[0].1, vec![0, 0, 0, 0]);
        assert_eq!(messages[1].0, b'K'); // BackendKeyData
        let status_count = messages.iter().filter(|(t, _)| *t == b'S').count();
        assert!(status_count >= 1);
        let (last_type, last_body) = messages.last().unwrap();
        assert_eq!(*last_type, b'Z');
        assert_eq!(last_body, &vec![b'I']);
    }

    #[tokio::test]
    async fn test_select_version_is_answered_locally() {
        let mut core = offline_core();
        authenticate(&mut core).await;

        let mut out = BytesMut::new();
        let flow = handle_message(
            &mut core,
            FrontendMessage::Query("SELECT version()".into()),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(flow, Flow::Continue);

        let messages = split_messages(&out);
        let types: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);

        let row = String::from_utf8_lossy(&messages[1].1).to_string();
        assert!(row.contains("PostgreSQL 14.9"));
        assert_eq!(&messages[2].1, b"SELECT 1\0");
        assert_eq!(messages[3].1, vec![b'I']);
    }

    #[tokio::test]
    async fn test_transaction_round_trip_hits_backend_once_each() {
        static BEGINS: AtomicUsize = AtomicUsize::new(0);
        static EXECUTES: AtomicUsize = AtomicUsize::new(0);
        static COMMITS: AtomicUsize = AtomicUsize::new(0);

        let app = axum::Router::new()
            .route(
                "/begin-transaction",
                post(|| async {
                    BEGINS.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"transactionId": "txn-1"}))
                }),
            )
            .route(
                "/execute-statement",
                post(|Json(body): Json<serde_json::Value>| async move {
                    EXECUTES.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(body["transactionId"], "txn-1");
                    Json(json!({
                        "records": [[{"longValue": 1}]],
                        "columnMetadata": [{"name": "?column?", "typeName": "int4"}],
                    }))
                }),
            )
            .route(
                "/commit-transaction",
                post(|| async {
                    COMMITS.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"transactionStatus": "committed"}))
                }),
            );
        let endpoint = spawn_backend(app).await;

        let mut core = ConnectionCore::new(7, test_gateway_config(endpoint)).unwrap();
        authenticate(&mut core).await;

        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::Query("BEGIN".into()), &mut out)
            .await
            .unwrap();
        let messages = split_messages(&out);
        assert_eq!(&messages[0].1, b"BEGIN\0");
        assert_eq!(messages[1].1, vec![b'T']);
        assert!(core.session.in_transaction());

        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::Query("SELECT 1".into()), &mut out)
            .await
            .unwrap();
        let messages = split_messages(&out);
        let types: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);
        assert_eq!(messages[3].1, vec![b'T']); // still in transaction

        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::Query("COMMIT".into()), &mut out)
            .await
            .unwrap();
        let messages = split_messages(&out);
        assert_eq!(&messages[0].1, b"COMMIT\0");
        assert_eq!(messages[1].1, vec![b'I']);
        assert!(!core.session.in_transaction());
        assert!(!core.backend.is_in_transaction());

        assert_eq!(BEGINS.load(Ordering::SeqCst), 1);
        assert_eq!(EXECUTES.load(Ordering::SeqCst), 1);
        assert_eq!(COMMITS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_then_show_round_trip() {
        let mut core = offline_core();
        authenticate(&mut core).await;

        let mut out = BytesMut::new();
        handle_message(
            &mut core,
            FrontendMessage::Query("SET timezone = 'UTC'".into()),
            &mut out,
        )
        .await
        .unwrap();
        let messages = split_messages(&out);
        assert_eq!(&messages[0].1, b"SET\0");

        let mut out = BytesMut::new();
        handle_message(
            &mut core,
            FrontendMessage::Query("SHOW timezone".into()),
            &mut out,
        )
        .await
        .unwrap();
        let messages = split_messages(&out);
        let types: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);
        assert!(String::from_utf8_lossy(&messages[1].1).contains("UTC"));
    }

    #[tokio::test]
    async fn test_extended_protocol_flow() {
        let mut core = offline_core();
        authenticate(&mut core).await;

        let mut out = BytesMut::new();
        handle_message(
            &mut core,
            FrontendMessage::Parse {
                name: "s".into(),
                sql: "SELECT 1".into(),
                param_types: vec![],
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(&out[..], &[b'1', 0, 0, 0, 4]);
        assert_eq!(
            core.session.get_prepared_statement("s").unwrap().sql,
            "SELECT 1"
        );

        let mut out = BytesMut::new();
        handle_message(
            &mut core,
            FrontendMessage::Bind {
                portal: String::new(),
                statement: "s".into(),
                param_formats: vec![],
                param_values: vec![],
                result_formats: vec![],
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(&out[..], &[b'2', 0, 0, 0, 4]);

        let mut out = BytesMut::new();
        handle_message(
            &mut core,
            FrontendMessage::Describe {
                kind: b'S',
                name: "s".into(),
            },
            &mut out,
        )
        .await
        .unwrap();
        // Empty RowDescription: zero columns
        assert_eq!(&out[..], &[b'T', 0, 0, 0, 6, 0, 0]);

        let mut out = BytesMut::new();
        handle_message(
            &mut core,
            FrontendMessage::Execute {
                portal: String::new(),
                max_rows: 0,
            },
            &mut out,
        )
        .await
        .unwrap();
        // EmptyQueryResponse and nothing else: Sync supplies ReadyForQuery
        assert_eq!(&out[..], &[b'I', 0, 0, 0, 4]);

        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::Sync, &mut out)
            .await
            .unwrap();
        assert_eq!(&out[..], &[b'Z', 0, 0, 0, 5, b'I']);
    }

    #[tokio::test]
    async fn test_terminate_rolls_back_open_transaction() {
        static ROLLBACKS: AtomicUsize = AtomicUsize::new(0);

        let app = axum::Router::new()
            .route(
                "/begin-transaction",
                post(|| async { Json(json!({"transactionId": "txn-z"})) }),
            )
            .route(
                "/rollback-transaction",
                post(|| async {
                    ROLLBACKS.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"transactionStatus": "rolled back"}))
                }),
            );
        let endpoint = spawn_backend(app).await;

        let mut core = ConnectionCore::new(9, test_gateway_config(endpoint)).unwrap();
        authenticate(&mut core).await;

        let mut out = BytesMut::new();
        handle_message(&mut core, FrontendMessage::Query("BEGIN".into()), &mut out)
            .await
            .unwrap();

        let mut out = BytesMut::new();
        let flow = handle_message(&mut core, FrontendMessage::Terminate, &mut out)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Terminate);
        assert_eq!(core.state, ConnectionState::Terminated);
        assert_eq!(ROLLBACKS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_error_keeps_connection_usable() {
        let app = axum::Router::new().route(
            "/execute-statement",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(json!({"code": "BadRequest", "message": "syntax error at or near \"SELEC\""})),
                )
            }),
        );
        let endpoint = spawn_backend(app).await;

        let mut core = ConnectionCore::new(3, test_gateway_config(endpoint)).unwrap();
        authenticate(&mut core).await;

        let mut out = BytesMut::new();
        let flow = handle_message(&mut core, FrontendMessage::Query("SELEC 1".into()), &mut out)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        let messages = split_messages(&out);
        assert_eq!(messages[0].0, b'E');
        let error_text = String::from_utf8_lossy(&messages[0].1).to_string();
        assert!(error_text.contains("42601"));
        assert_eq!(messages[1].0, b'Z');
        assert_eq!(core.state, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_unexpected_message_before_auth_is_protocol_error() {
        let mut core = offline_core();
        let mut out = BytesMut::new();
        let result =
            handle_message(&mut core, FrontendMessage::Query("SELECT 1".into()), &mut out).await;
        assert!(matches!(result, Err(PorticoError::Protocol(_))));
    }
}
