//! Simple-query handling
//!
//! Classifies each statement, satisfies what can be answered locally, and
//! forwards the rest to the backend. Every path ends with ReadyForQuery,
//! except a fatal backend failure which tears the connection down after the
//! error is reported.

use bytes::BytesMut;
use portico_common::Result;
use tracing::{debug, warn};

use super::{ConnectionCore, ConnectionState, Flow};
use crate::data_api::{DataApiError, SqlResult};
use crate::errors::{classify_backend_error, ClassifiedError};
use crate::pg_wire::protocol::backend::{
    compose_query_response, write_command_complete, write_empty_query_response,
    write_error_response, write_ready_for_query,
};
use crate::pg_wire::protocol::codec::format_value;
use crate::pg_wire::protocol::constants::{
    TRANSACTION_STATUS_IDLE, TRANSACTION_STATUS_IN_TRANSACTION,
};
use crate::pg_wire::protocol::{ColumnInfo, QueryResponse};
use crate::pg_wire::query::catalog::{self, SystemResponse};
use crate::pg_wire::query::{classify, normalize, show_value, QueryClass, TxnControl};

pub(super) async fn handle_query(
    core: &mut ConnectionCore,
    sql: &str,
    out: &mut BytesMut,
) -> Result<Flow> {
    let statement = normalize(sql);
    debug!(
        connection_id = core.id,
        query = &statement[..statement.len().min(120)],
        "simple query"
    );

    match classify(&statement) {
        QueryClass::Empty => {
            write_empty_query_response(out);
            write_ready_for_query(out, core.txn_status());
            Ok(Flow::Continue)
        }
        QueryClass::Transaction(control) => handle_transaction(core, control, out).await,
        QueryClass::Set { name, value } => {
            core.session.set_parameter(&name, value);
            reply(core, out, QueryResponse::tag("SET"))
        }
        QueryClass::Show { name } => {
            let value = show_value(&name, &core.session, &core.config.server_version);
            let response = QueryResponse {
                columns: vec![ColumnInfo::new(name, "text")],
                rows: vec![vec![Some(value)]],
                records_updated: None,
                command_tag: None,
            };
            reply(core, out, response)
        }
        QueryClass::LocalUtility(tag) => reply(core, out, QueryResponse::tag(tag)),
        QueryClass::System(_) => {
            match catalog::respond(
                &statement,
                &core.config.data_api.database,
                &core.config.server_version_full,
            ) {
                SystemResponse::Canned(response) => reply(core, out, response),
                SystemResponse::ForwardWithFallback(fallback) => {
                    match core.backend.execute(&statement, &[]).await {
                        Ok(result) => reply(core, out, render(result, &statement)),
                        Err(e) => {
                            warn!(
                                connection_id = core.id,
                                error = %e,
                                "forwarded catalog query failed, returning empty reply"
                            );
                            reply(core, out, fallback)
                        }
                    }
                }
            }
        }
        QueryClass::Forward => match core.backend.execute(&statement, &[]).await {
            Ok(result) => reply(core, out, render(result, &statement)),
            Err(e) => backend_failure(core, e, out).await,
        },
    }
}

async fn handle_transaction(
    core: &mut ConnectionCore,
    control: TxnControl,
    out: &mut BytesMut,
) -> Result<Flow> {
    match control {
        TxnControl::Begin => {
            if !core.backend.is_in_transaction() {
                if let Err(e) = core.backend.begin_transaction().await {
                    return backend_failure(core, e, out).await;
                }
            }
            core.session.mark_transaction_begin();
            write_command_complete(out, "BEGIN");
            write_ready_for_query(out, TRANSACTION_STATUS_IN_TRANSACTION);
            Ok(Flow::Continue)
        }
        TxnControl::Commit | TxnControl::Rollback => {
            let (op, tag) = match control {
                TxnControl::Commit => ("commit", "COMMIT"),
                _ => ("rollback", "ROLLBACK"),
            };

            // The backend call happens only when a transaction is actually
            // open; the local flag clears unconditionally so the session can
            // never be stuck believing it is still in a transaction.
            let result = if core.backend.is_in_transaction() {
                match control {
                    TxnControl::Commit => core.backend.commit_transaction().await,
                    _ => core.backend.rollback_transaction().await,
                }
            } else {
                Ok(())
            };
            core.session.mark_transaction_end();

            match result {
                Ok(()) => {
                    write_command_complete(out, tag);
                    write_ready_for_query(out, TRANSACTION_STATUS_IDLE);
                    Ok(Flow::Continue)
                }
                Err(e) => {
                    warn!(connection_id = core.id, error = %e, "{op} failed");
                    backend_failure(core, e, out).await
                }
            }
        }
    }
}

/// Compose a reply and trail it with ReadyForQuery; composition failures
/// degrade to an ErrorResponse so the connection stays usable.
fn reply(core: &mut ConnectionCore, out: &mut BytesMut, response: QueryResponse) -> Result<Flow> {
    let mut reply_buf = BytesMut::new();
    if let Err(e) = compose_query_response(&mut reply_buf, &response, core.txn_status()) {
        warn!(connection_id = core.id, error = %e, "failed to compose reply");
        let classified = ClassifiedError::new(crate::errors::sqlstate::INTERNAL_ERROR, e.to_string());
        write_error_response(out, &classified);
        write_ready_for_query(out, core.txn_status());
        return Ok(Flow::Continue);
    }
    out.extend_from_slice(&reply_buf);
    Ok(Flow::Continue)
}

/// Report a backend failure to the client. Fatal errors (the backend is
/// unreachable) terminate the connection after the error is sent.
async fn backend_failure(
    core: &mut ConnectionCore,
    error: DataApiError,
    out: &mut BytesMut,
) -> Result<Flow> {
    let classified = classify_backend_error(error.code(), &error.to_string());
    write_error_response(out, &classified);

    if classified.is_fatal() {
        core.backend.cleanup().await;
        core.state = ConnectionState::Terminated;
        return Ok(Flow::Terminate);
    }

    write_ready_for_query(out, core.txn_status());
    Ok(Flow::Continue)
}

/// Turn a normalized backend result into wire-ready text rows
fn render(result: SqlResult, statement: &str) -> QueryResponse {
    let rows = result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, scalar)| {
                    let type_name = result
                        .columns
                        .get(i)
                        .map(|c| c.type_name.as_str())
                        .unwrap_or("text");
                    format_value(scalar, type_name)
                })
                .collect()
        })
        .collect();

    QueryResponse {
        command_tag: if result.columns.is_empty() {
            infer_command_tag(statement, result.records_updated)
        } else {
            None
        },
        columns: result.columns,
        rows,
        records_updated: result.records_updated,
    }
}

/// Command tag for row-less statements, inferred from the statement verb
fn infer_command_tag(statement: &str, records_updated: Option<i64>) -> Option<String> {
    let n = records_updated?;
    let verb = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    match verb.as_str() {
        "INSERT" => Some(format!("INSERT 0 {n}")),
        "UPDATE" => Some(format!("UPDATE {n}")),
        "DELETE" => Some(format!("DELETE {n}")),
        _ => None,
    }
}
