//! Extended-query protocol handling
//!
//! The gateway acknowledges Parse/Bind/Describe/Execute/Close without any
//! backend round-trip; Sync is the synchronization point that emits
//! ReadyForQuery. Statement text is remembered by name so clients can
//! re-prepare and close statements as usual.

use bytes::BytesMut;
use portico_common::Result;
use tracing::debug;

use super::{ConnectionCore, Flow};
use crate::pg_wire::protocol::backend::{
    write_bind_complete, write_close_complete, write_empty_query_response, write_parse_complete,
    write_row_description,
};

pub(super) fn handle_parse(
    core: &mut ConnectionCore,
    name: &str,
    sql: &str,
    out: &mut BytesMut,
) -> Result<Flow> {
    debug!(
        connection_id = core.id,
        statement = name,
        query = &sql[..sql.len().min(120)],
        "parse"
    );
    if !sql.is_empty() {
        core.session.put_prepared_statement(name, sql);
    }
    write_parse_complete(out);
    Ok(Flow::Continue)
}

pub(super) fn handle_bind(core: &mut ConnectionCore, out: &mut BytesMut) -> Result<Flow> {
    // Parameter values are accepted but not validated against the parse;
    // nothing is sent backend-side until Execute-less Sync completes.
    debug!(connection_id = core.id, "bind");
    write_bind_complete(out);
    Ok(Flow::Continue)
}

pub(super) fn handle_describe(
    core: &mut ConnectionCore,
    kind: u8,
    name: &str,
    out: &mut BytesMut,
) -> Result<Flow> {
    debug!(
        connection_id = core.id,
        kind = %(kind as char),
        name,
        "describe"
    );
    // Schema discovery is not performed; an empty RowDescription keeps
    // drivers moving through the message flow.
    write_row_description(out, &[]);
    Ok(Flow::Continue)
}

pub(super) fn handle_execute(
    core: &mut ConnectionCore,
    portal: &str,
    out: &mut BytesMut,
) -> Result<Flow> {
    debug!(connection_id = core.id, portal, "execute");
    // No ReadyForQuery here: the client's Sync supplies it.
    write_empty_query_response(out);
    Ok(Flow::Continue)
}

pub(super) fn handle_close(
    core: &mut ConnectionCore,
    kind: u8,
    name: &str,
    out: &mut BytesMut,
) -> Result<Flow> {
    debug!(connection_id = core.id, kind = %(kind as char), name, "close");
    if kind == b'S' {
        core.session.delete_prepared_statement(name);
    }
    write_close_complete(out);
    Ok(Flow::Continue)
}

pub(super) fn handle_sync(core: &mut ConnectionCore, out: &mut BytesMut) -> Result<Flow> {
    crate::pg_wire::protocol::backend::write_ready_for_query(out, core.txn_status());
    Ok(Flow::Continue)
}
