//! Backend (server → client) message builders
//!
//! Each builder appends one complete protocol message to the connection's
//! outgoing buffer. `compose_query_response` assembles the full reply
//! sequence for a query result.

use bytes::BytesMut;
use portico_common::{PorticoError, Result};

use super::codec::MessageWriter;
use super::types::{pg_type_len, pg_type_oid};
use crate::errors::ClassifiedError;

/// Column descriptor: the intermediate representation between backend
/// normalization and RowDescription generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
        }
    }
}

/// A normalized query result ready to be rendered to the wire. Row values
/// are already in text format; `None` marks NULL.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Option<String>>>,
    pub records_updated: Option<i64>,
    pub command_tag: Option<String>,
}

impl QueryResponse {
    /// A reply that carries only a command tag (SET, BEGIN, ...)
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            command_tag: Some(tag.into()),
            ..Default::default()
        }
    }
}

fn finish(out: &mut BytesMut, msg_type: u8, body: MessageWriter) {
    let body = body.into_inner();
    let mut w = MessageWriter::new();
    w.put_u8(msg_type);
    w.put_i32(4 + body.len() as i32);
    w.put_bytes(&body);
    out.extend_from_slice(&w.into_inner());
}

pub fn write_authentication_ok(out: &mut BytesMut) {
    let mut body = MessageWriter::new();
    body.put_i32(0);
    finish(out, b'R', body);
}

pub fn write_authentication_cleartext_password(out: &mut BytesMut) {
    let mut body = MessageWriter::new();
    body.put_i32(3);
    finish(out, b'R', body);
}

pub fn write_backend_key_data(out: &mut BytesMut, process_id: i32, secret_key: i32) {
    let mut body = MessageWriter::new();
    body.put_i32(process_id).put_i32(secret_key);
    finish(out, b'K', body);
}

pub fn write_parameter_status(out: &mut BytesMut, name: &str, value: &str) {
    let mut body = MessageWriter::new();
    body.put_cstr(name).put_cstr(value);
    finish(out, b'S', body);
}

pub fn write_ready_for_query(out: &mut BytesMut, txn_status: u8) {
    let mut body = MessageWriter::new();
    body.put_u8(txn_status);
    finish(out, b'Z', body);
}

pub fn write_row_description(out: &mut BytesMut, columns: &[ColumnInfo]) {
    let mut body = MessageWriter::new();
    body.put_i16(columns.len() as i16);
    for (idx, col) in columns.iter().enumerate() {
        body.put_cstr(&col.name);
        body.put_i32(0); // table OID
        body.put_i16(idx as i16 + 1); // column attribute number
        body.put_i32(pg_type_oid(&col.type_name) as i32);
        body.put_i16(pg_type_len(&col.type_name));
        body.put_i32(-1); // type modifier
        body.put_i16(0); // format code: text
    }
    finish(out, b'T', body);
}

pub fn write_data_row(out: &mut BytesMut, values: &[Option<String>]) {
    let mut body = MessageWriter::new();
    body.put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(text) => {
                body.put_len_str(text);
            }
            None => {
                body.put_i32(-1);
            }
        }
    }
    finish(out, b'D', body);
}

pub fn write_command_complete(out: &mut BytesMut, tag: &str) {
    let mut body = MessageWriter::new();
    body.put_cstr(tag);
    finish(out, b'C', body);
}

pub fn write_empty_query_response(out: &mut BytesMut) {
    finish(out, b'I', MessageWriter::new());
}

pub fn write_parse_complete(out: &mut BytesMut) {
    finish(out, b'1', MessageWriter::new());
}

pub fn write_bind_complete(out: &mut BytesMut) {
    finish(out, b'2', MessageWriter::new());
}

pub fn write_close_complete(out: &mut BytesMut) {
    finish(out, b'3', MessageWriter::new());
}

pub fn write_error_response(out: &mut BytesMut, error: &ClassifiedError) {
    write_response_fields(out, b'E', error.severity, error);
}

pub fn write_notice_response(out: &mut BytesMut, message: &str) {
    let notice = ClassifiedError::notice(message);
    write_response_fields(out, b'N', "NOTICE", &notice);
}

fn write_response_fields(out: &mut BytesMut, msg_type: u8, severity: &str, error: &ClassifiedError) {
    let mut body = MessageWriter::new();
    body.put_u8(b'S').put_cstr(severity);
    body.put_u8(b'C').put_cstr(error.sqlstate);
    body.put_u8(b'M').put_cstr(&error.message);
    if let Some(ref detail) = error.detail {
        if !detail.is_empty() {
            body.put_u8(b'D').put_cstr(detail);
        }
    }
    if let Some(ref hint) = error.hint {
        body.put_u8(b'H').put_cstr(hint);
    }
    body.put_u8(0);
    finish(out, msg_type, body);
}

/// Render a full query reply: result messages followed by ReadyForQuery.
///
/// A record set (column metadata present) becomes RowDescription + DataRows
/// + CommandComplete; a row-count-only result becomes a bare
/// CommandComplete; a result with neither becomes EmptyQueryResponse.
pub fn compose_query_response(
    out: &mut BytesMut,
    response: &QueryResponse,
    txn_status: u8,
) -> Result<()> {
    if !response.columns.is_empty() {
        for (i, row) in response.rows.iter().enumerate() {
            if row.len() != response.columns.len() {
                return Err(PorticoError::Internal(format!(
                    "row {} has {} values for {} columns",
                    i,
                    row.len(),
                    response.columns.len()
                )));
            }
        }
        write_row_description(out, &response.columns);
        for row in &response.rows {
            write_data_row(out, row);
        }
        let tag = response
            .command_tag
            .clone()
            .unwrap_or_else(|| format!("SELECT {}", response.rows.len()));
        write_command_complete(out, &tag);
    } else if response.records_updated.is_some() || response.command_tag.is_some() {
        let tag = response.command_tag.clone().unwrap_or_else(|| {
            match response.records_updated {
                Some(n) if n > 0 => format!("UPDATE {n}"),
                _ => "OK".to_string(),
            }
        });
        write_command_complete(out, &tag);
    } else {
        write_empty_query_response(out);
    }

    write_ready_for_query(out, txn_status);
    Ok(())
}
