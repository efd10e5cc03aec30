//! System-catalog query responder
//!
//! Synthesizes replies for catalog and introspection queries so metadata
//! probes from clients never reach the backend. The one exception is
//! information_schema.tables, which is forwarded and falls back to an empty
//! reply on failure.

use crate::pg_wire::protocol::{ColumnInfo, QueryResponse};

/// How the handler should satisfy a system query
#[derive(Debug, Clone)]
pub enum SystemResponse {
    /// Reply synthesized locally
    Canned(QueryResponse),
    /// Forward the SQL unchanged; on backend failure use the fallback reply
    ForwardWithFallback(QueryResponse),
}

/// Column-name tokens recognized for metadata inference, with their types
const COLUMN_TOKENS: &[(&str, &str)] = &[
    ("proname", "name"),
    ("attname", "name"),
    ("typname", "name"),
    ("relname", "name"),
    ("nspname", "name"),
    ("datname", "name"),
    ("oid", "oid"),
    ("relkind", "bpchar"),
    ("attnum", "int2"),
    ("atttypid", "oid"),
];

/// Decide the reply for a statement the classifier marked as a system query
pub fn respond(sql: &str, database: &str, version_full: &str) -> SystemResponse {
    let lower = sql.to_lowercase();

    if lower.contains("version(") {
        return SystemResponse::Canned(single_row(
            "version",
            "text",
            version_full,
        ));
    }
    if lower.contains("current_schema") {
        return SystemResponse::Canned(single_row("current_schema", "name", "public"));
    }
    if lower.contains("current_user") {
        return SystemResponse::Canned(single_row("current_user", "name", "postgres"));
    }
    if lower.contains("current_database") {
        return SystemResponse::Canned(single_row("current_database", "name", database));
    }
    if lower.contains("pg_database") || lower.contains("datname") {
        return SystemResponse::Canned(database_row(database));
    }
    if lower.contains("information_schema.tables") {
        return SystemResponse::ForwardWithFallback(empty_with_columns(&lower));
    }

    SystemResponse::Canned(empty_with_columns(&lower))
}

fn single_row(column: &str, type_name: &str, value: &str) -> QueryResponse {
    QueryResponse {
        columns: vec![ColumnInfo::new(column, type_name)],
        rows: vec![vec![Some(value.to_string())]],
        records_updated: None,
        command_tag: None,
    }
}

/// One synthetic database row, enough for clients that enumerate databases
fn database_row(database: &str) -> QueryResponse {
    QueryResponse {
        columns: vec![
            ColumnInfo::new("did", "int4"),
            ColumnInfo::new("datname", "name"),
            ColumnInfo::new("datallowconn", "bool"),
            ColumnInfo::new("serverencoding", "text"),
            ColumnInfo::new("cancreate", "bool"),
            ColumnInfo::new("datistemplate", "bool"),
        ],
        rows: vec![vec![
            Some("12345".to_string()),
            Some(database.to_string()),
            Some("t".to_string()),
            Some("UTF8".to_string()),
            Some("f".to_string()),
            Some("f".to_string()),
        ]],
        records_updated: None,
        command_tag: None,
    }
}

/// Empty record set whose column metadata is inferred from recognized
/// column tokens in the SQL; `result text` when nothing is recognized.
fn empty_with_columns(lower: &str) -> QueryResponse {
    let mut columns: Vec<ColumnInfo> = COLUMN_TOKENS
        .iter()
        .filter(|(token, _)| lower.contains(token))
        .map(|(token, ty)| ColumnInfo::new(*token, *ty))
        .collect();

    if columns.is_empty() {
        columns = vec![ColumnInfo::new("result", "text")];
    }

    QueryResponse {
        columns,
        rows: vec![],
        records_updated: None,
        command_tag: None,
    }
}
