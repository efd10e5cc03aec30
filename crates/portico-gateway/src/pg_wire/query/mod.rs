//! Query classification
//!
//! Coarse recognition of transaction-control, session-parameter, utility and
//! system-catalog statements. Everything else is forwarded to the backend
//! verbatim; no SQL parsing happens here.

pub mod catalog;

use once_cell::sync::Lazy;
use regex::Regex;

use super::session::SessionState;

/// Transaction-control statement kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnControl {
    Begin,
    Commit,
    Rollback,
}

/// System-catalog query sub-kinds, used to pick a canned reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemQuery {
    Version,
    CurrentSchema,
    CurrentUser,
    CurrentDatabase,
    DatabaseList,
    InformationSchemaTables,
    Catalog,
}

/// Classification outcome for a normalized statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryClass {
    Empty,
    Transaction(TxnControl),
    Set { name: String, value: String },
    Show { name: String },
    System(SystemQuery),
    /// RESET / DISCARD / DEALLOCATE: acknowledged locally with this tag
    LocalUtility(&'static str),
    Forward,
}

static BEGIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(begin|start\s+transaction)$").unwrap());
static COMMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^commit(\s+work)?$").unwrap());
static ROLLBACK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^rollback(\s+work)?$").unwrap());
static SET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^set\s+(?:session\s+|local\s+)?(\w+)\s*(?:=|\s+to\s+)\s*(.+)$").unwrap());
static SHOW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^show\s+(\w+)$").unwrap());
static SHOW_TIMEZONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^show\s+time\s+zone$").unwrap());
static SHOW_ISOLATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^show\s+transaction\s+isolation(\s+level)?$").unwrap());

/// Substrings that mark a statement as a system-catalog query
const SYSTEM_MARKERS: &[&str] = &[
    "pg_catalog.",
    "information_schema.",
    "pg_class",
    "pg_namespace",
    "pg_attribute",
    "pg_type",
    "pg_index",
    "pg_constraint",
    "pg_proc",
    "pg_stat_activity",
    "pg_tables",
    "pg_database",
    "pg_settings",
    "version(",
    "current_schema",
    "current_user",
    "current_database",
];

/// Trim whitespace and trailing semicolons
pub fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_string()
}

/// Classify a normalized statement. Rules are tried in order; the first
/// match wins. Classification is deterministic for a given input.
pub fn classify(sql: &str) -> QueryClass {
    if sql.is_empty() {
        return QueryClass::Empty;
    }

    if BEGIN_RE.is_match(sql) {
        return QueryClass::Transaction(TxnControl::Begin);
    }
    if COMMIT_RE.is_match(sql) {
        return QueryClass::Transaction(TxnControl::Commit);
    }
    if ROLLBACK_RE.is_match(sql) {
        return QueryClass::Transaction(TxnControl::Rollback);
    }

    if let Some(caps) = SET_RE.captures(sql) {
        return QueryClass::Set {
            name: caps[1].to_lowercase(),
            value: strip_quotes(caps[2].trim()).to_string(),
        };
    }

    if SHOW_TIMEZONE_RE.is_match(sql) {
        return QueryClass::Show {
            name: "timezone".to_string(),
        };
    }
    if SHOW_ISOLATION_RE.is_match(sql) {
        return QueryClass::Show {
            name: "transaction_isolation".to_string(),
        };
    }
    if let Some(caps) = SHOW_RE.captures(sql) {
        return QueryClass::Show {
            name: caps[1].to_lowercase(),
        };
    }

    let lower = sql.to_lowercase();
    if lower.starts_with("reset ") {
        return QueryClass::LocalUtility("RESET");
    }
    if lower.starts_with("discard") {
        return QueryClass::LocalUtility("DISCARD ALL");
    }
    if lower.starts_with("deallocate") {
        return QueryClass::LocalUtility("DEALLOCATE");
    }

    if SYSTEM_MARKERS.iter().any(|m| lower.contains(m)) {
        return QueryClass::System(system_kind(&lower));
    }

    QueryClass::Forward
}

fn system_kind(lower: &str) -> SystemQuery {
    if lower.contains("version(") {
        SystemQuery::Version
    } else if lower.contains("current_schema") {
        SystemQuery::CurrentSchema
    } else if lower.contains("current_user") {
        SystemQuery::CurrentUser
    } else if lower.contains("current_database") {
        SystemQuery::CurrentDatabase
    } else if lower.contains("information_schema.tables") {
        SystemQuery::InformationSchemaTables
    } else if lower.contains("pg_database") {
        SystemQuery::DatabaseList
    } else {
        SystemQuery::Catalog
    }
}

/// Strip one level of surrounding single or double quotes
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Resolve the value for a SHOW statement: fixed replies first, then the
/// session parameter store, then the literal "unknown".
pub fn show_value(name: &str, session: &SessionState, server_version: &str) -> String {
    match name {
        "server_version" => server_version.to_string(),
        "server_encoding" | "client_encoding" => "UTF8".to_string(),
        "timezone" | "time_zone" => "UTC".to_string(),
        "datestyle" => "ISO, MDY".to_string(),
        "transaction_isolation" => "read committed".to_string(),
        _ => session
            .get_parameter(name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(classify(&normalize("   ;; ")), QueryClass::Empty);
    }

    #[test]
    fn test_transaction_control() {
        assert_eq!(
            classify("BEGIN"),
            QueryClass::Transaction(TxnControl::Begin)
        );
        assert_eq!(
            classify("start   transaction"),
            QueryClass::Transaction(TxnControl::Begin)
        );
        assert_eq!(
            classify("commit work"),
            QueryClass::Transaction(TxnControl::Commit)
        );
        assert_eq!(
            classify("ROLLBACK"),
            QueryClass::Transaction(TxnControl::Rollback)
        );
        // BEGIN with options is not transaction-control here; it forwards
        assert_eq!(classify("BEGIN ISOLATION LEVEL SERIALIZABLE"), QueryClass::Forward);
    }

    #[test]
    fn test_set() {
        assert_eq!(
            classify("SET timezone = 'UTC'"),
            QueryClass::Set {
                name: "timezone".into(),
                value: "UTC".into()
            }
        );
        assert_eq!(
            classify("set application_name to \"psql\""),
            QueryClass::Set {
                name: "application_name".into(),
                value: "psql".into()
            }
        );
        assert_eq!(
            classify("SET search_path = public, app"),
            QueryClass::Set {
                name: "search_path".into(),
                value: "public, app".into()
            }
        );
    }

    #[test]
    fn test_show() {
        assert_eq!(
            classify("SHOW timezone"),
            QueryClass::Show {
                name: "timezone".into()
            }
        );
        assert_eq!(
            classify("show TIME ZONE"),
            QueryClass::Show {
                name: "timezone".into()
            }
        );
        assert_eq!(
            classify("SHOW TRANSACTION ISOLATION LEVEL"),
            QueryClass::Show {
                name: "transaction_isolation".into()
            }
        );
    }

    #[test]
    fn test_system_queries() {
        assert_eq!(
            classify("SELECT version()"),
            QueryClass::System(SystemQuery::Version)
        );
        assert_eq!(
            classify("SELECT current_database()"),
            QueryClass::System(SystemQuery::CurrentDatabase)
        );
        assert_eq!(
            classify("SELECT datname FROM pg_database"),
            QueryClass::System(SystemQuery::DatabaseList)
        );
        assert_eq!(
            classify("SELECT * FROM information_schema.tables"),
            QueryClass::System(SystemQuery::InformationSchemaTables)
        );
        assert_eq!(
            classify("SELECT relname FROM pg_class WHERE relkind = 'r'"),
            QueryClass::System(SystemQuery::Catalog)
        );
    }

    #[test]
    fn test_local_utilities() {
        assert_eq!(classify("RESET search_path"), QueryClass::LocalUtility("RESET"));
        assert_eq!(classify("DISCARD ALL"), QueryClass::LocalUtility("DISCARD ALL"));
        assert_eq!(
            classify("DEALLOCATE stmt1"),
            QueryClass::LocalUtility("DEALLOCATE")
        );
    }

    #[test]
    fn test_forward_default() {
        assert_eq!(classify("SELECT * FROM orders"), QueryClass::Forward);
        assert_eq!(classify("INSERT INTO t VALUES (1)"), QueryClass::Forward);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let sql = normalize("SELECT version();");
        assert_eq!(classify(&sql), classify(&sql));
    }

    #[test]
    fn test_show_resolution_order() {
        let mut session = SessionState::new();
        session.set_parameter("myvar", "17");
        assert_eq!(show_value("server_encoding", &session, "14.9"), "UTF8");
        assert_eq!(show_value("myvar", &session, "14.9"), "17");
        assert_eq!(show_value("missing", &session, "14.9"), "unknown");
        assert_eq!(show_value("server_version", &session, "14.9"), "14.9");
    }
}
