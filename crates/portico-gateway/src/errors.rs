//! Error classification for Portico Gateway
//!
//! Maps backend service errors to PostgreSQL SQLSTATE codes and builds the
//! structured payload for wire ErrorResponse messages.

/// PostgreSQL SQLSTATE error codes
/// See: https://www.postgresql.org/docs/current/errcodes-appendix.html
pub mod sqlstate {
    // Class 08 — Connection Exception
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const PROTOCOL_VIOLATION: &str = "08P01";

    // Class 22 — Data Exception
    pub const INVALID_PARAMETER_VALUE: &str = "22023";

    // Class 26 — Invalid SQL Statement Name
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";

    // Class 42 — Syntax Error or Access Rule Violation
    pub const SYNTAX_ERROR: &str = "42601";
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    pub const UNDEFINED_TABLE: &str = "42P01";

    // Class 53 — Insufficient Resources
    pub const TOO_MANY_CONNECTIONS: &str = "53300";

    // Class 57 — Operator Intervention
    pub const QUERY_CANCELED: &str = "57014";

    // Class XX — Internal Error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// A classified error carrying everything an ErrorResponse needs
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    /// PostgreSQL SQLSTATE code
    pub sqlstate: &'static str,
    /// ERROR or FATAL; FATAL tells the client to drop the connection
    pub severity: &'static str,
    /// Human-readable message
    pub message: String,
    /// Optional detail with more context
    pub detail: Option<String>,
    /// Optional hint for the user
    pub hint: Option<String>,
}

impl ClassifiedError {
    pub fn new(sqlstate: &'static str, message: impl Into<String>) -> Self {
        Self {
            sqlstate,
            severity: "ERROR",
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn fatal(sqlstate: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: "FATAL",
            ..Self::new(sqlstate, message)
        }
    }

    pub(crate) fn notice(message: &str) -> Self {
        Self {
            sqlstate: "00000",
            severity: "NOTICE",
            message: message.to_string(),
            detail: None,
            hint: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == "FATAL"
    }
}

/// Translate a backend service error name into a classified error.
///
/// The original message is carried as both message and detail; the hint is
/// derived from simple keyword matches on the message text.
pub fn classify_backend_error(code: &str, message: &str) -> ClassifiedError {
    let base = match code {
        "BadRequest" => ClassifiedError::new(sqlstate::SYNTAX_ERROR, message),
        "Forbidden" => ClassifiedError::new(sqlstate::INSUFFICIENT_PRIVILEGE, message),
        "ServiceUnavailable" => ClassifiedError::fatal(sqlstate::CONNECTION_FAILURE, message),
        "StatementTimeout" => ClassifiedError::new(sqlstate::QUERY_CANCELED, message),
        "ResourceNotFound" => ClassifiedError::new(sqlstate::UNDEFINED_TABLE, message),
        "Validation" => ClassifiedError::new(sqlstate::INVALID_PARAMETER_VALUE, message),
        "Throttling" => ClassifiedError::new(sqlstate::TOO_MANY_CONNECTIONS, message),
        _ => ClassifiedError::new(sqlstate::INTERNAL_ERROR, message),
    };

    let base = base.with_detail(message);
    match derive_hint(message) {
        Some(hint) => base.with_hint(hint),
        None => base,
    }
}

fn derive_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();

    if lower.contains("syntax") {
        return Some("Check SQL syntax. Use single quotes for strings, double quotes for identifiers.");
    }
    if lower.contains("does not exist") || lower.contains("not found") {
        return Some("Verify the object name and schema.");
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return Some("Add a LIMIT clause or use more selective filters.");
    }
    if lower.contains("permission") || lower.contains("access denied") || lower.contains("denied") {
        return Some("Check the configured credentials and their grants.");
    }
    if lower.contains("throttl") || lower.contains("rate") {
        return Some("Reduce concurrent requests and retry with backoff.");
    }
    if lower.contains("connect") || lower.contains("unavailable") {
        return Some("The backend service is unreachable. Retry shortly.");
    }
    None
}
