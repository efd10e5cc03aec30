//! Per-connection session state
//!
//! Parameters set by the client, prepared statements remembered by name,
//! and the transaction flag. Owned exclusively by one connection; never
//! shared.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A statement remembered from an extended-protocol Parse message
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct SessionState {
    parameters: HashMap<String, String>,
    prepared: HashMap<String, PreparedStatement>,
    in_transaction: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session parameter; names are lower-cased on write
    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) {
        self.parameters.insert(name.to_lowercase(), value.into());
    }

    pub fn get_parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    pub fn put_prepared_statement(&mut self, name: &str, sql: impl Into<String>) {
        self.prepared.insert(
            name.to_string(),
            PreparedStatement {
                sql: sql.into(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn get_prepared_statement(&self, name: &str) -> Option<&PreparedStatement> {
        self.prepared.get(name)
    }

    pub fn delete_prepared_statement(&mut self, name: &str) {
        self.prepared.remove(name);
    }

    pub fn mark_transaction_begin(&mut self) {
        self.in_transaction = true;
    }

    pub fn mark_transaction_end(&mut self) {
        self.in_transaction = false;
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Structural copy for introspection (health surface, logging)
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            parameters: self.parameters.clone(),
            prepared_statements: self.prepared.keys().cloned().collect(),
            in_transaction: self.in_transaction,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub parameters: HashMap<String, String>,
    pub prepared_statements: Vec<String>,
    pub in_transaction: bool,
}
