//! PostgreSQL wire protocol frontend
//!
//! - `protocol` — framing, message codecs, type mapping
//! - `query` — statement classification and the catalog responder
//! - `session` — per-connection parameters and prepared statements
//! - `handler` — the protocol state machine
//! - `connection` — socket driver for one client
//! - `server` — listener, connection registry, statistics

pub mod connection;
pub mod handler;
pub mod protocol;
pub mod query;
pub mod server;
pub mod session;

pub use server::PgWireServer;
