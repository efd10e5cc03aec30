//! PostgreSQL wire protocol: framing, message codecs, type mapping.

pub mod backend;
pub mod codec;
pub mod constants;
pub mod frontend;
pub mod types;

pub use backend::{ColumnInfo, QueryResponse};
pub use codec::Scalar;
pub use frontend::FrontendMessage;
