//! PostgreSQL wire protocol constants
//!
//! Startup codes, transaction status bytes and protocol limits.

/// Protocol version 3.0, as sent in the startup message
pub const PROTOCOL_VERSION_3: i32 = 196608;

/// Magic code of the SSLRequest startup frame (0x04D2162F)
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic code of the GSSENCRequest startup frame
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Magic code of the CancelRequest startup frame
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Transaction status: Idle (not in a transaction)
pub const TRANSACTION_STATUS_IDLE: u8 = b'I';

/// Transaction status: In a transaction block
pub const TRANSACTION_STATUS_IN_TRANSACTION: u8 = b'T';

/// Transaction status: In a failed transaction block
#[allow(dead_code)]
pub const TRANSACTION_STATUS_FAILED: u8 = b'E';

/// Upper bound on a startup frame; anything larger is a framing error
pub const MAX_STARTUP_LENGTH: usize = 10_000;

/// Upper bound on a typed frame body (16 MB)
pub const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;
