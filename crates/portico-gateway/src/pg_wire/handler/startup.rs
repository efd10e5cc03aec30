//! Startup and authentication phases
//!
//! SSL/GSS negotiation is declined with a single 'N'; the cleartext
//! password exchange accepts any password, after which the session
//! parameters are advertised and the connection becomes ready.

use bytes::{BufMut, BytesMut};
use portico_common::{PorticoError, Result};
use tracing::{debug, info, warn};

use super::{ConnectionCore, ConnectionState, Flow};
use crate::pg_wire::protocol::backend::{
    write_authentication_cleartext_password, write_authentication_ok, write_backend_key_data,
    write_parameter_status, write_ready_for_query,
};
use crate::pg_wire::protocol::constants::TRANSACTION_STATUS_IDLE;
use crate::pg_wire::protocol::FrontendMessage;

pub(super) fn handle_startup_phase(
    core: &mut ConnectionCore,
    msg: FrontendMessage,
    out: &mut BytesMut,
) -> Result<Flow> {
    match msg {
        FrontendMessage::SslRequest => {
            debug!(connection_id = core.id, "SSL negotiation requested, declining");
            out.put_u8(b'N');
            Ok(Flow::Continue)
        }
        FrontendMessage::GssEncRequest => {
            debug!(connection_id = core.id, "GSSAPI negotiation requested, declining");
            out.put_u8(b'N');
            Ok(Flow::Continue)
        }
        FrontendMessage::CancelRequest { process_id, .. } => {
            warn!(
                connection_id = core.id,
                backend_pid = process_id,
                "CancelRequest received; query cancellation is not implemented"
            );
            Ok(Flow::Terminate)
        }
        FrontendMessage::Startup { version, params } => {
            let user = params.get("user").cloned().unwrap_or_default();
            let database = params.get("database").cloned().unwrap_or_default();
            info!(
                connection_id = core.id,
                protocol = version,
                user = %user,
                database = %database,
                "client startup"
            );
            core.startup_params = params;
            write_authentication_cleartext_password(out);
            core.state = ConnectionState::Authentication;
            Ok(Flow::Continue)
        }
        other => Err(PorticoError::Protocol(format!(
            "unexpected message in startup state: {other:?}"
        ))),
    }
}

pub(super) fn handle_auth_phase(
    core: &mut ConnectionCore,
    msg: FrontendMessage,
    out: &mut BytesMut,
) -> Result<Flow> {
    match msg {
        FrontendMessage::Password(_) => {
            // The backend service owns real authorization; any password is
            // accepted here.
            let user = core
                .startup_params
                .get("user")
                .cloned()
                .unwrap_or_else(|| "postgres".to_string());
            info!(connection_id = core.id, user = %user, "authentication completed");

            write_authentication_ok(out);

            let pid = std::process::id() as i32;
            let secret = pid
                .wrapping_mul(1103515245)
                .wrapping_add(core.id as i32);
            write_backend_key_data(out, pid, secret);

            let application_name = core
                .startup_params
                .get("application_name")
                .cloned()
                .unwrap_or_default();
            for (name, value) in [
                ("server_version", core.config.server_version.as_str()),
                ("server_encoding", "UTF8"),
                ("client_encoding", "UTF8"),
                ("application_name", application_name.as_str()),
                ("is_superuser", "off"),
                ("session_authorization", user.as_str()),
                ("DateStyle", "ISO, MDY"),
                ("IntervalStyle", "postgres"),
                ("TimeZone", "UTC"),
                ("integer_datetimes", "on"),
                ("standard_conforming_strings", "on"),
            ] {
                write_parameter_status(out, name, value);
            }

            write_ready_for_query(out, TRANSACTION_STATUS_IDLE);
            core.state = ConnectionState::Ready;
            Ok(Flow::Continue)
        }
        other => Err(PorticoError::Protocol(format!(
            "unexpected message in authentication state: {other:?}"
        ))),
    }
}
