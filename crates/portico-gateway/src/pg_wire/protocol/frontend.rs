//! Frontend (client → server) message decoding
//!
//! Frame extraction is total over any buffer prefix: a call either consumes
//! one complete frame and returns the typed message, or returns `None` and
//! leaves the buffer untouched so more bytes can be appended.

use bytes::{Buf, BytesMut};
use portico_common::{PorticoError, Result};
use std::collections::HashMap;

use super::codec::MessageReader;
use super::constants::{
    CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, MAX_MESSAGE_LENGTH, MAX_STARTUP_LENGTH,
    SSL_REQUEST_CODE,
};

/// Frontend protocol messages the gateway understands.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// Initial startup message (no type byte)
    Startup {
        version: i32,
        params: HashMap<String, String>,
    },
    /// SSL negotiation request (special 8-byte startup frame)
    SslRequest,
    /// GSSAPI encryption request (special 8-byte startup frame)
    GssEncRequest,
    /// Out-of-band cancel request for another backend
    CancelRequest { process_id: i32, secret_key: i32 },
    /// Password response during authentication ('p')
    Password(String),
    /// Simple query ('Q')
    Query(String),
    /// Parse ('P') — extended query
    Parse {
        name: String,
        sql: String,
        param_types: Vec<i32>,
    },
    /// Bind ('B') — extended query
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    /// Execute ('E')
    Execute { portal: String, max_rows: i32 },
    /// Describe ('D')
    Describe { kind: u8, name: String },
    /// Close ('C')
    Close { kind: u8, name: String },
    /// Sync ('S')
    Sync,
    /// Terminate ('X')
    Terminate,
    /// Anything else: carried so the caller can log and skip it
    Unknown(u8),
}

/// Extract the next startup-phase frame. Called while the connection is in
/// the startup state, where frames carry no type byte.
pub fn decode_startup(buf: &mut BytesMut) -> Result<Option<FrontendMessage>> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len < 8 || len as usize > MAX_STARTUP_LENGTH {
        return Err(PorticoError::Framing(format!(
            "invalid startup frame length {len}"
        )));
    }
    let len = len as usize;
    if buf.len() < len {
        return Ok(None);
    }

    let code = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    if len == 8 && code == SSL_REQUEST_CODE {
        buf.advance(8);
        return Ok(Some(FrontendMessage::SslRequest));
    }
    if len == 8 && code == GSSENC_REQUEST_CODE {
        buf.advance(8);
        return Ok(Some(FrontendMessage::GssEncRequest));
    }
    if code == CANCEL_REQUEST_CODE {
        let frame = buf.split_to(len);
        let mut r = MessageReader::new(&frame[8..]);
        let process_id = r.read_i32()?;
        let secret_key = r.read_i32()?;
        return Ok(Some(FrontendMessage::CancelRequest {
            process_id,
            secret_key,
        }));
    }

    if (code >> 16) != 3 {
        return Err(PorticoError::Framing(format!(
            "unsupported protocol code {code:#x}"
        )));
    }

    let frame = buf.split_to(len);
    let mut r = MessageReader::new(&frame[8..]);
    let mut params = HashMap::new();
    while r.remaining() > 0 {
        let key = r.read_cstr()?;
        if key.is_empty() {
            break;
        }
        let value = r.read_cstr()?;
        params.insert(key, value);
    }

    Ok(Some(FrontendMessage::Startup {
        version: code,
        params,
    }))
}

/// Extract the next typed frame: one type byte followed by a 32-bit length
/// that includes itself but not the type byte.
pub fn decode_message(buf: &mut BytesMut) -> Result<Option<FrontendMessage>> {
    if buf.len() < 5 {
        return Ok(None);
    }

    let msg_type = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 {
        return Err(PorticoError::Framing(format!(
            "message '{}' declares length {len}",
            msg_type as char
        )));
    }
    if len as usize > MAX_MESSAGE_LENGTH {
        return Err(PorticoError::Framing(format!(
            "message '{}' too large: {len} bytes",
            msg_type as char
        )));
    }
    if buf.len() < 1 + len as usize {
        return Ok(None);
    }

    let frame = buf.split_to(1 + len as usize);
    let body = &frame[5..];
    let mut r = MessageReader::new(body);

    let msg = match msg_type {
        b'Q' => FrontendMessage::Query(r.read_cstr()?),
        b'p' => FrontendMessage::Password(r.read_cstr()?),
        b'P' => {
            let name = r.read_cstr()?;
            let sql = r.read_cstr()?;
            let count = r.read_i16()?.max(0);
            let mut param_types = Vec::with_capacity(count as usize);
            for _ in 0..count {
                param_types.push(r.read_i32()?);
            }
            FrontendMessage::Parse {
                name,
                sql,
                param_types,
            }
        }
        b'B' => decode_bind(&mut r)?,
        b'E' => {
            let portal = r.read_cstr()?;
            let max_rows = r.read_i32()?;
            FrontendMessage::Execute { portal, max_rows }
        }
        b'D' => {
            let kind = r.read_u8()?;
            let name = r.read_cstr()?;
            FrontendMessage::Describe { kind, name }
        }
        b'C' => {
            let kind = r.read_u8()?;
            let name = r.read_cstr()?;
            FrontendMessage::Close { kind, name }
        }
        b'S' => FrontendMessage::Sync,
        b'X' => FrontendMessage::Terminate,
        other => FrontendMessage::Unknown(other),
    };

    Ok(Some(msg))
}

fn decode_bind(r: &mut MessageReader<'_>) -> Result<FrontendMessage> {
    let portal = r.read_cstr()?;
    let statement = r.read_cstr()?;

    let format_count = r.read_i16()?.max(0);
    let mut param_formats = Vec::with_capacity(format_count as usize);
    for _ in 0..format_count {
        param_formats.push(r.read_i16()?);
    }

    let value_count = r.read_i16()?.max(0);
    let mut param_values = Vec::with_capacity(value_count as usize);
    for _ in 0..value_count {
        let vlen = r.read_i32()?;
        if vlen < 0 {
            param_values.push(None);
        } else {
            param_values.push(Some(r.read_bytes(vlen as usize)?.to_vec()));
        }
    }

    let result_count = r.read_i16()?.max(0);
    let mut result_formats = Vec::with_capacity(result_count as usize);
    for _ in 0..result_count {
        result_formats.push(r.read_i16()?);
    }

    Ok(FrontendMessage::Bind {
        portal,
        statement,
        param_formats,
        param_values,
        result_formats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn startup_bytes(params: &[(&str, &str)]) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_i32(super::super::constants::PROTOCOL_VERSION_3);
        for (k, v) in params {
            body.put_slice(k.as_bytes());
            body.put_u8(0);
            body.put_slice(v.as_bytes());
            body.put_u8(0);
        }
        body.put_u8(0);
        let mut buf = BytesMut::new();
        buf.put_i32(4 + body.len() as i32);
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn test_startup_needs_more_data() {
        let full = startup_bytes(&[("user", "alice")]);
        for cut in [0, 3, 7, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(decode_startup(&mut partial).unwrap().is_none());
            // Buffer not advanced
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn test_startup_parses_params() {
        let mut buf = startup_bytes(&[("user", "alice"), ("database", "db")]);
        match decode_startup(&mut buf).unwrap().unwrap() {
            FrontendMessage::Startup { version, params } => {
                assert_eq!(version, 196608);
                assert_eq!(params["user"], "alice");
                assert_eq!(params["database"], "db");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_startup_length_seven_fails() {
        let mut buf = BytesMut::new();
        buf.put_i32(7);
        buf.put_i32(196608);
        assert!(decode_startup(&mut buf).is_err());
    }

    #[test]
    fn test_ssl_request_consumes_eight_bytes() {
        let mut buf = BytesMut::new();
        buf.put_i32(8);
        buf.put_i32(SSL_REQUEST_CODE);
        // Startup message bundled in the same segment
        buf.extend_from_slice(&startup_bytes(&[("user", "alice")]));

        assert_eq!(
            decode_startup(&mut buf).unwrap(),
            Some(FrontendMessage::SslRequest)
        );
        // The bundled startup message survives intact
        assert!(matches!(
            decode_startup(&mut buf).unwrap(),
            Some(FrontendMessage::Startup { .. })
        ));
    }

    #[test]
    fn test_cancel_request() {
        let mut buf = BytesMut::new();
        buf.put_i32(16);
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(4242);
        buf.put_i32(-7);
        assert_eq!(
            decode_startup(&mut buf).unwrap(),
            Some(FrontendMessage::CancelRequest {
                process_id: 4242,
                secret_key: -7
            })
        );
    }

    #[test]
    fn test_typed_length_below_four_is_framing_error() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(3);
        assert!(decode_message(&mut buf).is_err());
    }

    #[test]
    fn test_query_round_trip() {
        let sql = "SELECT 1";
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(4 + sql.len() as i32 + 1);
        buf.put_slice(sql.as_bytes());
        buf.put_u8(0);
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Query(sql.into()))
        );
    }

    #[test]
    fn test_partial_typed_message() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(100);
        buf.put_slice(b"SELECT");
        assert!(decode_message(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn test_parse_message() {
        let mut buf = BytesMut::new();
        let body_len = 4 + 2 + 9 + 2 + 4;
        buf.put_u8(b'P');
        buf.put_i32(body_len);
        buf.put_slice(b"s\0");
        buf.put_slice(b"SELECT 1\0");
        buf.put_i16(1);
        buf.put_i32(23);
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Parse {
                name: "s".into(),
                sql: "SELECT 1".into(),
                param_types: vec![23],
            })
        );
    }

    #[test]
    fn test_bind_with_null_parameter() {
        let mut body = BytesMut::new();
        body.put_slice(b"\0");  // portal
        body.put_slice(b"s\0"); // statement
        body.put_i16(0);        // param formats
        body.put_i16(2);        // param values
        body.put_i32(-1);       // NULL
        body.put_i32(2);
        body.put_slice(b"42");
        body.put_i16(0); // result formats

        let mut buf = BytesMut::new();
        buf.put_u8(b'B');
        buf.put_i32(4 + body.len() as i32);
        buf.extend_from_slice(&body);

        match decode_message(&mut buf).unwrap().unwrap() {
            FrontendMessage::Bind {
                statement,
                param_values,
                ..
            } => {
                assert_eq!(statement, "s");
                assert_eq!(param_values, vec![None, Some(b"42".to_vec())]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_execute_describe_close_sync_terminate() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'E');
        buf.put_i32(4 + 1 + 4);
        buf.put_slice(b"\0");
        buf.put_i32(50);
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Execute {
                portal: String::new(),
                max_rows: 50
            })
        );

        let mut buf = BytesMut::new();
        buf.put_u8(b'D');
        buf.put_i32(4 + 1 + 2);
        buf.put_u8(b'S');
        buf.put_slice(b"s\0");
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Describe {
                kind: b'S',
                name: "s".into()
            })
        );

        let mut buf = BytesMut::new();
        buf.put_u8(b'C');
        buf.put_i32(4 + 1 + 2);
        buf.put_u8(b'P');
        buf.put_slice(b"p\0");
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Close {
                kind: b'P',
                name: "p".into()
            })
        );

        let mut buf = BytesMut::new();
        buf.put_u8(b'S');
        buf.put_i32(4);
        assert_eq!(decode_message(&mut buf).unwrap(), Some(FrontendMessage::Sync));

        let mut buf = BytesMut::new();
        buf.put_u8(b'X');
        buf.put_i32(4);
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Terminate)
        );
    }

    #[test]
    fn test_unknown_type_is_skipped_not_fatal() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'F');
        buf.put_i32(4 + 3);
        buf.put_slice(b"xyz");
        assert_eq!(
            decode_message(&mut buf).unwrap(),
            Some(FrontendMessage::Unknown(b'F'))
        );
        assert!(buf.is_empty());
    }
}
