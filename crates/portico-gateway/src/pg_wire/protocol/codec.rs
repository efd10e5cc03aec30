//! Low-level wire codec
//!
//! Growable big-endian writer and bounds-checked reader over byte buffers,
//! plus text-format value rendering for DataRow columns.

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDate, NaiveDateTime};
use portico_common::{PorticoError, Result};

/// A runtime scalar value as produced by backend-response normalization.
///
/// NULL is carried explicitly; the framing layer encodes it as length -1.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

/// Growable writer over a byte buffer with the primitives every protocol
/// message is assembled from.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_i16(&mut self, v: i16) -> &mut Self {
        self.buf.put_i16(v);
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32(v);
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// UTF-8 string followed by a NUL byte
    pub fn put_cstr(&mut self, v: &str) -> &mut Self {
        self.buf.put_slice(v.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// 32-bit length prefix followed by the UTF-8 bytes
    pub fn put_len_str(&mut self, v: &str) -> &mut Self {
        self.buf.put_i32(v.len() as i32);
        self.buf.put_slice(v.as_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// Bounds-checked reader over a byte slice. Reading past the end is a
/// framing error, never a panic.
#[derive(Debug)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Look at the unread bytes without consuming them
    pub fn peek(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(PorticoError::Framing(format!(
                "message truncated: needed {} bytes, {} remain",
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// UTF-8 string up to (and consuming) the next NUL byte
    pub fn read_cstr(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| PorticoError::Framing("unterminated C string".into()))?;
        let s = String::from_utf8(rest[..end].to_vec())
            .map_err(|e| PorticoError::Framing(format!("invalid UTF-8 in C string: {e}")))?;
        self.pos += end + 1;
        Ok(s)
    }

    /// 32-bit length prefix followed by UTF-8 bytes
    pub fn read_len_str(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(PorticoError::Framing(format!(
                "negative string length {len}"
            )));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| PorticoError::Framing(format!("invalid UTF-8 in string: {e}")))
    }
}

/// Render a scalar to the PostgreSQL text format for the given column type.
///
/// Returns `None` for NULL, which the framing layer encodes as length -1.
pub fn format_value(value: &Scalar, type_name: &str) -> Option<String> {
    let ty = type_name.to_lowercase();
    match value {
        Scalar::Null => None,
        Scalar::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
        Scalar::Int(i) => match ty.as_str() {
            "bool" | "boolean" => Some(if *i != 0 { "t" } else { "f" }.to_string()),
            _ => Some(i.to_string()),
        },
        Scalar::Float(f) => Some(f.to_string()),
        Scalar::Json(v) => Some(v.to_string()),
        Scalar::Bytes(b) => Some(format_bytea(b)),
        Scalar::Text(s) => Some(format_text(s, &ty)),
    }
}

fn format_text(s: &str, ty: &str) -> String {
    match ty {
        "bool" | "boolean" => {
            let truthy = matches!(s, "t" | "true" | "TRUE" | "on" | "1");
            (if truthy { "t" } else { "f" }).to_string()
        }
        "date" => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
            })
            .unwrap_or_else(|_| s.to_string()),
        "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" => parse_timestamp(s)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| s.to_string()),
        // Already-string JSON passes through unchanged
        _ => s.to_string(),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// PostgreSQL hex format for bytea values
fn format_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
