//! Frame reading/writing (spec.md §4.1).
//!
//! A typed frame on the wire is `[type: u8][len: i32 BE][payload]`, where
//! `len` counts itself but not the type byte. An untyped (startup-phase)
//! frame omits the type byte: `[len: i32 BE][payload]`.
//!
//! [`read_typed_frame`] and [`read_untyped_frame`] implement the
//! incomplete-input contract from spec.md §4.1 and §8 invariant 1: given
//! fewer bytes than a full frame, they consume nothing and report
//! [`ReadOutcome::Incomplete`] so the caller can wait for more bytes from the
//! socket without losing any already-buffered data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::CodecError;

/// Result of attempting to read one frame from a buffer.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete frame was parsed; `consumed` bytes should be dropped from
    /// the front of the buffer.
    Complete {
        msg_type: Option<u8>,
        payload: Bytes,
        consumed: usize,
    },
    /// Not enough bytes buffered yet; zero bytes were consumed.
    Incomplete,
}

/// Read one typed frame (used for every message after the startup phase).
pub fn read_typed_frame(buf: &[u8], max_len: usize) -> Result<ReadOutcome, CodecError> {
    if buf.len() < 5 {
        return Ok(ReadOutcome::Incomplete);
    }
    let msg_type = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len < 4 {
        return Err(CodecError::FrameTooLarge(len, max_len));
    }
    if len > max_len {
        return Err(CodecError::FrameTooLarge(len, max_len));
    }
    let total = 1 + len;
    if buf.len() < total {
        return Ok(ReadOutcome::Incomplete);
    }
    let payload = Bytes::copy_from_slice(&buf[5..total]);
    Ok(ReadOutcome::Complete {
        msg_type: Some(msg_type),
        payload,
        consumed: total,
    })
}

/// Read one untyped (startup-phase) frame.
pub fn read_untyped_frame(buf: &[u8], max_len: usize) -> Result<ReadOutcome, CodecError> {
    if buf.len() < 4 {
        return Ok(ReadOutcome::Incomplete);
    }
    let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len < 4 || len > max_len {
        return Err(CodecError::FrameTooLarge(len, max_len));
    }
    if buf.len() < len {
        return Ok(ReadOutcome::Incomplete);
    }
    let payload = Bytes::copy_from_slice(&buf[4..len]);
    Ok(ReadOutcome::Complete {
        msg_type: None,
        payload,
        consumed: len,
    })
}

/// Write one frame: `[type?][len BE][payload]`.
pub fn write_frame(msg_type: Option<u8>, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 5);
    if let Some(t) = msg_type {
        out.put_u8(t);
    }
    out.put_i32(payload.len() as i32 + 4);
    out.put_slice(payload);
    out
}

/// Read one null-terminated UTF-8 string starting at the cursor, advancing
/// past the terminator.
pub fn get_cstring(buf: &mut Bytes) -> Result<String, CodecError> {
    let mut raw = Vec::new();
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::UnterminatedString);
        }
        let b = buf.get_u8();
        if b == 0 {
            break;
        }
        raw.push(b);
    }
    Ok(std::str::from_utf8(&raw)?.to_string())
}

/// Write a string followed by a NUL terminator.
pub fn put_cstring(out: &mut BytesMut, s: &str) {
    out.put_slice(s.as_bytes());
    out.put_u8(0);
}

/// Parse a sequence of cstring key/value pairs terminated by an empty key
/// (a lone NUL byte), as used in the startup message (spec.md §4.1, §4.5).
pub fn parse_key_value_params(mut buf: Bytes) -> Result<Vec<(String, String)>, CodecError> {
    let mut pairs = Vec::new();
    loop {
        if !buf.has_remaining() {
            break;
        }
        let key = get_cstring(&mut buf)?;
        if key.is_empty() {
            break;
        }
        let value = get_cstring(&mut buf)?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Format the `CommandComplete` tag for a finished command (spec.md §4.1).
pub fn format_command_tag(command: &str, row_count: u64) -> String {
    let upper = command.to_ascii_uppercase();
    match upper.as_str() {
        "INSERT" => format!("INSERT 0 {row_count}"),
        "UPDATE" | "DELETE" | "SELECT" | "MOVE" | "FETCH" | "COPY" => {
            format!("{upper} {row_count}")
        }
        _ => upper,
    }
}

/// One field of an `ErrorResponse`/`NoticeResponse` body (spec.md §4.1, §7).
#[derive(Debug, Clone)]
pub struct ErrorField {
    pub code: u8,
    pub value: String,
}

impl ErrorField {
    pub fn new(code: u8, value: impl Into<String>) -> Self {
        ErrorField {
            code,
            value: value.into(),
        }
    }
}

/// Encode a sequence of error/notice fields, terminated by a zero byte.
pub fn format_error_fields(fields: &[ErrorField]) -> BytesMut {
    let mut out = BytesMut::new();
    for field in fields {
        out.put_u8(field.code);
        put_cstring(&mut out, &field.value);
    }
    out.put_u8(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_typed_frame_consumes_nothing() {
        let buf = [b'Q', 0, 0, 0];
        let result = read_typed_frame(&buf, 1024).unwrap();
        assert!(matches!(result, ReadOutcome::Incomplete));
    }

    #[test]
    fn round_trip_typed_frame() {
        let original = write_frame(Some(b'Q'), b"SELECT 1\0");
        let result = read_typed_frame(&original, 1024).unwrap();
        match result {
            ReadOutcome::Complete {
                msg_type,
                payload,
                consumed,
            } => {
                assert_eq!(msg_type, Some(b'Q'));
                assert_eq!(&payload[..], b"SELECT 1\0");
                assert_eq!(consumed, original.len());
                let rebuilt = write_frame(msg_type, &payload);
                assert_eq!(rebuilt, original);
            }
            ReadOutcome::Incomplete => panic!("expected complete frame"),
        }
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let buf = write_frame(Some(b'Q'), &vec![0u8; 64]);
        let err = read_typed_frame(&buf, 16).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge(_, _)));
    }

    #[test]
    fn key_value_params_round_trip() {
        let mut raw = BytesMut::new();
        put_cstring(&mut raw, "user");
        put_cstring(&mut raw, "postgres");
        put_cstring(&mut raw, "database");
        put_cstring(&mut raw, "postgres");
        raw.put_u8(0);
        let parsed = parse_key_value_params(raw.freeze()).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("user".to_string(), "postgres".to_string()),
                ("database".to_string(), "postgres".to_string()),
            ]
        );
    }

    #[test]
    fn command_tag_formatting() {
        assert_eq!(format_command_tag("INSERT", 3), "INSERT 0 3");
        assert_eq!(format_command_tag("SELECT", 5), "SELECT 5");
        assert_eq!(format_command_tag("UPDATE", 2), "UPDATE 2");
        assert_eq!(format_command_tag("BEGIN", 0), "BEGIN");
    }
}
