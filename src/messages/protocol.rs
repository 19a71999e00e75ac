//! Backend message builders (spec.md §4.1, §6).
//!
//! Every function here returns a complete, ready-to-write frame. None of
//! them touch a socket directly; the protocol state machine in
//! [`crate::protocol`] owns the actual `AsyncWrite` calls so it can batch
//! several messages into one `write_all`.

use bytes::{BufMut, BytesMut};

use super::codec::{format_error_fields, put_cstring, write_frame, ErrorField};
use super::types::DataType;

/// `AuthenticationOk` ('R' with sub-code 0): spec.md treats every client as
/// pre-authenticated.
pub fn authentication_ok() -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i32(0);
    write_frame(Some(b'R'), &body)
}

/// `ParameterStatus` ('S'), one per reported server parameter.
pub fn parameter_status(key: &str, value: &str) -> BytesMut {
    let mut body = BytesMut::new();
    put_cstring(&mut body, key);
    put_cstring(&mut body, value);
    write_frame(Some(b'S'), &body)
}

/// `BackendKeyData` ('K'), carrying the pid/secret pair used by `CancelRequest`.
pub fn backend_key_data(pid: i32, secret: i32) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i32(pid);
    body.put_i32(secret);
    write_frame(Some(b'K'), &body)
}

/// `ReadyForQuery` ('Z'); `status` is one of `I`/`T`/`E` (spec.md §4.2).
pub fn ready_for_query(status: u8) -> BytesMut {
    write_frame(Some(b'Z'), &[status])
}

/// One column descriptor for [`row_description`].
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub format_code: i16,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnDescriptor {
            name: name.into(),
            data_type,
            format_code: 0,
        }
    }
}

/// `RowDescription` ('T').
pub fn row_description(columns: &[ColumnDescriptor]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i16(columns.len() as i16);
    for col in columns {
        put_cstring(&mut body, &col.name);
        body.put_i32(0); // table OID: none, this row has no backing relation
        body.put_i16(0); // column attribute number: none
        body.put_i32(col.data_type.oid());
        body.put_i16(col.data_type.type_size());
        body.put_i32(-1); // type modifier
        body.put_i16(col.format_code);
    }
    write_frame(Some(b'T'), &body)
}

/// `DataRow` ('D'); `None` encodes SQL NULL as the `-1` length marker.
pub fn data_row(values: &[Option<String>]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(v) => {
                body.put_i32(v.len() as i32);
                body.put_slice(v.as_bytes());
            }
            None => body.put_i32(-1),
        }
    }
    write_frame(Some(b'D'), &body)
}

/// `CommandComplete` ('C').
pub fn command_complete(tag: &str) -> BytesMut {
    let mut body = BytesMut::new();
    put_cstring(&mut body, tag);
    write_frame(Some(b'C'), &body)
}

/// `EmptyQueryResponse` ('I'), sent for a query string with no statements.
pub fn empty_query_response() -> BytesMut {
    write_frame(Some(b'I'), &[])
}

/// `NotificationResponse` ('A'), delivered to every session listening on
/// `channel` (spec.md §4.3).
pub fn notification_response(backend_pid: i32, channel: &str, payload: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i32(backend_pid);
    put_cstring(&mut body, channel);
    put_cstring(&mut body, payload);
    write_frame(Some(b'A'), &body)
}

/// `ErrorResponse` ('E'); `fields` is typically built from
/// [`ErrorField::new`] with codes `S`/`C`/`M`/`D`/`H`/`P`.
pub fn error_response(fields: &[ErrorField]) -> BytesMut {
    write_frame(Some(b'E'), &format_error_fields(fields))
}

/// Convenience constructor for the common case: severity, SQLSTATE, message.
pub fn simple_error_response(severity: &str, sqlstate: &str, message: &str) -> BytesMut {
    let fields = [
        ErrorField::new(b'S', severity),
        ErrorField::new(b'V', severity),
        ErrorField::new(b'C', sqlstate),
        ErrorField::new(b'M', message),
    ];
    error_response(&fields)
}

/// `NoticeResponse` ('N'), used for non-fatal informational messages (e.g.
/// `DISCARD ALL`, `VACUUM`).
pub fn notice_response(message: &str) -> BytesMut {
    let fields = [
        ErrorField::new(b'S', "NOTICE"),
        ErrorField::new(b'V', "NOTICE"),
        ErrorField::new(b'C', "00000"),
        ErrorField::new(b'M', message),
    ];
    write_frame(Some(b'N'), &format_error_fields(&fields))
}

/// `ParseComplete` ('1').
pub fn parse_complete() -> BytesMut {
    write_frame(Some(b'1'), &[])
}

/// `BindComplete` ('2').
pub fn bind_complete() -> BytesMut {
    write_frame(Some(b'2'), &[])
}

/// `CloseComplete` ('3').
pub fn close_complete() -> BytesMut {
    write_frame(Some(b'3'), &[])
}

/// `NoData` ('n'), sent instead of `RowDescription` when a `Describe` target
/// returns no rows.
pub fn no_data() -> BytesMut {
    write_frame(Some(b'n'), &[])
}

/// `ParameterDescription` ('t'), answering `Describe` for a prepared statement.
pub fn parameter_description(param_types: &[DataType]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i16(param_types.len() as i16);
    for t in param_types {
        body.put_i32(t.oid());
    }
    write_frame(Some(b't'), &body)
}

/// `PortalSuspended` ('s'), sent when `Execute`'s row-limit cuts a result
/// set short.
pub fn portal_suspended() -> BytesMut {
    write_frame(Some(b's'), &[])
}

/// `CopyInResponse` ('G') / `CopyOutResponse` ('H'); `overall_format` and
/// `column_formats` follow the same 0=text/1=binary convention as `DataRow`.
fn copy_response(msg_type: u8, overall_format: i16, column_formats: &[i16]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i8(overall_format as i8);
    body.put_i16(column_formats.len() as i16);
    for f in column_formats {
        body.put_i16(*f);
    }
    write_frame(Some(msg_type), &body)
}

pub fn copy_in_response(overall_format: i16, column_formats: &[i16]) -> BytesMut {
    copy_response(b'G', overall_format, column_formats)
}

pub fn copy_out_response(overall_format: i16, column_formats: &[i16]) -> BytesMut {
    copy_response(b'H', overall_format, column_formats)
}

/// `CopyData` ('d'), one chunk of a COPY stream.
pub fn copy_data(chunk: &[u8]) -> BytesMut {
    write_frame(Some(b'd'), chunk)
}

/// `CopyDone` ('c').
pub fn copy_done() -> BytesMut {
    write_frame(Some(b'c'), &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_for_query_is_five_bytes_total() {
        let msg = ready_for_query(b'I');
        assert_eq!(&msg[..], &[b'Z', 0, 0, 0, 5, b'I']);
    }

    #[test]
    fn row_description_then_data_row_round_trip_shape() {
        let cols = vec![
            ColumnDescriptor::new("id", DataType::Int4),
            ColumnDescriptor::new("name", DataType::Text),
        ];
        let desc = row_description(&cols);
        assert_eq!(desc[0], b'T');
        let row = data_row(&[Some("1".into()), None]);
        assert_eq!(row[0], b'D');
        let len_offset = 5 + 2 + 4;
        let null_len = i32::from_be_bytes(row[len_offset..len_offset + 4].try_into().unwrap());
        assert_eq!(null_len, -1);
    }

    #[test]
    fn command_complete_tag_is_nul_terminated() {
        let msg = command_complete("SELECT 3");
        assert_eq!(msg.last(), Some(&0));
    }

    #[test]
    fn error_response_carries_sqlstate_field() {
        let msg = simple_error_response("ERROR", "42601", "syntax error");
        let text = String::from_utf8_lossy(&msg);
        assert!(text.contains("42601"));
        assert!(text.contains("syntax error"));
    }
}
