//! Startup-phase frame parsing (spec.md §4.1, §4.5).
//!
//! The very first frame a client sends has no type byte. Its payload is
//! either a 4-byte magic code (`SSLRequest`/`CancelRequest`) or a protocol
//! version followed by null-terminated key/value parameters
//! (`StartupMessage`).

use bytes::{Buf, Bytes};

use crate::errors::ProtocolError;

use super::codec::parse_key_value_params;
use super::constants::{CANCEL_REQUEST_CODE, SSL_REQUEST_CODE};

/// The parsed meaning of a startup-phase frame.
#[derive(Debug, Clone)]
pub enum StartupFrame {
    SslRequest,
    CancelRequest { backend_pid: i32, secret_key: i32 },
    Startup {
        protocol_version: i32,
        params: Vec<(String, String)>,
    },
}

/// Parse the payload of an untyped startup-phase frame (as produced by
/// [`super::codec::read_untyped_frame`]).
pub fn parse_startup_frame(mut payload: Bytes) -> Result<StartupFrame, ProtocolError> {
    if payload.remaining() < 4 {
        return Err(ProtocolError::MalformedStartup(
            "frame shorter than the protocol code field".to_string(),
        ));
    }
    let code = payload.get_i32();
    match code {
        SSL_REQUEST_CODE => Ok(StartupFrame::SslRequest),
        CANCEL_REQUEST_CODE => {
            if payload.remaining() < 8 {
                return Err(ProtocolError::MalformedStartup(
                    "CancelRequest missing pid/secret".to_string(),
                ));
            }
            Ok(StartupFrame::CancelRequest {
                backend_pid: payload.get_i32(),
                secret_key: payload.get_i32(),
            })
        }
        version => {
            let params = parse_key_value_params(payload)
                .map_err(|e| ProtocolError::MalformedStartup(e.to_string()))?;
            Ok(StartupFrame::Startup {
                protocol_version: version,
                params,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn recognizes_ssl_request() {
        let mut buf = BytesMut::new();
        buf.put_i32(SSL_REQUEST_CODE);
        let parsed = parse_startup_frame(buf.freeze()).unwrap();
        assert!(matches!(parsed, StartupFrame::SslRequest));
    }

    #[test]
    fn recognizes_cancel_request() {
        let mut buf = BytesMut::new();
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(4242);
        buf.put_i32(99);
        let parsed = parse_startup_frame(buf.freeze()).unwrap();
        match parsed {
            StartupFrame::CancelRequest {
                backend_pid,
                secret_key,
            } => {
                assert_eq!(backend_pid, 4242);
                assert_eq!(secret_key, 99);
            }
            _ => panic!("expected CancelRequest"),
        }
    }

    #[test]
    fn parses_startup_message_params() {
        let mut buf = BytesMut::new();
        buf.put_i32(196_608);
        buf.put_slice(b"user\0postgres\0database\0postgres\0\0");
        let parsed = parse_startup_frame(buf.freeze()).unwrap();
        match parsed {
            StartupFrame::Startup {
                protocol_version,
                params,
            } => {
                assert_eq!(protocol_version, 196_608);
                assert!(params.contains(&("user".to_string(), "postgres".to_string())));
            }
            _ => panic!("expected Startup"),
        }
    }
}
