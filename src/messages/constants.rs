//! Wire-protocol magic numbers (spec.md §6).

/// Protocol version 3.0, the only version this server accepts.
pub const PROTOCOL_VERSION_3: i32 = 196_608;

/// `SSLRequest` magic code (`04 D2 16 2F`).
pub const SSL_REQUEST_CODE: i32 = 80_877_103;

/// `CancelRequest` magic code (`04 D2 16 2E`).
pub const CANCEL_REQUEST_CODE: i32 = 80_877_102;

/// Default ceiling on a simple-query frame's payload length.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default ceiling on a `CopyData` frame's payload length.
pub const DEFAULT_MAX_COPY_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
