//! Crate-wide error types.
//!
//! Each subsystem gets its own `thiserror` enum; [`Error`] wraps them so a
//! single `?` chain carries all the way up to the protocol state machine,
//! which is the only place SQLSTATE codes get attached to a wire response.

use std::io;

/// Top-level error type threaded through the whole server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("shutting down")]
    ShuttingDown,
}

/// Errors from the frame codec (§4.1).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame length {0} exceeds configured maximum {1}")]
    FrameTooLarge(usize, usize),
    #[error("string is not nul-terminated")]
    UnterminatedString,
    #[error("key/value parameter list has an odd number of entries")]
    UnevenParams,
    #[error("invalid UTF-8 in protocol string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors from [`crate::session::Session`] transactional operations (§4.2).
///
/// Every variant carries its SQLSTATE via [`SessionError::sqlstate`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("already in a transaction")]
    AlreadyInTransaction,
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    InFailedTransaction,
    #[error("there is no transaction in progress")]
    NoActiveTransaction,
    #[error("savepoint {0:?} does not exist")]
    UndefinedSavepoint(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("prepared statement {0:?} does not exist")]
    UndefinedPreparedStatement(String),
    #[error("portal {0:?} does not exist")]
    UndefinedPortal(String),
}

impl SessionError {
    /// SQLSTATE code for this error, per spec.md §7's error taxonomy.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SessionError::AlreadyInTransaction => "25001",
            SessionError::InFailedTransaction => "25P02",
            SessionError::NoActiveTransaction => "25P01",
            SessionError::UndefinedSavepoint(_) => "3B001",
            SessionError::Syntax(_) => "42601",
            SessionError::UndefinedPreparedStatement(_) => "26000",
            SessionError::UndefinedPortal(_) => "34000",
        }
    }
}

/// Errors surfaced while classifying or executing a SQL statement (§4.4).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("syntax error at or near {0:?}")]
    Syntax(String),
    #[error("relation {0:?} does not exist")]
    UndefinedTable(String),
    #[error("column {0:?} does not exist")]
    UndefinedColumn(String),
    #[error("function {0:?} does not exist")]
    UndefinedFunction(String),
    #[error("{0} is not supported")]
    NotSupported(String),
}

impl DispatchError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            DispatchError::Session(e) => e.sqlstate(),
            DispatchError::Notify(e) => e.sqlstate(),
            DispatchError::Syntax(_) => "42601",
            DispatchError::UndefinedTable(_) => "42P01",
            DispatchError::UndefinedColumn(_) => "42703",
            DispatchError::UndefinedFunction(_) => "42883",
            DispatchError::NotSupported(_) => "0A000",
        }
    }
}

/// Errors from the [`crate::notify`] hub (§4.3).
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid channel name {0:?}")]
    InvalidChannelName(String),
    #[error("payload exceeds maximum length of {0} bytes")]
    PayloadTooLarge(usize),
    #[error("maximum number of channels ({0}) reached")]
    TooManyChannels(usize),
    #[error("maximum number of listeners ({0}) reached for channel {1:?}")]
    TooManyListeners(usize, String),
}

impl NotifyError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            NotifyError::InvalidChannelName(_) => "42601",
            NotifyError::PayloadTooLarge(_) => "22001",
            NotifyError::TooManyChannels(_) => "53400",
            NotifyError::TooManyListeners(_, _) => "53400",
        }
    }
}

/// Errors from the [`crate::pool`] (§4.6).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("timed out waiting for a connection")]
    Timeout,
    #[error("pool is shutting down")]
    ShuttingDown,
    #[error("pool already initialized")]
    AlreadyInitialized,
    #[error("connection {0} is not held by client {1}")]
    OwnershipMismatch(u64, u64),
}

/// Protocol-level violations (§4.5).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported startup protocol version {0}")]
    UnsupportedVersion(i32),
    #[error("unknown message type {0:?}")]
    UnknownMessageType(char),
    #[error("client is not in COPY mode")]
    NotInCopyMode,
    #[error("malformed startup message: {0}")]
    MalformedStartup(String),
}

impl ProtocolError {
    pub fn sqlstate(&self) -> &'static str {
        "08P01"
    }
}

/// Configuration loading/validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
