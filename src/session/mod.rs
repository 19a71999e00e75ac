//! Per-connection authoritative state (spec.md §4.2, §3).
//!
//! A [`Session`] owns every piece of state that belongs to a single TCP
//! connection: startup parameters, transaction status and savepoint stack,
//! prepared statements and portals, the set of channels it listens on, and
//! COPY mode. Every mutating operation here enforces its precondition up
//! front and never partially mutates state on failure, matching the
//! teacher's exception-as-typed-error translation noted in the design notes.

mod transaction;

pub use transaction::{IsolationLevel, TransactionOptions, TransactionStatus};

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::errors::SessionError;

/// A named marker within a transaction (spec.md §3 "Session.savepoints").
#[derive(Debug, Clone)]
pub struct Savepoint {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A stored `Parse` target (spec.md §4.2, §4.5 message `P`).
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub sql: String,
    pub param_types: Vec<i32>,
}

/// A bound, executable instance of a [`PreparedStatement`] (spec.md GLOSSARY
/// "Portal").
#[derive(Debug, Clone)]
pub struct Portal {
    pub name: String,
    pub statement_name: String,
    pub param_formats: Vec<i16>,
    pub param_values: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<i16>,
}

/// Direction of an in-progress COPY (spec.md §3 "Session.copyState").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    In,
    Out,
}

/// Wire format of an in-progress COPY's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFormat {
    Text,
    Binary,
    Csv,
}

/// Active COPY sub-protocol state (spec.md §4.4 COPY handler, §4.5 COPY mode).
#[derive(Debug, Clone)]
pub struct CopyState {
    pub direction: CopyDirection,
    pub format: CopyFormat,
    pub table: String,
    pub columns: Vec<String>,
}

/// Per-connection authoritative state (spec.md §3 "Session").
pub struct Session {
    pub connection_id: u64,
    pub authenticated: bool,
    pub protocol_version: i32,
    pub parameters: HashMap<String, String>,
    pub backend_pid: i32,
    pub backend_secret: i32,

    pub transaction_status: TransactionStatus,
    pub isolation_level: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
    pub transaction_started_at: Option<DateTime<Utc>>,
    pub transaction_depth: u32,
    pub savepoints: Vec<Savepoint>,

    pub prepared_statements: HashMap<String, PreparedStatement>,
    pub portals: HashMap<String, Portal>,
    pub listening_channels: std::collections::BTreeSet<String>,
    pub copy_state: Option<CopyState>,

    /// Outbound push channel for asynchronous frames (currently only
    /// `NotificationResponse`) that did not originate from this session's own
    /// request/response exchange. The protocol task drains the paired
    /// receiver alongside socket reads so the Notification Hub never writes
    /// to a socket directly (spec.md §5).
    pub notify_sender: mpsc::UnboundedSender<Bytes>,

    pub connected: bool,
    pub connection_time: Instant,
    pub last_activity_time: Instant,
}

impl Session {
    /// Construct a session together with the receiver half of its outbound
    /// push channel; the caller (the protocol state machine) owns the
    /// receiver for the lifetime of the connection.
    pub fn new_with_push_channel(
        connection_id: u64,
        backend_pid: i32,
        backend_secret: i32,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(connection_id, backend_pid, backend_secret, tx), rx)
    }

    pub fn new(
        connection_id: u64,
        backend_pid: i32,
        backend_secret: i32,
        notify_sender: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        let now = Instant::now();
        Session {
            connection_id,
            authenticated: false,
            protocol_version: 0,
            parameters: HashMap::new(),
            backend_pid,
            backend_secret,
            transaction_status: TransactionStatus::Idle,
            isolation_level: IsolationLevel::ReadCommitted,
            read_only: false,
            deferrable: false,
            transaction_started_at: None,
            transaction_depth: 0,
            savepoints: Vec::new(),
            prepared_statements: HashMap::new(),
            portals: HashMap::new(),
            listening_channels: std::collections::BTreeSet::new(),
            copy_state: None,
            notify_sender,
            connected: true,
            connection_time: now,
            last_activity_time: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_time = Instant::now();
    }

    pub fn is_in_copy_mode(&self) -> bool {
        self.copy_state.is_some()
    }

    // -- Transaction control (spec.md §4.2) --------------------------------

    pub fn begin_transaction(&mut self, opts: TransactionOptions) -> Result<(), SessionError> {
        match self.transaction_status {
            TransactionStatus::InTransaction => {
                self.transaction_depth += 1;
                return Err(SessionError::AlreadyInTransaction);
            }
            TransactionStatus::InFailedTransaction => return Err(SessionError::InFailedTransaction),
            TransactionStatus::Idle => {}
        }
        self.transaction_status = TransactionStatus::InTransaction;
        self.isolation_level = opts.isolation_level.unwrap_or(IsolationLevel::ReadCommitted);
        self.read_only = opts.read_only.unwrap_or(false);
        self.deferrable = opts.deferrable.unwrap_or(false);
        self.transaction_depth = 1;
        self.transaction_started_at = Some(Utc::now());
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<(), SessionError> {
        match self.transaction_status {
            TransactionStatus::Idle => Err(SessionError::NoActiveTransaction),
            TransactionStatus::InTransaction | TransactionStatus::InFailedTransaction => {
                self.savepoints.clear();
                self.isolation_level = IsolationLevel::ReadCommitted;
                self.read_only = false;
                self.deferrable = false;
                self.transaction_status = TransactionStatus::Idle;
                self.transaction_depth = 0;
                self.transaction_started_at = None;
                Ok(())
            }
        }
    }

    pub fn commit_transaction(&mut self) -> Result<(), SessionError> {
        self.end_transaction()
    }

    pub fn rollback_transaction(&mut self) -> Result<(), SessionError> {
        self.end_transaction()
    }

    /// Moves an in-progress transaction into the failed state, e.g. after a
    /// dispatcher error (spec.md §4.2 `failTransaction`, §7 propagation
    /// policy).
    pub fn fail_transaction(&mut self) -> Result<(), SessionError> {
        if self.transaction_status != TransactionStatus::InTransaction {
            return Err(SessionError::NoActiveTransaction);
        }
        self.transaction_status = TransactionStatus::InFailedTransaction;
        Ok(())
    }

    pub fn create_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        if self.transaction_status != TransactionStatus::InTransaction {
            return Err(SessionError::NoActiveTransaction);
        }
        self.savepoints.retain(|s| s.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        if matches!(self.transaction_status, TransactionStatus::Idle) {
            return Err(SessionError::NoActiveTransaction);
        }
        let pos = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SessionError::UndefinedSavepoint(name.to_string()))?;
        self.savepoints.truncate(pos + 1);
        if self.transaction_status == TransactionStatus::InFailedTransaction {
            self.transaction_status = TransactionStatus::InTransaction;
        }
        Ok(())
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<(), SessionError> {
        if self.transaction_status != TransactionStatus::InTransaction {
            return Err(SessionError::NoActiveTransaction);
        }
        let pos = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SessionError::UndefinedSavepoint(name.to_string()))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    // -- Prepared statements / portals --------------------------------------

    pub fn add_prepared_statement(&mut self, stmt: PreparedStatement) {
        self.prepared_statements.insert(stmt.name.clone(), stmt);
    }

    pub fn get_prepared_statement(&self, name: &str) -> Result<&PreparedStatement, SessionError> {
        self.prepared_statements
            .get(name)
            .ok_or_else(|| SessionError::UndefinedPreparedStatement(name.to_string()))
    }

    pub fn remove_prepared_statement(&mut self, name: &str) {
        self.prepared_statements.remove(name);
    }

    pub fn add_portal(&mut self, portal: Portal) {
        self.portals.insert(portal.name.clone(), portal);
    }

    pub fn get_portal(&self, name: &str) -> Result<&Portal, SessionError> {
        self.portals
            .get(name)
            .ok_or_else(|| SessionError::UndefinedPortal(name.to_string()))
    }

    pub fn remove_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    // -- Listening channels --------------------------------------------------

    pub fn add_listening_channel(&mut self, channel: &str) {
        self.listening_channels.insert(channel.to_ascii_lowercase());
    }

    pub fn remove_listening_channel(&mut self, channel: &str) {
        self.listening_channels.remove(&channel.to_ascii_lowercase());
    }

    pub fn clear_all_listening_channels(&mut self) {
        self.listening_channels.clear();
    }

    // -- Reuse (spec.md §4.2 `isReusable`/`resetForReuse`, §8 invariant 7) --

    pub fn is_reusable(&self) -> bool {
        self.authenticated
            && self.connected
            && self.transaction_status == TransactionStatus::Idle
            && self.prepared_statements.is_empty()
            && self.portals.is_empty()
            && self.listening_channels.is_empty()
    }

    pub fn reset_for_reuse(&mut self) {
        self.prepared_statements.clear();
        self.portals.clear();
        self.listening_channels.clear();
        self.isolation_level = IsolationLevel::ReadCommitted;
        self.read_only = false;
        self.deferrable = false;
        self.transaction_status = TransactionStatus::Idle;
        self.transaction_depth = 0;
        self.transaction_started_at = None;
        self.savepoints.clear();
        self.touch();
    }

    /// Swap in a fresh outbound push channel and return its receiver.
    ///
    /// The pool calls this whenever a session slot is handed to a new
    /// connection: the previous connection's protocol task owned the old
    /// receiver and is gone, so its sender would otherwise be a dead end.
    /// `reset_for_reuse` already clears `listening_channels`, so nothing in
    /// the Notification Hub still points at the stale sender by the time
    /// this runs.
    pub fn rewire_notify_channel(&mut self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_sender = tx;
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new_with_push_channel(1, 1000, 2000).0
    }

    #[test]
    fn nested_begin_is_rejected_and_increments_depth() {
        let mut s = session();
        s.begin_transaction(TransactionOptions::default()).unwrap();
        let err = s
            .begin_transaction(TransactionOptions::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyInTransaction));
        assert_eq!(s.transaction_status, TransactionStatus::InTransaction);
        assert_eq!(s.transaction_depth, 2);
    }

    #[test]
    fn rollback_to_savepoint_recovers_from_failed_transaction() {
        let mut s = session();
        s.begin_transaction(TransactionOptions::default()).unwrap();
        s.create_savepoint("sp1").unwrap();
        s.fail_transaction().unwrap();
        s.rollback_to_savepoint("sp1").unwrap();
        assert_eq!(s.transaction_status, TransactionStatus::InTransaction);
        assert_eq!(s.savepoints.len(), 1);
        s.commit_transaction().unwrap();
        assert_eq!(s.transaction_status, TransactionStatus::Idle);
        assert!(s.savepoints.is_empty());
        assert_eq!(s.isolation_level, IsolationLevel::ReadCommitted);
        assert!(!s.read_only);
    }

    #[test]
    fn rollback_to_savepoint_drops_later_savepoints() {
        let mut s = session();
        s.begin_transaction(TransactionOptions::default()).unwrap();
        s.create_savepoint("sp1").unwrap();
        s.create_savepoint("sp2").unwrap();
        s.rollback_to_savepoint("sp1").unwrap();
        assert_eq!(s.savepoints.len(), 1);
        assert_eq!(s.savepoints[0].name, "sp1");
    }

    #[test]
    fn undefined_savepoint_is_an_error() {
        let mut s = session();
        s.begin_transaction(TransactionOptions::default()).unwrap();
        let err = s.rollback_to_savepoint("missing").unwrap_err();
        assert!(matches!(err, SessionError::UndefinedSavepoint(_)));
    }

    #[test]
    fn commit_outside_transaction_is_an_error() {
        let mut s = session();
        let err = s.commit_transaction().unwrap_err();
        assert!(matches!(err, SessionError::NoActiveTransaction));
    }

    #[test]
    fn is_reusable_reflects_session_state() {
        let mut s = session();
        s.authenticated = true;
        assert!(s.is_reusable());
        s.add_listening_channel("events");
        assert!(!s.is_reusable());
        s.reset_for_reuse();
        assert!(s.is_reusable());
    }

    #[test]
    fn rewire_notify_channel_replaces_sender() {
        let mut s = session();
        let old_sender = s.notify_sender.clone();
        let mut rx = s.rewire_notify_channel();
        assert!(old_sender.send(Bytes::from_static(b"stale")).is_ok());
        s.notify_sender.send(Bytes::from_static(b"fresh")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"fresh"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn savepoint_name_reuse_replaces_prior_occurrence() {
        let mut s = session();
        s.begin_transaction(TransactionOptions::default()).unwrap();
        s.create_savepoint("sp1").unwrap();
        s.create_savepoint("sp2").unwrap();
        s.create_savepoint("sp1").unwrap();
        assert_eq!(s.savepoints.len(), 2);
        assert_eq!(s.savepoints.last().unwrap().name, "sp1");
    }
}
