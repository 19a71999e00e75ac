//! Protocol state machine (spec.md §4.5): startup negotiation, the
//! authenticated message loop, and COPY sub-protocol handling for one TCP
//! connection.
//!
//! Every mutating operation on the leased [`Session`] happens on this
//! connection's own task; the only cross-task traffic is the
//! `NotificationResponse` frames drained from [`SessionLease::take_notify_receiver`]
//! and a best-effort `CancelRequest` signal from [`registry::REGISTRY`]
//! (spec.md §5: the state machine never holds a lock across a socket write).

pub mod registry;

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::dispatcher::{self, DispatchOutcome};
use crate::errors::{DispatchError, Error, ProtocolError};
use crate::messages::{
    authentication_ok, backend_key_data, bind_complete, close_complete, command_complete,
    copy_data, copy_done, copy_in_response, copy_out_response, empty_query_response,
    format_command_tag, no_data, parameter_description, parameter_status, parse_complete,
    portal_suspended, read_typed_frame, read_untyped_frame, ready_for_query, simple_error_response,
    startup::StartupFrame,
    types::DataType,
    ReadOutcome,
};
use crate::notify::NotificationHub;
use crate::pool::{Pool, SessionLease};
use crate::session::{Portal, PreparedStatement};
use crate::stats::Stats;

use registry::REGISTRY;

/// Everything a connection's task needs that outlives the lease itself.
pub struct ConnectionContext {
    pub pool: Pool,
    pub hub: &'static NotificationHub,
    pub config: Arc<Config>,
    pub stats: Arc<dyn Stats>,
}

/// Drive one accepted TCP connection end to end: startup negotiation,
/// authenticated message loop, cleanup. Returns once the client disconnects,
/// sends `Terminate`, or a protocol-level error forces the connection shut.
pub async fn run_connection(
    mut stream: TcpStream,
    client_id: u64,
    ctx: ConnectionContext,
) -> Result<(), Error> {
    let mut buf = BytesMut::new();
    let startup = loop {
        match read_startup_frame(&mut stream, &mut buf, ctx.config.server.max_message_size).await? {
            StartupFrame::SslRequest => {
                stream.write_all(b"N").await?;
                continue;
            }
            StartupFrame::CancelRequest {
                backend_pid,
                secret_key,
            } => {
                REGISTRY.try_cancel(backend_pid, secret_key);
                return Ok(());
            }
            frame @ StartupFrame::Startup { .. } => break frame,
        }
    };

    let (protocol_version, params) = match startup {
        StartupFrame::Startup {
            protocol_version,
            params,
        } => (protocol_version, params),
        _ => unreachable!("loop only breaks on Startup"),
    };

    if protocol_version != crate::messages::PROTOCOL_VERSION_3 {
        let err = ProtocolError::UnsupportedVersion(protocol_version);
        let msg = simple_error_response("FATAL", err.sqlstate(), &err.to_string());
        stream.write_all(&msg).await?;
        return Err(Error::Protocol(err));
    }

    let mut lease = ctx
        .pool
        .acquire(client_id, ctx.config.pool.acquisition_timeout_ms)
        .await?;
    lease.protocol_version = protocol_version;
    lease.authenticated = true;
    for (key, value) in &params {
        lease.parameters.insert(key.clone(), value.clone());
    }
    ctx.stats.connection_created();

    let cancel_handle = REGISTRY.register(lease.backend_pid, lease.backend_secret);

    let mut greeting = BytesMut::new();
    greeting.unsplit(authentication_ok());
    greeting.unsplit(parameter_status("server_version", "13.0 (Mock)"));
    greeting.unsplit(parameter_status("server_encoding", "UTF8"));
    greeting.unsplit(parameter_status("client_encoding", "UTF8"));
    greeting.unsplit(parameter_status(
        "application_name",
        lease
            .parameters
            .get("application_name")
            .map(String::as_str)
            .unwrap_or(""),
    ));
    greeting.unsplit(parameter_status(
        "session_authorization",
        lease
            .parameters
            .get("user")
            .map(String::as_str)
            .unwrap_or("postgres"),
    ));
    greeting.unsplit(parameter_status("DateStyle", "ISO, MDY"));
    greeting.unsplit(parameter_status("TimeZone", "UTC"));
    greeting.unsplit(backend_key_data(lease.backend_pid, lease.backend_secret));
    greeting.unsplit(ready_for_query(lease.transaction_status.status_byte()));
    stream.write_all(&greeting).await?;

    let mut notify_rx = lease.take_notify_receiver();
    let result = message_loop(
        &mut stream,
        &mut buf,
        &mut lease,
        &mut notify_rx,
        &cancel_handle,
        &ctx,
    )
    .await;

    REGISTRY.unregister(lease.backend_pid);
    ctx.hub.remove_all_listeners_for_connection(lease.connection_id);
    ctx.stats.connection_destroyed();
    let age = chrono::Duration::from_std(lease.connection_time.elapsed()).unwrap_or_default();
    log::debug!(
        "connection {client_id} closed after {}",
        crate::utils::format_duration(&age)
    );
    if lease.is_reusable() {
        lease.reset_for_reuse();
    } else {
        lease.connected = false;
    }
    result
}

async fn read_startup_frame(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    max_len: usize,
) -> Result<StartupFrame, Error> {
    loop {
        match read_untyped_frame(buf, max_len)? {
            ReadOutcome::Complete {
                payload, consumed, ..
            } => {
                buf.advance(consumed);
                return Ok(crate::messages::parse_startup_frame(payload)?);
            }
            ReadOutcome::Incomplete => {
                let n = stream.read_buf(buf).await?;
                if n == 0 {
                    return Err(Error::Protocol(ProtocolError::MalformedStartup(
                        "connection closed before startup completed".to_string(),
                    )));
                }
            }
        }
    }
}

/// Tracks whether the extended-protocol pipeline is skipping messages until
/// the next `Sync`, per spec.md §4.5's error-recovery rule.
struct ExtendedState {
    skip_until_sync: bool,
}

async fn message_loop(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    lease: &mut SessionLease,
    notify_rx: &mut tokio::sync::mpsc::UnboundedReceiver<Bytes>,
    cancel_handle: &tokio::sync::Notify,
    ctx: &ConnectionContext,
) -> Result<(), Error> {
    let mut ext = ExtendedState {
        skip_until_sync: false,
    };

    loop {
        loop {
            let max_len = if lease.is_in_copy_mode() {
                ctx.config.server.max_copy_message_size
            } else {
                ctx.config.server.max_message_size
            };
            match read_typed_frame(buf, max_len)? {
                ReadOutcome::Complete {
                    msg_type,
                    payload,
                    consumed,
                } => {
                    buf.advance(consumed);
                    let msg_type = msg_type.expect("typed frame always carries a type byte");
                    ctx.stats.protocol_message(msg_type);
                    if lease.is_in_copy_mode() {
                        if !handle_copy_message(stream, lease, msg_type, payload).await? {
                            return Ok(());
                        }
                        continue;
                    }
                    let keep_going = handle_message(
                        stream,
                        lease,
                        ctx.hub,
                        &ctx.stats,
                        &ctx.config.custom_types,
                        &mut ext,
                        msg_type,
                        payload,
                    )
                    .await?;
                    if !keep_going {
                        return Ok(());
                    }
                }
                ReadOutcome::Incomplete => break,
            }
        }

        tokio::select! {
            n = stream.read_buf(buf) => {
                let n = n?;
                if n == 0 {
                    return Ok(());
                }
            }
            Some(frame) = notify_rx.recv() => {
                stream.write_all(&frame).await?;
            }
            _ = cancel_handle.notified() => {
                return Ok(());
            }
        }
    }
}

/// Handle one authenticated, non-COPY message. Returns `Ok(false)` when the
/// connection should close (`Terminate`, or an unrecoverable protocol error).
async fn handle_message(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    hub: &NotificationHub,
    stats: &Arc<dyn Stats>,
    custom_types: &[crate::config::CustomType],
    ext: &mut ExtendedState,
    msg_type: u8,
    payload: Bytes,
) -> Result<bool, Error> {
    if ext.skip_until_sync && msg_type != b'S' && msg_type != b'X' {
        return Ok(true);
    }

    match msg_type {
        b'Q' => handle_simple_query(stream, session, hub, stats, custom_types, payload).await?,
        b'P' => handle_parse(stream, session, payload).await?,
        b'B' => handle_bind(stream, session, ext, payload).await?,
        b'D' => handle_describe(stream, session, ext, payload).await?,
        b'E' => handle_execute(stream, session, hub, stats, custom_types, ext, payload).await?,
        b'S' => {
            ext.skip_until_sync = false;
            stream
                .write_all(&ready_for_query(session.transaction_status.status_byte()))
                .await?;
        }
        b'C' => handle_close(stream, session, payload).await?,
        b'H' => {} // Flush: every response above is already written eagerly.
        b'X' => return Ok(false),
        b'f' | b'd' | b'c' => {
            let err = ProtocolError::NotInCopyMode;
            stream
                .write_all(&simple_error_response("ERROR", err.sqlstate(), &err.to_string()))
                .await?;
        }
        other => {
            let err = ProtocolError::UnknownMessageType(other as char);
            let msg = simple_error_response("FATAL", err.sqlstate(), &err.to_string());
            stream.write_all(&msg).await?;
            return Ok(false);
        }
    }
    Ok(true)
}

async fn handle_simple_query(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    hub: &NotificationHub,
    stats: &Arc<dyn Stats>,
    custom_types: &[crate::config::CustomType],
    mut payload: Bytes,
) -> Result<(), Error> {
    let query = crate::messages::get_cstring(&mut payload)?;
    let statements: Vec<&str> = query.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();

    if statements.is_empty() {
        stream.write_all(&empty_query_response()).await?;
        stream
            .write_all(&ready_for_query(session.transaction_status.status_byte()))
            .await?;
        return Ok(());
    }

    for stmt in statements {
        match dispatcher::dispatch(stmt, session, hub, custom_types) {
            Ok(outcome) => {
                stats.query_executed(stmt.split_whitespace().next().unwrap_or(""));
                write_outcome(stream, session, outcome).await?;
                if session.is_in_copy_mode() {
                    // COPY FROM STDIN: the client drives the rest of the
                    // exchange with CopyData/CopyDone; ReadyForQuery comes
                    // from handle_copy_message once that finishes.
                    return Ok(());
                }
            }
            Err(err) => {
                if matches!(
                    session.transaction_status,
                    crate::session::TransactionStatus::InTransaction
                ) {
                    let _ = session.fail_transaction();
                }
                stream
                    .write_all(&simple_error_response("ERROR", err.sqlstate(), &err.to_string()))
                    .await?;
                break;
            }
        }
    }
    stream
        .write_all(&ready_for_query(session.transaction_status.status_byte()))
        .await?;
    Ok(())
}

async fn write_outcome(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    outcome: DispatchOutcome,
) -> Result<(), Error> {
    match outcome {
        DispatchOutcome::Rows { command, columns, rows } => {
            stream
                .write_all(&crate::messages::row_description(&columns))
                .await?;
            for row in &rows {
                stream.write_all(&crate::messages::data_row(row)).await?;
            }
            let tag = format_command_tag(&command, rows.len() as u64);
            stream.write_all(&command_complete(&tag)).await?;
        }
        DispatchOutcome::CommandOnly { command, .. } => {
            stream.write_all(&command_complete(&command)).await?;
        }
        DispatchOutcome::EmptyQuery => {
            stream.write_all(&empty_query_response()).await?;
        }
        DispatchOutcome::CopyIn {
            overall_format,
            column_formats,
        } => {
            stream
                .write_all(&copy_in_response(overall_format, &column_formats))
                .await?;
            debug_assert!(session.is_in_copy_mode());
        }
        DispatchOutcome::CopyOut {
            overall_format,
            rows,
            row_count,
        } => {
            stream
                .write_all(&copy_out_response(overall_format, &[]))
                .await?;
            for row in &rows {
                stream.write_all(&copy_data(row)).await?;
            }
            stream.write_all(&copy_done()).await?;
            let tag = format_command_tag("COPY", row_count);
            stream.write_all(&command_complete(&tag)).await?;
            // COPY TO STDOUT is entirely server-driven: once CopyDone is
            // sent there is nothing further for the client to send back.
            session.copy_state = None;
        }
    }
    Ok(())
}

async fn handle_parse(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    mut payload: Bytes,
) -> Result<(), Error> {
    let name = crate::messages::get_cstring(&mut payload)?;
    let sql = crate::messages::get_cstring(&mut payload)?;
    let num_params = payload.get_i16();
    let mut param_types = Vec::with_capacity(num_params.max(0) as usize);
    for _ in 0..num_params {
        param_types.push(payload.get_i32());
    }
    session.add_prepared_statement(PreparedStatement {
        name,
        sql,
        param_types,
    });
    stream.write_all(&parse_complete()).await?;
    Ok(())
}

async fn handle_bind(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    ext: &mut ExtendedState,
    mut payload: Bytes,
) -> Result<(), Error> {
    let portal_name = crate::messages::get_cstring(&mut payload)?;
    let statement_name = crate::messages::get_cstring(&mut payload)?;

    let num_param_formats = payload.get_i16();
    let mut param_formats = Vec::with_capacity(num_param_formats.max(0) as usize);
    for _ in 0..num_param_formats {
        param_formats.push(payload.get_i16());
    }

    let num_params = payload.get_i16();
    let mut param_values = Vec::with_capacity(num_params.max(0) as usize);
    for _ in 0..num_params {
        let len = payload.get_i32();
        if len < 0 {
            param_values.push(None);
        } else {
            let mut v = vec![0u8; len as usize];
            payload.copy_to_slice(&mut v);
            param_values.push(Some(v));
        }
    }

    let num_result_formats = payload.get_i16();
    let mut result_formats = Vec::with_capacity(num_result_formats.max(0) as usize);
    for _ in 0..num_result_formats {
        result_formats.push(payload.get_i16());
    }

    if session.get_prepared_statement(&statement_name).is_err() {
        let err = DispatchError::Session(crate::errors::SessionError::UndefinedPreparedStatement(
            statement_name,
        ));
        stream
            .write_all(&simple_error_response("ERROR", err.sqlstate(), &err.to_string()))
            .await?;
        ext.skip_until_sync = true;
        return Ok(());
    }

    session.add_portal(Portal {
        name: portal_name,
        statement_name,
        param_formats,
        param_values,
        result_formats,
    });
    stream.write_all(&bind_complete()).await?;
    Ok(())
}

async fn handle_describe(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    ext: &mut ExtendedState,
    mut payload: Bytes,
) -> Result<(), Error> {
    let kind = payload.get_u8();
    let name = crate::messages::get_cstring(&mut payload)?;

    if kind == b'S' {
        match session.get_prepared_statement(&name) {
            Ok(stmt) => {
                let types: Vec<DataType> = stmt
                    .param_types
                    .iter()
                    .map(|_| DataType::Text)
                    .collect();
                stream.write_all(&parameter_description(&types)).await?;
                stream.write_all(&no_data()).await?;
            }
            Err(e) => {
                stream
                    .write_all(&simple_error_response("ERROR", e.sqlstate(), &e.to_string()))
                    .await?;
                ext.skip_until_sync = true;
            }
        }
    } else {
        match session.get_portal(&name) {
            Ok(_) => {
                stream.write_all(&no_data()).await?;
            }
            Err(e) => {
                stream
                    .write_all(&simple_error_response("ERROR", e.sqlstate(), &e.to_string()))
                    .await?;
                ext.skip_until_sync = true;
            }
        }
    }
    Ok(())
}

async fn handle_execute(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    hub: &NotificationHub,
    stats: &Arc<dyn Stats>,
    custom_types: &[crate::config::CustomType],
    ext: &mut ExtendedState,
    mut payload: Bytes,
) -> Result<(), Error> {
    let portal_name = crate::messages::get_cstring(&mut payload)?;
    let max_rows = payload.get_i32();

    let statement_name = match session.get_portal(&portal_name) {
        Ok(portal) => portal.statement_name.clone(),
        Err(e) => {
            stream
                .write_all(&simple_error_response("ERROR", e.sqlstate(), &e.to_string()))
                .await?;
            ext.skip_until_sync = true;
            return Ok(());
        }
    };
    let sql = match session.get_prepared_statement(&statement_name) {
        Ok(stmt) => stmt.sql.clone(),
        Err(e) => {
            stream
                .write_all(&simple_error_response("ERROR", e.sqlstate(), &e.to_string()))
                .await?;
            ext.skip_until_sync = true;
            return Ok(());
        }
    };

    match dispatcher::dispatch(&sql, session, hub, custom_types) {
        Ok(DispatchOutcome::Rows { command, columns, mut rows }) => {
            stats.query_executed(&command);
            stream.write_all(&crate::messages::row_description(&columns)).await?;
            let suspended = max_rows > 0 && (rows.len() as i32) > max_rows;
            if suspended {
                rows.truncate(max_rows as usize);
            }
            for row in &rows {
                stream.write_all(&crate::messages::data_row(row)).await?;
            }
            if suspended {
                stream.write_all(&portal_suspended()).await?;
            } else {
                let tag = format_command_tag(&command, rows.len() as u64);
                stream.write_all(&command_complete(&tag)).await?;
            }
        }
        Ok(outcome) => {
            stats.query_executed("EXECUTE");
            write_outcome(stream, session, outcome).await?;
        }
        Err(err) => {
            if matches!(
                session.transaction_status,
                crate::session::TransactionStatus::InTransaction
            ) {
                let _ = session.fail_transaction();
            }
            stream
                .write_all(&simple_error_response("ERROR", err.sqlstate(), &err.to_string()))
                .await?;
            ext.skip_until_sync = true;
        }
    }
    Ok(())
}

async fn handle_close(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    mut payload: Bytes,
) -> Result<(), Error> {
    let kind = payload.get_u8();
    let name = crate::messages::get_cstring(&mut payload)?;
    if kind == b'S' {
        session.remove_prepared_statement(&name);
    } else {
        session.remove_portal(&name);
    }
    stream.write_all(&close_complete()).await?;
    Ok(())
}

/// Handle one message while the session is in COPY mode (spec.md §4.4 COPY
/// handler, §4.5 COPY mode). Returns `Ok(false)` to close the connection.
async fn handle_copy_message(
    stream: &mut TcpStream,
    session: &mut SessionLease,
    msg_type: u8,
    payload: Bytes,
) -> Result<bool, Error> {
    match msg_type {
        b'd' => {
            // CopyData: accepted and discarded; this is a mock sink.
            let _ = payload;
            Ok(true)
        }
        b'c' => {
            let table = session
                .copy_state
                .as_ref()
                .map(|s| s.table.clone())
                .unwrap_or_default();
            session.copy_state = None;
            let _ = table;
            stream.write_all(&command_complete("COPY 0")).await?;
            stream
                .write_all(&ready_for_query(session.transaction_status.status_byte()))
                .await?;
            Ok(true)
        }
        b'f' => {
            session.copy_state = None;
            let err = DispatchError::NotSupported("COPY cancelled by client".to_string());
            stream
                .write_all(&simple_error_response("ERROR", err.sqlstate(), &err.to_string()))
                .await?;
            stream
                .write_all(&ready_for_query(session.transaction_status.status_byte()))
                .await?;
            Ok(true)
        }
        b'X' => Ok(false),
        other => {
            let err = ProtocolError::UnknownMessageType(other as char);
            let msg = simple_error_response("FATAL", err.sqlstate(), &err.to_string());
            stream.write_all(&msg).await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pool::Pool;
    use crate::stats::NoopStats;
    use tokio::net::{TcpListener, TcpStream as ClientStream};

    async fn spawn_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = Pool::new(Config::default().pool);
        let config = Arc::new(Config::default());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ctx = ConnectionContext {
                pool,
                hub: &crate::notify::HUB,
                config,
                stats: Arc::new(NoopStats),
            };
            let _ = run_connection(stream, 1, ctx).await;
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn ssl_request_gets_a_single_n_byte() {
        let (addr, _handle) = spawn_server().await;
        let mut stream = ClientStream::connect(addr).await.unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&8i32.to_be_bytes());
        buf.extend_from_slice(&crate::messages::SSL_REQUEST_CODE.to_be_bytes());
        stream.write_all(&buf).await.unwrap();
        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"N");
    }

    #[tokio::test]
    async fn startup_then_simple_query_round_trips() {
        let (addr, _handle) = spawn_server().await;
        let mut stream = ClientStream::connect(addr).await.unwrap();

        let mut params = BytesMut::new();
        crate::messages::put_cstring(&mut params, "user");
        crate::messages::put_cstring(&mut params, "postgres");
        params.extend_from_slice(&[0]);
        let mut body = BytesMut::new();
        body.extend_from_slice(&crate::messages::PROTOCOL_VERSION_3.to_be_bytes());
        body.extend_from_slice(&params);
        let mut frame = BytesMut::new();
        frame.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        frame.extend_from_slice(&body);
        stream.write_all(&frame).await.unwrap();

        // Drain AuthenticationOk..ReadyForQuery without asserting exact shape
        // here; codec/protocol module tests already cover message framing.
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0);
        assert_eq!(buf[0], b'R');
    }
}
