//! End-to-end wire-protocol tests driving the server over a real loopback
//! `TcpStream` via `tokio-postgres` (SPEC_FULL.md §2-EXPANDED test tooling:
//! plain `#[tokio::test]` in place of the teacher's `cucumber` harness — see
//! DESIGN.md for why `cucumber` was dropped).
//!
//! Each test binds an ephemeral port (`portpicker`), starts the server on a
//! background task, and tears it down by aborting that task. `serial_test`
//! keeps the port-picking tests from racing each other.

use std::sync::Arc;
use std::time::Duration;

use pg_mock_server::config::Config;
use pg_mock_server::server::{self, ServerHandle};
use pg_mock_server::stats::NoopStats;
use serial_test::serial;

/// Start a server on an ephemeral port and return its connection string and
/// the background task driving it (abort to tear down).
async fn start_server() -> (String, tokio::task::JoinHandle<()>) {
    let port = portpicker::pick_unused_port().expect("no free port");
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config.pool.min_connections = 1;

    let handle = ServerHandle::new(config, Arc::new(NoopStats));
    let task = tokio::spawn(async move {
        let _ = server::run(handle).await;
    });

    // Give the listener a moment to bind before clients start dialing it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conninfo = format!("host=127.0.0.1 port={port} user=postgres dbname=postgres");
    (conninfo, task)
}

/// S1 — Startup: AuthenticationOk, ParameterStatus set (incl. server_version
/// "13.0 (Mock)"), BackendKeyData, ReadyForQuery('I').
#[tokio::test]
#[serial]
async fn startup_reports_server_version_and_becomes_ready() {
    let (conninfo, task) = start_server().await;
    let (client, connection) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect");
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let params = client.parameter_status("server_version");
    assert_eq!(params, Some("13.0 (Mock)"));

    task.abort();
}

/// S2 — Simple SELECT: RowDescription/DataRow/CommandComplete/ReadyForQuery.
#[tokio::test]
#[serial]
async fn select_1_returns_one_row_one_column() {
    let (conninfo, task) = start_server().await;
    let (client, connection) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect");
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let rows = client.simple_query("SELECT 1").await.expect("query");
    let mut saw_row = false;
    for msg in rows {
        if let tokio_postgres::SimpleQueryMessage::Row(row) = msg {
            assert_eq!(row.get(0), Some("1"));
            saw_row = true;
        }
    }
    assert!(saw_row);

    task.abort();
}

/// S4 — Nested BEGIN surfaces ErrorResponse 25001 without dropping the
/// connection; the session stays usable afterwards.
#[tokio::test]
#[serial]
async fn nested_begin_is_rejected_but_connection_survives() {
    let (conninfo, task) = start_server().await;
    let (client, connection) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect");
    tokio::spawn(async move {
        let _ = connection.await;
    });

    client.simple_query("BEGIN").await.expect("first BEGIN");
    let err = client
        .simple_query("BEGIN")
        .await
        .expect_err("nested BEGIN must error");
    let db_err = err.as_db_error().expect("db error");
    assert_eq!(db_err.code().code(), "25001");

    // The connection is still usable: ROLLBACK closes out the transaction.
    client.simple_query("ROLLBACK").await.expect("rollback");

    task.abort();
}

/// S3 — Transaction + savepoint rollback: a failure inside the transaction
/// moves status to `E`; `ROLLBACK TO SAVEPOINT sp1` recovers it (status `T`,
/// savepoints == [sp1]); `COMMIT` then ends the transaction cleanly.
#[tokio::test]
#[serial]
async fn savepoint_rollback_recovers_a_failed_transaction() {
    let (conninfo, task) = start_server().await;
    let (client, connection) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect");
    tokio::spawn(async move {
        let _ = connection.await;
    });

    client.simple_query("BEGIN").await.expect("begin");
    client
        .simple_query("SAVEPOINT sp1")
        .await
        .expect("savepoint");

    let err = client
        .simple_query("ROLLBACK TO SAVEPOINT missing")
        .await
        .expect_err("undefined savepoint must error");
    assert_eq!(err.as_db_error().expect("db error").code().code(), "3B001");

    // The transaction is now failed; an ordinary statement is rejected...
    let err = client
        .simple_query("SELECT 1")
        .await
        .expect_err("statement in a failed transaction must error");
    assert_eq!(err.as_db_error().expect("db error").code().code(), "25P02");

    // ...but rolling back to the real savepoint recovers it.
    client
        .simple_query("ROLLBACK TO SAVEPOINT sp1")
        .await
        .expect("rollback to savepoint recovers the transaction");
    client
        .simple_query("SELECT 1")
        .await
        .expect("transaction is usable again");
    client.simple_query("COMMIT").await.expect("commit");

    task.abort();
}

/// S5 — LISTEN/NOTIFY fan-out between two sessions on the same server.
#[tokio::test]
#[serial]
async fn listen_notify_delivers_across_sessions() {
    let (conninfo, task) = start_server().await;

    let (listener, listener_conn) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect listener");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut conn = listener_conn;
        loop {
            match next_async_message(&mut conn).await {
                Some(tokio_postgres::AsyncMessage::Notification(n)) => {
                    let _ = tx.send((n.channel().to_string(), n.payload().to_string()));
                }
                Some(_) => {}
                None => break,
            }
        }
    });
    listener
        .simple_query("LISTEN events")
        .await
        .expect("listen");

    let (notifier, notifier_conn) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect notifier");
    tokio::spawn(async move {
        let _ = notifier_conn.await;
    });
    notifier
        .simple_query("NOTIFY events, 'hello'")
        .await
        .expect("notify");

    let (channel, payload) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("notification within timeout")
        .expect("channel closed before notification arrived");
    assert_eq!(channel, "events");
    assert_eq!(payload, "hello");

    task.abort();
}

/// Drains a `tokio_postgres::Connection` for exactly one out-of-band message,
/// polling the connection future manually the way `tokio-postgres`'s own
/// `AsyncMessage` stream is meant to be consumed alongside ordinary queries.
async fn next_async_message(
    conn: &mut tokio_postgres::Connection<tokio_postgres::Socket, tokio_postgres::tls::NoTlsStream>,
) -> Option<tokio_postgres::AsyncMessage> {
    use futures_util::stream::StreamExt;
    conn.next().await.and_then(|r| r.ok())
}

/// S7 — COPY FROM STDIN enters CopyIn and accepts a `copy_in` write cycle.
#[tokio::test]
#[serial]
async fn copy_from_stdin_round_trips() {
    let (conninfo, task) = start_server().await;
    let (client, connection) = tokio_postgres::connect(&conninfo, tokio_postgres::NoTls)
        .await
        .expect("connect");
    tokio::spawn(async move {
        let _ = connection.await;
    });

    use futures_util::SinkExt;
    let sink = client
        .copy_in("COPY users FROM STDIN WITH (FORMAT csv)")
        .await
        .expect("copy_in started");
    tokio::pin!(sink);
    sink.send(bytes::Bytes::from_static(b"1,alice\n"))
        .await
        .expect("send copy row");
    let rows = sink.finish().await.expect("copy completes");
    assert_eq!(rows, 0);

    task.abort();
}
