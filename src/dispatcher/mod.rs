//! SQL classification and canned-result handler families (spec.md §4.4).
//!
//! The dispatcher never executes real SQL. It classifies the first keyword
//! of a trimmed statement and returns a structurally-correct synthetic
//! result, exactly the shape a `QueryHandler` implementation is expected to
//! produce (spec.md §6 `QueryHandler` contract).

pub mod explain;

use crate::config::CustomType;
use crate::errors::{DispatchError, SessionError};
use crate::messages::protocol::ColumnDescriptor;
use crate::messages::types::DataType;
use crate::notify::NotificationHub;
use crate::session::{
    CopyDirection, CopyFormat, CopyState, IsolationLevel, Session, TransactionOptions,
    TransactionStatus,
};

/// What the protocol state machine should do with a dispatched statement.
pub enum DispatchOutcome {
    /// Rows to send as `RowDescription` + `DataRow*` before `CommandComplete`.
    Rows {
        command: String,
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// No rows; just a command tag (e.g. `INSERT`, `SET`, `BEGIN`).
    CommandOnly { command: String, row_count: u64 },
    /// The statement text was empty after trimming.
    EmptyQuery,
    /// `COPY ... FROM STDIN`: the session has entered `CopyIn`.
    CopyIn {
        overall_format: i16,
        column_formats: Vec<i16>,
    },
    /// `COPY ... TO STDOUT`: canned rows to stream as `CopyData`.
    CopyOut {
        overall_format: i16,
        rows: Vec<Vec<u8>>,
        row_count: u64,
    },
}

/// Classify and execute one SQL statement against `session` (spec.md §4.4).
pub fn dispatch(
    sql: &str,
    session: &mut Session,
    hub: &NotificationHub,
    custom_types: &[CustomType],
) -> Result<DispatchOutcome, DispatchError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Ok(DispatchOutcome::EmptyQuery);
    }
    let upper = trimmed.to_ascii_uppercase();
    let first_word = upper.split_whitespace().next().unwrap_or("");

    // Once a statement has failed inside a transaction, every statement
    // except one that ends or recovers it is rejected with 25P02 until
    // COMMIT/ROLLBACK (spec.md §4.2 `failTransaction`, §7). `ROLLBACK TO
    // SAVEPOINT` also recovers the transaction, so it stays routed through
    // `transaction_control::rollback` like a plain `ROLLBACK`.
    if session.transaction_status == TransactionStatus::InFailedTransaction
        && !matches!(first_word, "COMMIT" | "END" | "ROLLBACK" | "ABORT")
    {
        return Err(DispatchError::Session(SessionError::InFailedTransaction));
    }

    match first_word {
        "SELECT" => select::dispatch_select(trimmed, custom_types),
        "SHOW" => show::dispatch_show(trimmed, session),
        "BEGIN" | "START" => transaction_control::begin(trimmed, session),
        "COMMIT" | "END" => transaction_control::commit(session),
        "ROLLBACK" | "ABORT" => transaction_control::rollback(trimmed, session),
        "SAVEPOINT" => transaction_control::savepoint(trimmed, session),
        "RELEASE" => transaction_control::release_savepoint(trimmed, session),
        "LISTEN" => pubsub::listen(trimmed, session, hub),
        "UNLISTEN" => pubsub::unlisten(trimmed, session, hub),
        "NOTIFY" => pubsub::notify(trimmed, session, hub),
        "COPY" => copy::dispatch_copy(trimmed, session),
        "EXPLAIN" => dispatch_explain(trimmed),
        "INSERT" => Ok(DispatchOutcome::CommandOnly {
            command: "INSERT 0 1".to_string(),
            row_count: 1,
        }),
        "UPDATE" => Ok(DispatchOutcome::CommandOnly {
            command: "UPDATE 1".to_string(),
            row_count: 1,
        }),
        "DELETE" => Ok(DispatchOutcome::CommandOnly {
            command: "DELETE 1".to_string(),
            row_count: 1,
        }),
        "CREATE" => ddl_tag(trimmed, "CREATE"),
        "DROP" => ddl_tag(trimmed, "DROP"),
        "ALTER" => ddl_tag(trimmed, "ALTER"),
        "SET" => Ok(DispatchOutcome::CommandOnly {
            command: "SET".to_string(),
            row_count: 0,
        }),
        "RESET" => Ok(DispatchOutcome::CommandOnly {
            command: "RESET".to_string(),
            row_count: 0,
        }),
        "DISCARD" => discard(trimmed, session),
        "VACUUM" => Ok(DispatchOutcome::CommandOnly {
            command: "VACUUM".to_string(),
            row_count: 0,
        }),
        "ANALYZE" => Ok(DispatchOutcome::CommandOnly {
            command: "ANALYZE".to_string(),
            row_count: 0,
        }),
        "CHECKPOINT" => Ok(DispatchOutcome::CommandOnly {
            command: "CHECKPOINT".to_string(),
            row_count: 0,
        }),
        _ => Ok(DispatchOutcome::CommandOnly {
            command: first_word.to_string(),
            row_count: 0,
        }),
    }
}

/// Second word of a `<CMD> <OBJECT> ...` statement, e.g. `TABLE` in
/// `CREATE TABLE foo (...)`, used for the `CREATE`/`DROP`/`ALTER` command
/// tag (spec.md §4.4 "return a command-complete tag matching the object
/// kind").
fn ddl_tag(sql: &str, verb: &str) -> Result<DispatchOutcome, DispatchError> {
    let upper = sql.to_ascii_uppercase();
    let object = upper
        .split_whitespace()
        .nth(1)
        .unwrap_or("")
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    let tag = if object.is_empty() {
        verb.to_string()
    } else {
        format!("{verb} {object}")
    };
    Ok(DispatchOutcome::CommandOnly {
        command: tag,
        row_count: 0,
    })
}

fn discard(sql: &str, session: &mut Session) -> Result<DispatchOutcome, DispatchError> {
    let upper = sql.to_ascii_uppercase();
    session.reset_for_reuse();
    let tag = if upper.contains("PLANS") {
        "DISCARD PLANS"
    } else if upper.contains("SEQUENCES") {
        "DISCARD SEQUENCES"
    } else if upper.contains("TEMP") {
        "DISCARD TEMP"
    } else {
        "DISCARD ALL"
    };
    Ok(DispatchOutcome::CommandOnly {
        command: tag.to_string(),
        row_count: 0,
    })
}

fn dispatch_explain(sql: &str) -> Result<DispatchOutcome, DispatchError> {
    let (opts, inner) = explain::parse_explain(sql)?;
    let plan = explain::render_plan(inner, &opts);
    let rows = plan
        .lines()
        .map(|line| vec![Some(line.to_string())])
        .collect();
    Ok(DispatchOutcome::Rows {
        command: "EXPLAIN".to_string(),
        columns: vec![ColumnDescriptor::new("QUERY PLAN", DataType::Text)],
        rows,
    })
}

mod select {
    use super::*;

    pub fn dispatch_select(
        sql: &str,
        custom_types: &[CustomType],
    ) -> Result<DispatchOutcome, DispatchError> {
        let upper = sql.to_ascii_uppercase();
        let collapsed: String = upper.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed == "SELECT 1" {
            return Ok(single_value("?column?", DataType::Int4, "1"));
        }
        if collapsed == "SELECT VERSION()" {
            return Ok(single_value("version", DataType::Text, "PostgreSQL 13.0 (Mock)"));
        }
        if collapsed == "SELECT CURRENT_USER" {
            return Ok(single_value("current_user", DataType::Text, "postgres"));
        }
        if collapsed == "SELECT CURRENT_DATABASE()" {
            return Ok(single_value("current_database", DataType::Text, "postgres"));
        }
        if collapsed == "SELECT NOW()" {
            return Ok(single_value("now", DataType::Timestamptz, "2024-01-01 00:00:00+00"));
        }
        if upper.contains("ARRAY[") || upper.contains("ARRAY (") {
            return Ok(array_literal_result());
        }
        if upper.contains("INFORMATION_SCHEMA.") || upper.contains("PG_CATALOG.") {
            return introspection::dispatch(&upper, custom_types);
        }
        if let Some(custom) = custom_types
            .iter()
            .find(|ct| upper.contains(&format!("::{}", ct.name.to_ascii_uppercase())))
        {
            return Ok(single_value(&custom.name, DataType::Custom(custom.oid), ""));
        }
        Ok(single_value("mock", DataType::Text, "mock"))
    }

    fn single_value(name: &str, data_type: DataType, value: &str) -> DispatchOutcome {
        DispatchOutcome::Rows {
            command: "SELECT 1".to_string(),
            columns: vec![ColumnDescriptor::new(name, data_type)],
            rows: vec![vec![Some(value.to_string())]],
        }
    }

    fn array_literal_result() -> DispatchOutcome {
        DispatchOutcome::Rows {
            command: "SELECT 1".to_string(),
            columns: vec![ColumnDescriptor::new("array", DataType::Text.array_of())],
            rows: vec![vec![Some("{1,2,3}".to_string())]],
        }
    }
}

mod introspection {
    use super::*;

    pub fn dispatch(
        upper_sql: &str,
        custom_types: &[CustomType],
    ) -> Result<DispatchOutcome, DispatchError> {
        if upper_sql.contains("PG_CATALOG.PG_TYPE") {
            return Ok(DispatchOutcome::Rows {
                command: "SELECT 1".to_string(),
                columns: vec![
                    ColumnDescriptor::new("typname", DataType::Text),
                    ColumnDescriptor::new("oid", DataType::Int4),
                    ColumnDescriptor::new("typtype", DataType::Text),
                ],
                rows: custom_types
                    .iter()
                    .map(|ct| {
                        vec![
                            Some(ct.name.clone()),
                            Some(ct.oid.to_string()),
                            Some(ct.typtype.clone()),
                        ]
                    })
                    .collect(),
            });
        }
        if upper_sql.contains("INFORMATION_SCHEMA.TABLES") {
            return Ok(DispatchOutcome::Rows {
                command: "SELECT 1".to_string(),
                columns: vec![
                    ColumnDescriptor::new("table_schema", DataType::Text),
                    ColumnDescriptor::new("table_name", DataType::Text),
                ],
                rows: vec![vec![
                    Some("public".to_string()),
                    Some("mock_table".to_string()),
                ]],
            });
        }
        if upper_sql.contains("PG_CATALOG.PG_TABLES") || upper_sql.contains("PG_CATALOG.PG_CLASS") {
            return Ok(DispatchOutcome::Rows {
                command: "SELECT 1".to_string(),
                columns: vec![ColumnDescriptor::new("relname", DataType::Text)],
                rows: vec![vec![Some("mock_table".to_string())]],
            });
        }
        Ok(DispatchOutcome::Rows {
            command: "SELECT 0".to_string(),
            columns: vec![ColumnDescriptor::new("mock", DataType::Text)],
            rows: vec![],
        })
    }
}

mod show {
    use super::*;

    pub fn dispatch_show(sql: &str, session: &Session) -> Result<DispatchOutcome, DispatchError> {
        let upper = sql.to_ascii_uppercase();
        let setting = upper["SHOW".len()..].trim().trim_end_matches(';').trim();
        let (column, value) = match setting {
            "SERVER_VERSION" => ("server_version", "13.0 (Mock)".to_string()),
            "TIMEZONE" => ("TimeZone", "UTC".to_string()),
            "TRANSACTION_ISOLATION" => (
                "transaction_isolation",
                session.isolation_level.as_show_value().to_string(),
            ),
            "CLIENT_ENCODING" => ("client_encoding", "UTF8".to_string()),
            "DATESTYLE" => ("DateStyle", "ISO, MDY".to_string()),
            other => (other, "".to_string()),
        };
        Ok(DispatchOutcome::Rows {
            command: "SHOW".to_string(),
            columns: vec![ColumnDescriptor::new(column, DataType::Text)],
            rows: vec![vec![Some(value)]],
        })
    }
}

mod transaction_control {
    use super::*;

    pub fn begin(sql: &str, session: &mut Session) -> Result<DispatchOutcome, DispatchError> {
        let opts = parse_begin_options(sql);
        session.begin_transaction(opts)?;
        Ok(DispatchOutcome::CommandOnly {
            command: "BEGIN".to_string(),
            row_count: 0,
        })
    }

    pub fn commit(session: &mut Session) -> Result<DispatchOutcome, DispatchError> {
        session.commit_transaction()?;
        Ok(DispatchOutcome::CommandOnly {
            command: "COMMIT".to_string(),
            row_count: 0,
        })
    }

    pub fn rollback(sql: &str, session: &mut Session) -> Result<DispatchOutcome, DispatchError> {
        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();
        let keyword_len = if upper.starts_with("ROLLBACK") {
            "ROLLBACK".len()
        } else if upper.starts_with("ABORT") {
            "ABORT".len()
        } else {
            0
        };
        // Keep matching on the uppercased copy but slice the name out of the
        // original-case text, so `ROLLBACK TO SAVEPOINT sp1` finds the same
        // `"sp1"` that `SAVEPOINT sp1` stored.
        let rest = trimmed[keyword_len..].trim();
        let rest_upper = rest.to_ascii_uppercase();
        let name_prefix_len = if rest_upper.starts_with("TO SAVEPOINT") {
            Some("TO SAVEPOINT".len())
        } else if rest_upper.starts_with("TO") {
            Some("TO".len())
        } else {
            None
        };
        if let Some(prefix_len) = name_prefix_len {
            let name = rest[prefix_len..].trim().trim_end_matches(';');
            if name.is_empty() {
                return Err(DispatchError::Syntax("missing savepoint name".to_string()));
            }
            session.rollback_to_savepoint(name)?;
            return Ok(DispatchOutcome::CommandOnly {
                command: "ROLLBACK".to_string(),
                row_count: 0,
            });
        }
        session.rollback_transaction()?;
        Ok(DispatchOutcome::CommandOnly {
            command: "ROLLBACK".to_string(),
            row_count: 0,
        })
    }

    pub fn savepoint(sql: &str, session: &mut Session) -> Result<DispatchOutcome, DispatchError> {
        let name = sql.trim()["SAVEPOINT".len()..].trim().trim_end_matches(';');
        if name.is_empty() {
            return Err(DispatchError::Syntax("missing savepoint name".to_string()));
        }
        session.create_savepoint(name)?;
        Ok(DispatchOutcome::CommandOnly {
            command: "SAVEPOINT".to_string(),
            row_count: 0,
        })
    }

    pub fn release_savepoint(
        sql: &str,
        session: &mut Session,
    ) -> Result<DispatchOutcome, DispatchError> {
        let trimmed = sql.trim();
        let rest = trimmed["RELEASE".len()..].trim();
        let rest_upper = rest.to_ascii_uppercase();
        // As in `rollback`: match keywords case-insensitively but take the
        // savepoint name from the original-case text.
        let name = if rest_upper.starts_with("SAVEPOINT") {
            rest["SAVEPOINT".len()..].trim()
        } else {
            rest
        };
        let name = name.trim_end_matches(';');
        if name.is_empty() {
            return Err(DispatchError::Syntax("missing savepoint name".to_string()));
        }
        session.release_savepoint(name)?;
        Ok(DispatchOutcome::CommandOnly {
            command: "RELEASE".to_string(),
            row_count: 0,
        })
    }

    fn parse_begin_options(sql: &str) -> TransactionOptions {
        let upper = sql.to_ascii_uppercase();
        let mut opts = TransactionOptions::default();
        if let Some(pos) = upper.find("ISOLATION LEVEL") {
            let rest = upper[pos + "ISOLATION LEVEL".len()..].trim();
            for candidate in [
                "SERIALIZABLE",
                "REPEATABLE READ",
                "READ COMMITTED",
                "READ UNCOMMITTED",
            ] {
                if rest.starts_with(candidate) {
                    opts.isolation_level = IsolationLevel::parse(candidate);
                    break;
                }
            }
        }
        if upper.contains("READ ONLY") {
            opts.read_only = Some(true);
        } else if upper.contains("READ WRITE") {
            opts.read_only = Some(false);
        }
        if upper.contains("DEFERRABLE") && !upper.contains("NOT DEFERRABLE") {
            opts.deferrable = Some(true);
        }
        opts
    }
}

mod pubsub {
    use super::*;

    pub fn listen(
        sql: &str,
        session: &mut Session,
        hub: &NotificationHub,
    ) -> Result<DispatchOutcome, DispatchError> {
        let channel = channel_arg(sql, "LISTEN")?;
        hub.add_listener(session.connection_id, &channel, listener_sender(session))?;
        session.add_listening_channel(&channel);
        Ok(DispatchOutcome::CommandOnly {
            command: "LISTEN".to_string(),
            row_count: 0,
        })
    }

    pub fn unlisten(
        sql: &str,
        session: &mut Session,
        hub: &NotificationHub,
    ) -> Result<DispatchOutcome, DispatchError> {
        let rest = sql.trim()["UNLISTEN".len()..].trim().trim_end_matches(';');
        if rest == "*" {
            for channel in session.listening_channels.clone() {
                hub.remove_listener(session.connection_id, &channel);
            }
            session.clear_all_listening_channels();
        } else {
            hub.remove_listener(session.connection_id, rest);
            session.remove_listening_channel(rest);
        }
        Ok(DispatchOutcome::CommandOnly {
            command: "UNLISTEN".to_string(),
            row_count: 0,
        })
    }

    pub fn notify(
        sql: &str,
        session: &Session,
        hub: &NotificationHub,
    ) -> Result<DispatchOutcome, DispatchError> {
        let rest = sql.trim()["NOTIFY".len()..].trim().trim_end_matches(';');
        let (channel, payload) = match rest.split_once(',') {
            Some((c, p)) => (c.trim(), unquote(p.trim())),
            None => (rest.trim(), String::new()),
        };
        if channel.is_empty() {
            return Err(DispatchError::Syntax("missing channel name".to_string()));
        }
        hub.send_notification(channel, &payload, session.backend_pid)?;
        Ok(DispatchOutcome::CommandOnly {
            command: "NOTIFY".to_string(),
            row_count: 0,
        })
    }

    fn unquote(s: &str) -> String {
        s.strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap_or(s)
            .to_string()
    }

    fn channel_arg(sql: &str, verb: &str) -> Result<String, DispatchError> {
        let rest = sql.trim()[verb.len()..].trim().trim_end_matches(';');
        if rest.is_empty() {
            return Err(DispatchError::Syntax("missing channel name".to_string()));
        }
        Ok(rest.to_string())
    }

    /// Placeholder for wiring a session's outbound push channel; the real
    /// sender is installed by the protocol state machine when the session is
    /// created (see [`crate::protocol::Connection::notify_sender`]). Here we
    /// only need `Session` to carry one.
    fn listener_sender(session: &Session) -> tokio::sync::mpsc::UnboundedSender<bytes::Bytes> {
        session.notify_sender.clone()
    }
}

mod copy {
    use super::*;

    pub fn dispatch_copy(sql: &str, session: &mut Session) -> Result<DispatchOutcome, DispatchError> {
        let upper = sql.to_ascii_uppercase();
        let rest = upper["COPY".len()..].trim();

        let (table_part, direction_part) = if let Some(pos) = rest.find("FROM STDIN") {
            (rest[..pos].trim(), "FROM STDIN")
        } else if let Some(pos) = rest.find("TO STDOUT") {
            (rest[..pos].trim(), "TO STDOUT")
        } else if rest.contains("FROM ") || rest.contains("TO ") {
            return Err(DispatchError::NotSupported(
                "COPY to/from a file path".to_string(),
            ));
        } else {
            return Err(DispatchError::Syntax("malformed COPY statement".to_string()));
        };

        let table = table_part
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("")
            .to_string();
        let format = parse_format(rest);
        let columns = parse_columns(table_part);

        if direction_part == "FROM STDIN" {
            session.copy_state = Some(CopyState {
                direction: CopyDirection::In,
                format,
                table,
                columns: columns.clone(),
            });
            let column_formats = vec![0i16; columns.len().max(1)];
            Ok(DispatchOutcome::CopyIn {
                overall_format: 0,
                column_formats,
            })
        } else {
            session.copy_state = Some(CopyState {
                direction: CopyDirection::Out,
                format,
                table,
                columns,
            });
            Ok(DispatchOutcome::CopyOut {
                overall_format: 0,
                rows: vec![b"1\tmock\n".to_vec()],
                row_count: 1,
            })
        }
    }

    fn parse_format(rest: &str) -> CopyFormat {
        if rest.contains("CSV") {
            CopyFormat::Csv
        } else if rest.contains("BINARY") {
            CopyFormat::Binary
        } else {
            CopyFormat::Text
        }
    }

    fn parse_columns(table_part: &str) -> Vec<String> {
        let Some(open) = table_part.find('(') else {
            return Vec::new();
        };
        let Some(close) = table_part.find(')') else {
            return Vec::new();
        };
        table_part[open + 1..close]
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn session() -> Session {
        let mut s = Session::new_with_push_channel(1, 100, 200).0;
        s.authenticated = true;
        s
    }

    #[test]
    fn select_1_is_canned() {
        let hub = NotificationHub::new();
        let mut s = session();
        let outcome = dispatch("SELECT 1", &mut s, &hub, &[]).unwrap();
        match outcome {
            DispatchOutcome::Rows { rows, columns, .. } => {
                assert_eq!(rows, vec![vec![Some("1".to_string())]]);
                assert_eq!(columns[0].name, "?column?");
            }
            _ => panic!("expected Rows"),
        }
    }

    #[test]
    fn empty_statement_is_empty_query() {
        let hub = NotificationHub::new();
        let mut s = session();
        let outcome = dispatch("   ", &mut s, &hub, &[]).unwrap();
        assert!(matches!(outcome, DispatchOutcome::EmptyQuery));
    }

    #[test]
    fn begin_then_begin_surfaces_already_in_transaction() {
        let hub = NotificationHub::new();
        let mut s = session();
        dispatch("BEGIN", &mut s, &hub, &[]).unwrap();
        let err = dispatch("BEGIN", &mut s, &hub, &[]).unwrap_err();
        assert_eq!(err.sqlstate(), "25001");
    }

    #[test]
    fn copy_from_stdin_enters_copy_in_state() {
        let hub = NotificationHub::new();
        let mut s = session();
        let outcome = dispatch("COPY users FROM STDIN WITH (FORMAT csv)", &mut s, &hub, &[]).unwrap();
        assert!(matches!(outcome, DispatchOutcome::CopyIn { .. }));
        let copy_state = s.copy_state.as_ref().unwrap();
        assert_eq!(copy_state.direction, CopyDirection::In);
        assert_eq!(copy_state.format, CopyFormat::Csv);
        assert!(s.is_in_copy_mode());
    }

    #[test]
    fn copy_from_file_is_not_supported() {
        let hub = NotificationHub::new();
        let mut s = session();
        let err = dispatch("COPY users FROM '/tmp/x.csv'", &mut s, &hub, &[]).unwrap_err();
        assert_eq!(err.sqlstate(), "0A000");
    }

    #[test]
    fn unlisten_star_clears_all_channels() {
        let hub = NotificationHub::new();
        let mut s = session();
        dispatch("LISTEN a", &mut s, &hub, &[]).unwrap();
        dispatch("LISTEN b", &mut s, &hub, &[]).unwrap();
        dispatch("UNLISTEN *", &mut s, &hub, &[]).unwrap();
        assert!(s.listening_channels.is_empty());
    }

    #[test]
    fn pg_type_introspection_lists_registered_custom_types() {
        let hub = NotificationHub::new();
        let mut s = session();
        let custom_types = vec![CustomType {
            name: "money_cents".to_string(),
            oid: 90001,
            encode: "text".to_string(),
            decode: "text".to_string(),
            typlen: -1,
            typtype: "b".to_string(),
        }];
        let outcome = dispatch(
            "SELECT * FROM pg_catalog.pg_type",
            &mut s,
            &hub,
            &custom_types,
        )
        .unwrap();
        match outcome {
            DispatchOutcome::Rows { rows, .. } => {
                assert_eq!(rows, vec![vec![
                    Some("money_cents".to_string()),
                    Some("90001".to_string()),
                    Some("b".to_string()),
                ]]);
            }
            _ => panic!("expected Rows"),
        }
    }

    #[test]
    fn cast_to_registered_custom_type_reports_its_oid() {
        let hub = NotificationHub::new();
        let mut s = session();
        let custom_types = vec![CustomType {
            name: "money_cents".to_string(),
            oid: 90001,
            encode: "text".to_string(),
            decode: "text".to_string(),
            typlen: -1,
            typtype: "b".to_string(),
        }];
        let outcome = dispatch(
            "SELECT '100'::money_cents",
            &mut s,
            &hub,
            &custom_types,
        )
        .unwrap();
        match outcome {
            DispatchOutcome::Rows { columns, .. } => {
                assert_eq!(columns[0].data_type.oid(), 90001);
            }
            _ => panic!("expected Rows"),
        }
    }

    #[test]
    fn create_table_tag_matches_object_kind() {
        let hub = NotificationHub::new();
        let mut s = session();
        let outcome = dispatch("CREATE TABLE foo (id int)", &mut s, &hub, &[]).unwrap();
        match outcome {
            DispatchOutcome::CommandOnly { command, .. } => assert_eq!(command, "CREATE TABLE"),
            _ => panic!("expected CommandOnly"),
        }
    }

    #[test]
    fn rollback_to_savepoint_finds_the_name_saved_in_original_case() {
        let hub = NotificationHub::new();
        let mut s = session();
        dispatch("BEGIN", &mut s, &hub, &[]).unwrap();
        dispatch("SAVEPOINT sp1", &mut s, &hub, &[]).unwrap();
        let outcome = dispatch("ROLLBACK TO SAVEPOINT sp1", &mut s, &hub, &[]).unwrap();
        assert!(matches!(outcome, DispatchOutcome::CommandOnly { .. }));
        assert_eq!(s.transaction_status, TransactionStatus::InTransaction);
        assert_eq!(s.savepoints.len(), 1);
        assert_eq!(s.savepoints[0].name, "sp1");
    }

    #[test]
    fn release_savepoint_finds_the_name_saved_in_original_case() {
        let hub = NotificationHub::new();
        let mut s = session();
        dispatch("BEGIN", &mut s, &hub, &[]).unwrap();
        dispatch("SAVEPOINT sp1", &mut s, &hub, &[]).unwrap();
        let outcome = dispatch("RELEASE SAVEPOINT sp1", &mut s, &hub, &[]).unwrap();
        assert!(matches!(outcome, DispatchOutcome::CommandOnly { .. }));
        assert!(s.savepoints.is_empty());
    }

    #[test]
    fn statement_after_failure_is_rejected_until_transaction_ends() {
        // `dispatch` itself never flips a session into InFailedTransaction
        // (the protocol state machine does that once a dispatch error
        // surfaces mid-transaction); set it up directly, as the session
        // module's own tests do.
        let hub = NotificationHub::new();
        let mut s = session();
        dispatch("BEGIN", &mut s, &hub, &[]).unwrap();
        s.fail_transaction().unwrap();

        let err = dispatch("SELECT 1", &mut s, &hub, &[]).unwrap_err();
        assert_eq!(err.sqlstate(), "25P02");

        // ROLLBACK still ends the failed transaction.
        dispatch("ROLLBACK", &mut s, &hub, &[]).unwrap();
        assert_eq!(s.transaction_status, TransactionStatus::Idle);
    }

    #[test]
    fn rollback_to_savepoint_recovers_a_failed_transaction() {
        let hub = NotificationHub::new();
        let mut s = session();
        dispatch("BEGIN", &mut s, &hub, &[]).unwrap();
        dispatch("SAVEPOINT sp1", &mut s, &hub, &[]).unwrap();
        s.fail_transaction().unwrap();

        dispatch("ROLLBACK TO SAVEPOINT sp1", &mut s, &hub, &[]).unwrap();
        assert_eq!(s.transaction_status, TransactionStatus::InTransaction);

        let outcome = dispatch("SELECT 1", &mut s, &hub, &[]).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Rows { .. }));
    }
}
