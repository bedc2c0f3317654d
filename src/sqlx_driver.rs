//! Blocking MySQL clients on top of SQLx.
//!
//! Each driver owns a current-thread tokio runtime and drives SQLx's async
//! connection to completion on every call, so callers see plain blocking
//! methods.

use crate::client::{ClientKind, ColumnInfo, Driver, QueryResult, Session};
use crate::config::{ConnectionConfig, Endpoint};
use crate::escape::{escape_string, EscapeMode};
use crate::ClientError;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Either, Executor, Row, TypeInfo, ValueRef};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// MySQL driver speaking either the binary or the text protocol.
pub struct SqlxDriver {
    kind: ClientKind,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for SqlxDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxDriver").field("kind", &self.kind).finish()
    }
}

impl SqlxDriver {
    pub fn new(kind: ClientKind) -> Result<Self, ClientError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::connect(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            kind,
            runtime: Arc::new(runtime),
        })
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }
}

fn connect_options(config: &ConnectionConfig) -> Result<MySqlConnectOptions, ClientError> {
    let opts = MySqlConnectOptions::new()
        .username(config.user())
        .password(config.password())
        .database(config.database());
    let endpoint = config
        .endpoint()
        .map_err(|e| ClientError::connect(e.to_string()))?;
    Ok(match endpoint {
        Endpoint::Tcp { host, port } => opts.host(&host).port(port),
        Endpoint::Socket { path } => opts.socket(path),
    })
}

impl Driver for SqlxDriver {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, ClientError> {
        let opts = connect_options(config)?;
        let conn = self
            .runtime
            .block_on(opts.connect())
            .map_err(|e| ClientError::connect(e.to_string()))?;
        Ok(Box::new(SqlxSession {
            kind: self.kind,
            runtime: Arc::clone(&self.runtime),
            conn,
            mode: EscapeMode::Backslash,
        }))
    }
}

struct SqlxSession {
    kind: ClientKind,
    runtime: Arc<Runtime>,
    conn: MySqlConnection,
    mode: EscapeMode,
}

fn classify(err: sqlx::Error) -> ClientError {
    match err {
        sqlx::Error::Database(db) => ClientError::query(db.message()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut => ClientError::lost(err.to_string()),
        other => ClientError::query(other.to_string()),
    }
}

/// `ER_UNSUPPORTED_PS`: the statement is not allowed in the prepared
/// statement protocol. Raised at prepare time, before anything runs.
const ER_UNSUPPORTED_PS: u16 = 1295;

fn is_unsupported_prepare(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| e.number() == ER_UNSUPPORTED_PS),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    /// `COM_STMT_PREPARE` + `COM_STMT_EXECUTE`
    Binary,
    /// `COM_QUERY`; accepts anything the server parses, including
    /// multi-statement text
    Text,
}

async fn fetch(
    conn: &mut MySqlConnection,
    sql: &str,
    protocol: Protocol,
) -> Result<QueryResult, sqlx::Error> {
    let mut stream = match protocol {
        Protocol::Binary => conn.fetch_many(sqlx::query(sql)),
        Protocol::Text => conn.fetch_many(sqlx::raw_sql(sql)),
    };
    let mut result = QueryResult::default();
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => {
                result.rows_affected += done.rows_affected();
                if done.last_insert_id() != 0 {
                    result.last_insert_id = done.last_insert_id();
                }
            }
            Either::Right(row) => {
                if result.columns.is_empty() {
                    result.columns = row
                        .columns()
                        .iter()
                        .map(|c| ColumnInfo {
                            name: c.name().to_owned(),
                            type_name: c.type_info().name().to_owned(),
                        })
                        .collect();
                }
                result
                    .rows
                    .push((0..row.len()).map(|i| column_text(&row, i)).collect());
            }
        }
    }
    Ok(result)
}

fn column_text(row: &MySqlRow, index: usize) -> Option<String> {
    if row.try_get_raw(index).map_or(true, |v| v.is_null()) {
        return None;
    }
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Some(s);
    }
    if let Ok(i) = row.try_get::<i64, _>(index) {
        return Some(i.to_string());
    }
    if let Ok(u) = row.try_get::<u64, _>(index) {
        return Some(u.to_string());
    }
    if let Ok(x) = row.try_get::<f64, _>(index) {
        return Some(x.to_string());
    }
    if let Ok(s) = row.try_get_unchecked::<String, _>(index) {
        return Some(s);
    }
    row.try_get_unchecked::<Vec<u8>, _>(index)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

impl Session for SqlxSession {
    fn escape(&self, raw: &str) -> String {
        escape_string(raw, self.mode)
    }

    fn set_no_backslash_escapes(&mut self, enabled: bool) {
        self.mode = if enabled {
            EscapeMode::QuoteDoubling
        } else {
            EscapeMode::Backslash
        };
    }

    fn execute(&mut self, sql: &str) -> Result<QueryResult, ClientError> {
        let kind = self.kind;
        let conn = &mut self.conn;
        self.runtime
            .block_on(async move {
                if kind == ClientKind::Modern {
                    match fetch(&mut *conn, sql, Protocol::Binary).await {
                        Err(e) if is_unsupported_prepare(&e) => {
                            tracing::debug!(
                                error = %e,
                                "statement cannot be prepared, resending as text"
                            );
                        }
                        other => return other,
                    }
                }
                fetch(conn, sql, Protocol::Text).await
            })
            .map_err(classify)
    }

    fn ping(&mut self) -> Result<(), ClientError> {
        self.runtime.block_on(self.conn.ping()).map_err(classify)
    }

    fn close(self: Box<Self>) {
        let SqlxSession { runtime, conn, .. } = *self;
        if let Err(e) = runtime.block_on(conn.close()) {
            tracing::debug!(error = %e, "error while closing MySQL connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientErrorKind;
    use std::io;

    #[test]
    fn test_classify_transport_errors_as_lost() {
        let io = sqlx::Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        assert!(classify(io).is_connection_lost());
        assert!(classify(sqlx::Error::PoolTimedOut).is_connection_lost());
        assert!(classify(sqlx::Error::WorkerCrashed).is_connection_lost());
    }

    #[test]
    fn test_classify_other_errors_as_query() {
        let err = classify(sqlx::Error::RowNotFound);
        assert_eq!(err.kind, ClientErrorKind::Query);
    }

    #[test]
    fn test_only_server_errors_trigger_text_fallback() {
        assert!(!is_unsupported_prepare(&sqlx::Error::RowNotFound));
        assert!(!is_unsupported_prepare(&sqlx::Error::Protocol(
            "unexpected packet".into()
        )));
    }

    #[test]
    fn test_connect_options_rejects_bad_host() {
        let config = ConnectionConfig::new("u", "p", "db", "db:33o7");
        let err = connect_options(&config).unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::Connect);
        assert!(connect_options(&ConnectionConfig::new("u", "p", "db", "db:3307")).is_ok());
    }
}
