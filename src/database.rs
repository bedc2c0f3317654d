use crate::accessor::{FieldTable, FieldValue};
use crate::capability::{Authorizer, CAP_USE_DB};
use crate::charset::{CharsetProfile, SqlModeReport};
use crate::client::{ClientKind, DriverSet, QueryResult};
use crate::config::{ConnectionConfig, Options};
use crate::connection::{ConnectionManager, ConnectionState, RetryState};
use crate::query::{compile, PreparedQuery};
use crate::{Error, Result, Value};

/// A database access object: one connection, a placeholder compiler bound to
/// that connection's escaping, and a named-field view of its bookkeeping.
///
/// Instances are confined to one logical session and are not meant to be
/// shared between threads.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_format_bind::{values, AllowAll, Authorizer, ConnectionConfig, Database, Options, Principal};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut db = Database::connect_mysql(
///     ConnectionConfig::new("app", "secret", "app_db", "localhost:3306"),
///     Options::default(),
///     Authorizer::new(Principal::new("installer"), AllowAll),
/// )?;
///
/// let sql = db.prepare("SELECT * FROM users WHERE login = %s AND id > %d", &values!["alice", 10])?;
/// let result = db.query(sql.as_str())?;
/// println!("{} row(s)", result.rows.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Database {
    connection: ConnectionManager,
    fields: FieldTable,
    show_errors: bool,
    suppress_errors: bool,
}

impl Database {
    /// Builds the object and, unless `defer_connect` is set, connects.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when no wire client is available, and
    /// [`ConnectionError::Exhausted`](crate::ConnectionError::Exhausted) when
    /// the initial connect runs out of attempts.
    pub fn new(
        config: ConnectionConfig,
        options: Options,
        drivers: DriverSet,
        authorizer: Authorizer,
    ) -> Result<Self> {
        let connection = ConnectionManager::new(config, &options, drivers, authorizer)?;
        let mut db = Self {
            connection,
            fields: FieldTable::new(),
            show_errors: options.show_errors,
            suppress_errors: options.suppress_errors,
        };
        db.init_fields(&options);
        if !options.defer_connect {
            db.connect()?;
        }
        Ok(db)
    }

    /// Like [`Database::new`] with both sqlx MySQL clients on offer.
    pub fn connect_mysql(
        config: ConnectionConfig,
        options: Options,
        authorizer: Authorizer,
    ) -> Result<Self> {
        let drivers = DriverSet::sqlx().map_err(|e| Error::Config(e.to_string()))?;
        Self::new(config, options, drivers, authorizer)
    }

    fn init_fields(&mut self, options: &Options) {
        let profile = self.connection.profile().clone();
        let f = &mut self.fields;
        f.put("show_errors", options.show_errors);
        f.put("suppress_errors", options.suppress_errors);
        f.put("last_error", "");
        f.put("num_queries", 0_i64);
        f.put("num_rows", 0_i64);
        f.put("rows_affected", 0_i64);
        f.put("insert_id", 0_i64);
        f.put("last_query", FieldValue::Null);
        f.put("func_call", FieldValue::Null);
        f.put("prefix", "");
        f.put("base_prefix", FieldValue::Null);
        f.put("ready", false);
        f.put("is_mysql", FieldValue::Null);
        f.put("charset", profile.charset);
        f.put("collate", profile.collation);
        f.put("reconnect_retries", options.max_reconnect_attempts);
        f.put("col_meta", FieldValue::List(Vec::new()));
        f.put("table_charset", FieldValue::List(Vec::new()));
        f.put("check_current_query", true);
    }

    /// Opens the connection if it is not open yet.
    pub fn connect(&mut self) -> Result<()> {
        let outcome = self.connection.connect();
        self.sync_connection_fields();
        outcome.map_err(Into::into)
    }

    /// Health-checks the connection, reconnecting within the retry bound.
    pub fn ensure_connected(&mut self) -> Result<()> {
        let outcome = self.connection.ensure_connected();
        self.sync_connection_fields();
        outcome.map_err(Into::into)
    }

    /// Compiles a template against the live connection's escaping.
    ///
    /// Never connects on its own; call [`Database::ensure_connected`] first
    /// if the connection may not be open.
    pub fn prepare(&self, template: &str, values: &[Value]) -> Result<PreparedQuery> {
        Ok(compile(template, values, &self.connection.escaper())?)
    }

    /// Sends one statement and records its outcome in the named fields.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.flush();
        self.fields.put("last_query", sql);
        self.bump_queries();

        let outcome = self.connection.execute(sql);
        self.sync_connection_fields();
        match outcome {
            Ok(result) => {
                self.record_result(&result);
                Ok(result)
            }
            Err(e) => {
                self.record_error(&e, Some(sql));
                Err(e)
            }
        }
    }

    /// `prepare` followed by `query`. A template that fails to compile is
    /// never sent.
    pub fn execute(&mut self, template: &str, values: &[Value]) -> Result<QueryResult> {
        match self.prepare(template, values) {
            Ok(sql) => self.query(sql.as_str()),
            Err(e) => {
                self.record_error(&e, None);
                Err(e)
            }
        }
    }

    /// Changes the connection charset. Falls back to the recorded profile for
    /// anything not given; without the `use_db` capability the profile is
    /// left unchanged.
    pub fn set_charset(
        &mut self,
        charset: Option<&str>,
        collation: Option<&str>,
    ) -> Result<CharsetProfile> {
        let profile = self.connection.set_charset(charset, collation)?.clone();
        self.fields.put("charset", profile.charset.as_str());
        self.fields.put("collate", profile.collation.as_deref());
        Ok(profile)
    }

    pub fn set_password(&mut self, user: &str, password: &str) -> Result<QueryResult> {
        self.require(CAP_USE_DB)?;
        self.fields.put("func_call", format!("set_password({user})"));
        self.execute(
            "UPDATE users SET password = %s WHERE user = %s",
            &[Value::from(password), Value::from(user)],
        )
    }

    pub fn set_surname(&mut self, user: &str, surname: &str) -> Result<QueryResult> {
        self.require(CAP_USE_DB)?;
        self.fields.put("func_call", format!("set_surname({user})"));
        self.execute(
            "UPDATE users SET surname = %s WHERE user = %s",
            &[Value::from(surname), Value::from(user)],
        )
    }

    /// Releases the connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.connection.close();
        self.fields.put("ready", false);
    }

    pub fn charset_profile(&self) -> &CharsetProfile {
        self.connection.profile()
    }

    pub fn sql_modes(&self) -> &SqlModeReport {
        self.connection.sql_modes()
    }

    /// See [`ConnectionManager::is_reduced_trust`].
    pub fn is_reduced_trust(&self) -> bool {
        self.connection.is_reduced_trust()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn retry_state(&self) -> &RetryState {
        self.connection.retry_state()
    }

    pub fn client_kind(&self) -> ClientKind {
        self.connection.client_kind()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn last_error(&self) -> &str {
        self.fields
            .peek("last_error")
            .and_then(FieldValue::as_str)
            .unwrap_or_default()
    }

    pub fn last_query(&self) -> Option<&str> {
        self.fields.peek("last_query").and_then(FieldValue::as_str)
    }

    pub fn num_queries(&self) -> i64 {
        self.int_field("num_queries")
    }

    pub fn insert_id(&self) -> i64 {
        self.int_field("insert_id")
    }

    pub fn rows_affected(&self) -> i64 {
        self.int_field("rows_affected")
    }

    pub fn num_rows(&self) -> i64 {
        self.int_field("num_rows")
    }

    /// Reads a named field; lazy fields are computed on first read.
    pub fn get(&mut self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Writes a named field; writes to protected fields are dropped.
    ///
    /// Writing `charset` or `collate` only changes what the next negotiation
    /// falls back to. [`Database::charset_profile`] keeps reporting what the
    /// session actually runs with until a negotiation applies the new value.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        match name {
            "charset" => {
                if let Some(charset) = value.as_str() {
                    let mut requested = self.connection.requested_profile().clone();
                    requested.charset = charset.to_owned();
                    self.connection.request_profile(requested);
                }
            }
            "collate" => {
                let mut requested = self.connection.requested_profile().clone();
                requested.collation = value.as_str().filter(|c| !c.is_empty()).map(str::to_owned);
                self.connection.request_profile(requested);
            }
            _ => {}
        }
        self.fields.set(name, value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.has(name)
    }

    pub fn delete(&mut self, name: &str) {
        self.fields.delete(name);
    }

    fn require(&mut self, capability: &'static str) -> Result<()> {
        if self.connection.authorizer().allows(capability) {
            return Ok(());
        }
        let err = Error::CapabilityDenied { capability };
        self.record_error(&err, None);
        Err(err)
    }

    fn flush(&mut self) {
        self.fields.put("last_error", "");
        self.fields.put("last_query", FieldValue::Null);
        self.fields.put("rows_affected", 0_i64);
        self.fields.put("num_rows", 0_i64);
        self.fields.delete("col_info");
    }

    fn bump_queries(&mut self) {
        let n = self.int_field("num_queries");
        self.fields.put("num_queries", n + 1);
    }

    fn record_result(&mut self, result: &QueryResult) {
        self.fields.put("rows_affected", result.rows_affected);
        self.fields
            .put("num_rows", i64::try_from(result.rows.len()).unwrap_or(i64::MAX));
        if result.last_insert_id != 0 {
            self.fields.put("insert_id", result.last_insert_id);
        }
        let columns = result.columns.clone();
        self.fields
            .defer("col_info", move || FieldValue::Columns(columns));
    }

    fn record_error(&mut self, err: &Error, sql: Option<&str>) {
        let message = err.to_string();
        self.fields.put("last_error", message.as_str());
        if self.suppress_errors {
            return;
        }
        if self.show_errors {
            tracing::error!(error = %message, query = sql, "database error");
        } else {
            tracing::debug!(error = %message, query = sql, "database error");
        }
    }

    fn sync_connection_fields(&mut self) {
        self.fields.put("ready", self.connection.is_connected());
        if self.connection.has_connected() {
            self.fields.put("is_mysql", true);
        }
    }

    fn int_field(&self, name: &str) -> i64 {
        self.fields
            .peek(name)
            .and_then(FieldValue::as_int)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AllowAll, Principal, StaticCapabilities};
    use crate::client::ColumnInfo;
    use crate::test_utils::{ScriptedDriver, ServerScript};
    use crate::{values, CompileError, ConnectionError};

    fn database_with(script: &ServerScript, options: Options, authorizer: Authorizer) -> Result<Database> {
        Database::new(
            ConnectionConfig::new("app", "secret", "app_db", "localhost"),
            options,
            DriverSet::single(Box::new(ScriptedDriver::new(script.clone()))),
            authorizer,
        )
    }

    fn database(script: &ServerScript) -> Database {
        database_with(
            script,
            Options::default(),
            Authorizer::new(Principal::new("admin"), AllowAll),
        )
        .unwrap()
    }

    #[test]
    fn test_new_connects_and_marks_ready() {
        let script = ServerScript::new();
        let mut db = database(&script);

        assert_eq!(db.connection_state(), ConnectionState::Connected);
        assert_eq!(db.get("ready"), Some(&FieldValue::Bool(true)));
        assert_eq!(db.get("is_mysql"), Some(&FieldValue::Bool(true)));
        assert_eq!(db.client_kind(), ClientKind::Modern);
    }

    #[test]
    fn test_deferred_connect() {
        let script = ServerScript::new();
        let options = Options {
            defer_connect: true,
            ..Options::default()
        };
        let mut db = database_with(&script, options, Authorizer::new(Principal::new("admin"), AllowAll)).unwrap();

        assert_eq!(script.connect_attempts(), 0);
        assert!(matches!(
            db.prepare("WHERE a = %s", &values!["x"]),
            Err(Error::Compile(CompileError::NoConnection))
        ));

        db.ensure_connected().unwrap();
        assert_eq!(
            db.prepare("WHERE a = %s", &values!["x"]).unwrap().as_str(),
            "WHERE a = 'x'"
        );
    }

    #[test]
    fn test_new_fails_when_connect_exhausted() {
        let script = ServerScript::new();
        script.refuse_connects(true);
        let err = database_with(
            &script,
            Options::default(),
            Authorizer::new(Principal::new("admin"), AllowAll),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Connection(ConnectionError::Exhausted { .. })));
        assert_eq!(script.closes(), 0);
    }

    #[test]
    fn test_query_updates_bookkeeping() {
        let script = ServerScript::new().respond(
            "INSERT",
            QueryResult {
                rows_affected: 1,
                last_insert_id: 42,
                ..QueryResult::default()
            },
        );
        let mut db = database(&script);

        db.execute("INSERT INTO posts (title) VALUES (%s)", &values!["Hello"])
            .unwrap();

        assert_eq!(db.insert_id(), 42);
        assert_eq!(db.rows_affected(), 1);
        assert_eq!(db.num_queries(), 1);
        assert_eq!(db.last_query(), Some("INSERT INTO posts (title) VALUES ('Hello')"));
        assert_eq!(db.last_error(), "");
    }

    #[test]
    fn test_compile_error_prevents_execution() {
        let script = ServerScript::new();
        let mut db = database(&script);

        let err = db.execute("SELECT * FROM t WHERE id = %d", &values!["12abc"]).unwrap_err();

        assert!(matches!(
            err,
            Error::Compile(CompileError::TypeCoercionFailed { .. })
        ));
        assert_eq!(script.statements(), vec!["SET NAMES 'utf8mb4'"]);
        assert!(!db.last_error().is_empty());
    }

    #[test]
    fn test_query_error_recorded() {
        let script = ServerScript::new().reject("bogus", "You have an error in your SQL syntax");
        let mut db = database(&script);

        let err = db.query("SELECT bogus(").unwrap_err();

        assert!(matches!(err, Error::Query(_)));
        assert!(db.last_error().contains("SQL syntax"));
        assert_eq!(db.num_queries(), 1);
    }

    #[test]
    fn test_col_info_is_lazy_and_reset_per_query() {
        let columns = vec![
            ColumnInfo {
                name: "ID".into(),
                type_name: "BIGINT".into(),
            },
            ColumnInfo {
                name: "post_title".into(),
                type_name: "TEXT".into(),
            },
        ];
        let script = ServerScript::new().respond(
            "FROM posts",
            QueryResult {
                columns: columns.clone(),
                rows: vec![vec![Some("1".into()), Some("Hello".into())]],
                ..QueryResult::default()
            },
        );
        let mut db = database(&script);

        db.query("SELECT ID, post_title FROM posts").unwrap();
        assert!(!db.has("col_info"));
        assert_eq!(db.get("col_info"), Some(&FieldValue::Columns(columns)));
        assert_eq!(db.num_rows(), 1);

        db.query("DELETE FROM comments").unwrap();
        assert_eq!(db.get("col_info"), Some(&FieldValue::Columns(Vec::new())));
    }

    #[test]
    fn test_protected_fields_survive_external_writes() {
        let script = ServerScript::new();
        let mut db = database(&script);
        let before = db.get("check_current_query").cloned();

        db.set("check_current_query", false);
        db.set("col_meta", "junk");

        assert_eq!(db.get("check_current_query").cloned(), before);
        assert_eq!(db.get("col_meta"), Some(&FieldValue::List(Vec::new())));
    }

    #[test]
    fn test_charset_field_write_feeds_next_negotiation() {
        let script = ServerScript::new();
        let mut db = database(&script);

        db.set("charset", "latin1");
        db.set("collate", "latin1_general_ci");
        db.set_charset(None, None).unwrap();

        assert_eq!(
            script.statements().last().map(String::as_str),
            Some("SET NAMES 'latin1' COLLATE 'latin1_general_ci'")
        );
        assert_eq!(
            db.charset_profile(),
            &CharsetProfile::new("latin1", Some("latin1_general_ci"))
        );
    }

    #[test]
    fn test_guest_charset_write_leaves_profile() {
        let script = ServerScript::new();
        let mut db = database_with(
            &script,
            Options::default(),
            Authorizer::new(Principal::new("guest"), StaticCapabilities::new()),
        )
        .unwrap();
        let before = db.charset_profile().clone();

        db.set("charset", "gbk");
        assert_eq!(db.charset_profile(), &before);

        script.drop_connections();
        db.ensure_connected().unwrap();

        assert_eq!(db.charset_profile(), &before);
        assert!(!db.is_reduced_trust());
        assert!(script.statements().is_empty());
    }

    #[test]
    fn test_set_password_requires_capability() {
        let script = ServerScript::new();
        let mut db = database_with(
            &script,
            Options::default(),
            Authorizer::new(Principal::new("guest"), StaticCapabilities::new()),
        )
        .unwrap();

        let err = db.set_password("alice", "hunter2").unwrap_err();

        assert!(matches!(err, Error::CapabilityDenied { capability: "use_db" }));
        assert!(script.statements().is_empty());
    }

    #[test]
    fn test_set_password_and_surname() {
        let script = ServerScript::new();
        let mut db = database(&script);

        db.set_password("alice", "hunter2").unwrap();
        db.set_surname("o'neil", "O'Neil").unwrap();

        assert_eq!(
            script.statements()[1..],
            [
                "UPDATE users SET password = 'hunter2' WHERE user = 'alice'".to_owned(),
                r"UPDATE users SET surname = 'O\'Neil' WHERE user = 'o\'neil'".to_owned(),
            ]
        );
        assert_eq!(
            db.get("func_call").and_then(FieldValue::as_str),
            Some("set_surname(o'neil)")
        );
    }

    #[test]
    fn test_close_releases_once() {
        let script = ServerScript::new();
        let mut db = database(&script);

        db.close();
        db.close();
        drop(db);

        assert_eq!(script.closes(), 1);
    }

    #[test]
    fn test_drop_releases_connection() {
        let script = ServerScript::new();
        {
            let _db = database(&script);
        }
        assert_eq!(script.closes(), 1);
    }
}
