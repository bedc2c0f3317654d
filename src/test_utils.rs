//! An in-memory wire client for exercising connection handling without a
//! server.
//!
//! A [`ServerScript`] is a shared handle onto a fake server: tests configure
//! it, hand a [`ScriptedDriver`] built from it to a database object, then use
//! the same handle to inject failures and inspect what was sent.

use crate::client::{ColumnInfo, Driver, QueryResult, Session};
use crate::config::ConnectionConfig;
use crate::escape::{escape_string, EscapeMode};
use crate::ClientError;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct ScriptState {
    sql_mode: String,
    refuse_connects: bool,
    failing_connects: u32,
    generation: u64,
    connect_attempts: u32,
    connects: u32,
    closes: u32,
    pings: u32,
    executed: Vec<String>,
    responses: Vec<(String, QueryResult)>,
    failures: Vec<(String, String)>,
}

/// Shared handle onto a fake MySQL server.
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    state: Rc<RefCell<ScriptState>>,
}

impl ServerScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value reported for `@@SESSION.sql_mode`.
    pub fn sql_mode(self, modes: &str) -> Self {
        self.state.borrow_mut().sql_mode = modes.to_owned();
        self
    }

    /// Canned result for any statement containing `pattern`.
    pub fn respond(self, pattern: &str, result: QueryResult) -> Self {
        self.state
            .borrow_mut()
            .responses
            .push((pattern.to_owned(), result));
        self
    }

    /// Server-side error for any statement containing `pattern`.
    pub fn reject(self, pattern: &str, message: &str) -> Self {
        self.state
            .borrow_mut()
            .failures
            .push((pattern.to_owned(), message.to_owned()));
        self
    }

    /// The next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.borrow_mut().failing_connects = n;
    }

    /// Every connect attempt fails while `refuse` is set.
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.borrow_mut().refuse_connects = refuse;
    }

    /// Kills every open session, as if the server restarted.
    pub fn drop_connections(&self) {
        self.state.borrow_mut().generation += 1;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.borrow().connect_attempts
    }

    pub fn connects(&self) -> u32 {
        self.state.borrow().connects
    }

    pub fn closes(&self) -> u32 {
        self.state.borrow().closes
    }

    pub fn pings(&self) -> u32 {
        self.state.borrow().pings
    }

    /// Every statement that reached a live session, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    /// Executed statements other than the SQL-mode lookup.
    pub fn statements(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|s| !s.contains("@@SESSION.sql_mode"))
            .collect()
    }
}

/// A [`Driver`] backed by a [`ServerScript`].
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    script: ServerScript,
}

impl ScriptedDriver {
    pub fn new(script: ServerScript) -> Self {
        Self { script }
    }
}

impl Driver for ScriptedDriver {
    fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Session>, ClientError> {
        let mut state = self.script.state.borrow_mut();
        state.connect_attempts += 1;
        if state.refuse_connects {
            return Err(ClientError::connect("Connection refused"));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ClientError::connect("Connection timed out"));
        }
        state.connects += 1;
        Ok(Box::new(ScriptedSession {
            state: Rc::clone(&self.script.state),
            generation: state.generation,
            mode: EscapeMode::Backslash,
        }))
    }
}

struct ScriptedSession {
    state: Rc<RefCell<ScriptState>>,
    generation: u64,
    mode: EscapeMode,
}

impl ScriptedSession {
    fn alive(&self) -> Result<(), ClientError> {
        if self.state.borrow().generation == self.generation {
            Ok(())
        } else {
            Err(ClientError::lost("MySQL server has gone away"))
        }
    }
}

impl Session for ScriptedSession {
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
        self.alive()?;
        let mut state = self.state.borrow_mut();
        state.executed.push(sql.to_owned());

        if let Some((_, message)) = state.failures.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(ClientError::query(message.clone()));
        }
        if sql.contains("@@SESSION.sql_mode") {
            return Ok(QueryResult {
                columns: vec![ColumnInfo {
                    name: "@@SESSION.sql_mode".to_owned(),
                    type_name: "VARCHAR".to_owned(),
                }],
                rows: vec![vec![Some(state.sql_mode.clone())]],
                ..QueryResult::default()
            });
        }
        Ok(state
            .responses
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_default())
    }

    fn ping(&mut self) -> Result<(), ClientError> {
        self.state.borrow_mut().pings += 1;
        self.alive()
    }

    fn close(self: Box<Self>) {
        self.state.borrow_mut().closes += 1;
    }
}
