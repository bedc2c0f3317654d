//! Connection lifecycle: connect, health check, bounded reconnect, teardown.

use crate::capability::Authorizer;
use crate::charset::{CharsetNegotiator, CharsetProfile, SqlModeReport};
use crate::client::{ClientKind, Driver, DriverSet, QueryResult, Session};
use crate::config::{ConnectionConfig, Options};
use crate::escape::SessionEscaper;
use crate::{ConnectionError, Error, NegotiationError, Result};
use std::fmt;
use std::time::Duration;

/// Where a [`ConnectionManager`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Retrying,
    /// Terminal: the reconnect bound was reached
    Failed,
    /// Torn down explicitly
    Closed,
}

/// Bookkeeping for the bounded reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    last_failure: Option<String>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_failure: None,
        }
    }

    /// Failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }

    fn record_failure(&mut self, reason: String) {
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.last_failure = Some(reason);
    }
}

/// Owns the one live session of a database object.
///
/// The wire client is picked once at construction. Every successful connect
/// reads the server's SQL modes, switches the session's escaping to match,
/// and only then re-applies the charset, all before the connection counts as
/// usable.
///
/// Two profiles are tracked: `profile` is what negotiation last applied and
/// changes only when a `SET NAMES` succeeds; `requested` is the writable
/// fallback the next negotiation uses for anything not given explicitly.
pub struct ConnectionManager {
    config: ConnectionConfig,
    client_kind: ClientKind,
    driver: Box<dyn Driver>,
    session: Option<Box<dyn Session>>,
    state: ConnectionState,
    retry: RetryState,
    reconnect_delay: Option<Duration>,
    authorizer: Authorizer,
    profile: CharsetProfile,
    requested: CharsetProfile,
    sql_modes: SqlModeReport,
    charset_failed: bool,
    reduced_trust: bool,
    has_connected: bool,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("client_kind", &self.client_kind)
            .field("state", &self.state)
            .field("retry", &self.retry)
            .field("profile", &self.profile)
            .field("requested", &self.requested)
            .field("reduced_trust", &self.reduced_trust)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Builds a manager in the `Uninitialized` state; nothing is sent yet.
    pub fn new(
        config: ConnectionConfig,
        options: &Options,
        drivers: DriverSet,
        authorizer: Authorizer,
    ) -> Result<Self> {
        config.endpoint()?;
        let (client_kind, driver) = drivers
            .choose(options.use_legacy_client)
            .ok_or_else(|| Error::Config("no usable wire client is available".to_owned()))?;
        tracing::debug!(client = %client_kind, "selected wire client");

        let profile = CharsetProfile::new(options.charset.clone(), options.collation.clone());
        Ok(Self {
            config,
            client_kind,
            driver,
            session: None,
            state: ConnectionState::Uninitialized,
            retry: RetryState::new(options.max_reconnect_attempts),
            reconnect_delay: options.reconnect_delay,
            authorizer,
            requested: profile.clone(),
            profile,
            sql_modes: SqlModeReport::default(),
            charset_failed: false,
            reduced_trust: false,
            has_connected: false,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn client_kind(&self) -> ClientKind {
        self.client_kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// The profile last applied to a session by negotiation.
    pub fn profile(&self) -> &CharsetProfile {
        &self.profile
    }

    /// The profile the next negotiation falls back to.
    pub fn requested_profile(&self) -> &CharsetProfile {
        &self.requested
    }

    /// Changes what future negotiations fall back to. Neither the live
    /// session nor the applied [`profile`](Self::profile) is touched.
    pub fn request_profile(&mut self, profile: CharsetProfile) {
        self.requested = profile;
    }

    pub fn sql_modes(&self) -> &SqlModeReport {
        &self.sql_modes
    }

    /// Set when the server's SQL modes or charset undermine the escaping
    /// assumptions, or when the server refused the last `SET NAMES`.
    /// Advisory only.
    pub fn is_reduced_trust(&self) -> bool {
        self.reduced_trust
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.session.is_some()
    }

    /// Whether a connect has ever succeeded on this manager.
    pub fn has_connected(&self) -> bool {
        self.has_connected
    }

    /// Escaper over the live session, or one that reports `NoConnection`.
    pub fn escaper(&self) -> SessionEscaper<'_> {
        let session = if self.state == ConnectionState::Connected {
            self.session.as_deref()
        } else {
            None
        };
        SessionEscaper::new(session)
    }

    /// Connects if no session is open, retrying up to the bound.
    pub fn connect(&mut self) -> std::result::Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Failed => return Err(self.exhausted()),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Connected if self.session.is_some() => return Ok(()),
            _ => {}
        }

        loop {
            self.state = ConnectionState::Connecting;
            match self.attempt() {
                Ok(()) => return Ok(()),
                Err(ConnectionError::Transient { attempt, reason }) => {
                    if self.retry.is_exhausted() {
                        self.state = ConnectionState::Failed;
                        tracing::error!(
                            attempts = attempt,
                            host = self.config.host(),
                            reason = %reason,
                            "giving up on database connection"
                        );
                        return Err(self.exhausted());
                    }
                    self.state = ConnectionState::Retrying;
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts(),
                        reason = %reason,
                        "database connection attempt failed, retrying"
                    );
                    if let Some(delay) = self.reconnect_delay {
                        std::thread::sleep(delay);
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Health-checks the live session and reconnects if it is gone.
    pub fn ensure_connected(&mut self) -> std::result::Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected {
            return self.connect();
        }
        let Some(session) = self.session.as_mut() else {
            return self.connect();
        };
        match session.ping() {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "health check failed, reconnecting");
                self.mark_lost();
                self.connect()
            }
        }
    }

    /// Runs one statement, reconnecting and replaying it once if the
    /// connection turns out to be gone.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.connect()?;
        match self.run(sql) {
            Err(e) if e.is_connection_lost() => {
                tracing::warn!(error = %e, "connection lost during query, reconnecting");
                self.mark_lost();
                self.connect()?;
                self.run(sql).map_err(|e| {
                    if e.is_connection_lost() {
                        self.mark_lost();
                    }
                    Error::Query(e)
                })
            }
            other => other.map_err(Error::Query),
        }
    }

    /// Re-applies the charset on the live session.
    ///
    /// A principal without the `use_db` capability leaves the profile as it
    /// was; that is not an error. A `SET NAMES` the server rejects is, and
    /// also puts the connection in reduced trust.
    pub fn set_charset(
        &mut self,
        charset: Option<&str>,
        collation: Option<&str>,
    ) -> Result<&CharsetProfile> {
        self.connect()?;
        self.negotiate_charset(charset, collation)?;
        Ok(&self.profile)
    }

    /// Releases the session. Later calls are no-ops.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            tracing::debug!(host = self.config.host(), "database connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    fn run(&mut self, sql: &str) -> std::result::Result<QueryResult, crate::ClientError> {
        match self.session.as_mut() {
            Some(session) => session.execute(sql),
            None => Err(crate::ClientError::lost("no open session")),
        }
    }

    fn attempt(&mut self) -> std::result::Result<(), ConnectionError> {
        let session = match self.driver.connect(&self.config) {
            Ok(session) => session,
            Err(e) => return Err(self.failed_attempt(e.message)),
        };
        self.session = Some(session);
        self.charset_failed = false;

        // Escaping must match the server before anything is compiled for it,
        // the charset directive included.
        if let Err(e) = self.read_sql_modes() {
            if let Some(session) = self.session.take() {
                session.close();
            }
            return Err(self.failed_attempt(format!("could not read SQL modes: {e}")));
        }

        self.retry.reset();
        self.has_connected = true;
        if let Err(e) = self.negotiate_charset(None, None) {
            tracing::warn!(error = %e, "charset negotiation failed, keeping previous profile");
        }
        self.state = ConnectionState::Connected;
        tracing::info!(
            client = %self.client_kind,
            host = self.config.host(),
            database = self.config.database(),
            "connected to database"
        );
        Ok(())
    }

    fn failed_attempt(&mut self, reason: String) -> ConnectionError {
        self.retry.record_failure(reason.clone());
        ConnectionError::Transient {
            attempt: self.retry.attempts(),
            reason,
        }
    }

    fn read_sql_modes(&mut self) -> std::result::Result<(), NegotiationError> {
        let Some(session) = self.session.as_deref_mut() else {
            return Ok(());
        };
        let report = CharsetNegotiator::new(&self.authorizer).inspect_sql_modes(session)?;
        session.set_no_backslash_escapes(report.no_backslash_escapes());
        self.sql_modes = report;
        Ok(())
    }

    fn negotiate_charset(
        &mut self,
        charset: Option<&str>,
        collation: Option<&str>,
    ) -> std::result::Result<(), NegotiationError> {
        let Some(session) = self.session.as_deref_mut() else {
            return Ok(());
        };
        let outcome = CharsetNegotiator::new(&self.authorizer).negotiate(
            session,
            &self.requested,
            charset,
            collation,
        );

        let outcome = match outcome {
            Ok(profile) => {
                self.requested = profile.clone();
                self.profile = profile;
                self.charset_failed = false;
                Ok(())
            }
            Err(NegotiationError::CapabilityDenied {
                principal,
                capability,
            }) => {
                tracing::debug!(
                    principal = %principal,
                    capability,
                    "charset change not permitted, keeping existing profile"
                );
                Ok(())
            }
            Err(e) => {
                self.charset_failed = true;
                Err(e)
            }
        };
        self.update_trust();
        outcome
    }

    fn update_trust(&mut self) {
        self.reduced_trust = self.charset_failed
            || !self.sql_modes.is_compatible()
            || self.profile.is_backslash_unsafe();
        if self.reduced_trust {
            tracing::warn!(
                charset = %self.profile.charset,
                modes = ?self.sql_modes.incompatible,
                charset_failed = self.charset_failed,
                "connection is running with reduced escaping trust"
            );
        }
    }

    fn mark_lost(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.state = ConnectionState::Retrying;
    }

    fn exhausted(&self) -> ConnectionError {
        ConnectionError::Exhausted {
            attempts: self.retry.attempts(),
            last_failure: self
                .retry
                .last_failure()
                .unwrap_or("unknown failure")
                .to_owned(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
