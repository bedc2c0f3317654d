use crate::config::ConnectionConfig;
use crate::ClientError;
use std::fmt;

/// Column metadata reported for a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

/// Outcome of one statement sent through a [`Session`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    /// Rows as text, `None` for SQL `NULL`
    pub rows: Vec<Vec<Option<String>>>,
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

impl QueryResult {
    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

/// A live database session opened by a [`Driver`].
///
/// Dropping the box without calling [`Session::close`] still releases the
/// underlying connection; `close` is the orderly path.
pub trait Session {
    /// The connection's native string escaping primitive.
    fn escape(&self, raw: &str) -> String;

    /// Tells the session whether the server runs with `NO_BACKSLASH_ESCAPES`.
    fn set_no_backslash_escapes(&mut self, _enabled: bool) {}

    fn execute(&mut self, sql: &str) -> Result<QueryResult, ClientError>;

    /// Cheap round-trip used as a health check.
    fn ping(&mut self) -> Result<(), ClientError>;

    fn close(self: Box<Self>);
}

/// A wire-protocol client able to open sessions.
pub trait Driver {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, ClientError>;
}

/// Which wire-protocol client a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Binary prepared-statement protocol
    Modern,
    /// Text protocol
    Legacy,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientKind::Modern => "modern",
            ClientKind::Legacy => "legacy",
        })
    }
}

/// Lowest modern client release preferred without an explicit override.
pub const MODERN_MIN_VERSION: (u32, u32) = (0, 8);

/// What the host environment offers when a client is picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEnvironment {
    pub modern_available: bool,
    pub legacy_available: bool,
    /// `(major, minor)` of the modern client
    pub modern_version: (u32, u32),
    /// Whether this build is a pre-release
    pub prerelease: bool,
}

impl ClientEnvironment {
    /// Both sqlx protocols are compiled in.
    pub fn detect() -> Self {
        Self {
            modern_available: true,
            legacy_available: true,
            modern_version: MODERN_MIN_VERSION,
            prerelease: env!("CARGO_PKG_VERSION").contains('-'),
        }
    }
}

impl ClientKind {
    /// Picks the client for a new connection manager.
    ///
    /// `use_legacy` is the explicit override; `None` lets the environment decide.
    pub fn select(use_legacy: Option<bool>, env: &ClientEnvironment) -> Self {
        if !env.modern_available {
            return ClientKind::Legacy;
        }
        if let Some(legacy) = use_legacy {
            return if legacy && env.legacy_available {
                ClientKind::Legacy
            } else {
                ClientKind::Modern
            };
        }
        if !env.legacy_available || env.modern_version >= MODERN_MIN_VERSION || env.prerelease {
            ClientKind::Modern
        } else {
            ClientKind::Legacy
        }
    }
}

/// The wire-protocol clients a connection manager may choose from.
pub struct DriverSet {
    pub modern: Option<Box<dyn Driver>>,
    pub legacy: Option<Box<dyn Driver>>,
    pub environment: ClientEnvironment,
}

impl fmt::Debug for DriverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSet")
            .field("modern", &self.modern.is_some())
            .field("legacy", &self.legacy.is_some())
            .field("environment", &self.environment)
            .finish()
    }
}

impl DriverSet {
    /// A set holding a single driver used for both kinds.
    pub fn single(driver: Box<dyn Driver>) -> Self {
        Self {
            modern: Some(driver),
            legacy: None,
            environment: ClientEnvironment {
                modern_available: true,
                legacy_available: false,
                modern_version: MODERN_MIN_VERSION,
                prerelease: false,
            },
        }
    }

    /// Both sqlx-backed MySQL clients.
    pub fn sqlx() -> Result<Self, ClientError> {
        use crate::sqlx_driver::SqlxDriver;

        Ok(Self {
            modern: Some(Box::new(SqlxDriver::new(ClientKind::Modern)?)),
            legacy: Some(Box::new(SqlxDriver::new(ClientKind::Legacy)?)),
            environment: ClientEnvironment::detect(),
        })
    }

    /// Resolves the override against what is available and hands out the
    /// chosen driver.
    pub fn choose(self, use_legacy: Option<bool>) -> Option<(ClientKind, Box<dyn Driver>)> {
        let kind = ClientKind::select(use_legacy, &self.environment);
        match kind {
            ClientKind::Modern => self.modern.map(|d| (kind, d)),
            ClientKind::Legacy => self.legacy.map(|d| (kind, d)),
        }
    }
}
