use crate::builder::PlaceholderKind;

/// Errors raised while compiling a query template into SQL
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The template's placeholders and the supplied values disagree in number
    #[error("Template has {placeholders} placeholder(s) but {values} value(s) were supplied")]
    ArgumentCountMismatch { placeholders: usize, values: usize },

    /// A value cannot be losslessly interpreted as its placeholder's type
    #[error("Value #{index} ({value}) cannot be used for a {expected} placeholder")]
    TypeCoercionFailed {
        index: usize,
        expected: PlaceholderKind,
        value: String,
    },

    /// Escaping needed a live connection and none was available
    #[error("No live connection is available for escaping")]
    NoConnection,

    /// Error while building the template scanner
    #[error("Failed to parse SQL template: {0}")]
    Pattern(#[from] regex::Error),
}

/// Errors raised by charset/collation negotiation
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The acting principal may not change connection settings
    #[error("Principal '{principal}' lacks the '{capability}' capability")]
    CapabilityDenied {
        principal: String,
        capability: &'static str,
    },

    /// The `SET NAMES` directive could not be compiled
    #[error("Failed to compile charset directive: {0}")]
    Compile(#[from] CompileError),

    /// The server rejected the directive or the SQL mode lookup
    #[error("Charset negotiation failed: {0}")]
    Client(#[from] ClientError),
}

/// Errors raised by the connection lifecycle
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The reconnect bound was reached; the instance will not reconnect again
    #[error("Gave up connecting after {attempts} attempt(s): {last_failure}")]
    Exhausted { attempts: u32, last_failure: String },

    /// A single connect or health-check attempt failed and retries remain
    #[error("Connection attempt {attempt} failed: {reason}")]
    Transient { attempt: u32, reason: String },

    /// The connection was torn down explicitly
    #[error("Connection has been closed")]
    Closed,
}

/// Broad classification of a wire-client failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Could not open a session
    Connect,
    /// The session died underneath us ("server has gone away")
    ConnectionLost,
    /// The server rejected the statement
    Query,
}

/// Error reported by a wire-protocol client
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Connect, message)
    }

    pub fn lost(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::ConnectionLost, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Query, message)
    }

    pub fn is_connection_lost(&self) -> bool {
        self.kind == ClientErrorKind::ConnectionLost
    }
}

/// Error types for sqlx-format-bind
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The server rejected a query
    #[error("Query failed: {0}")]
    Query(ClientError),

    /// A privileged helper was called without the required capability
    #[error("Capability '{capability}' is required for this operation")]
    CapabilityDenied { capability: &'static str },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for sqlx-format-bind operations
pub type Result<T> = std::result::Result<T, Error>;
