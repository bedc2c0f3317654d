//! Connection settings and construction-time options.

use crate::{Error, Result};
use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3306;

/// Environment variable names
mod vars {
    pub const DB_USER: &str = "DB_USER";
    pub const DB_PASSWORD: &str = "DB_PASSWORD";
    pub const DB_NAME: &str = "DB_NAME";
    pub const DB_HOST: &str = "DB_HOST";
    pub const DB_USE_LEGACY_CLIENT: &str = "DB_USE_LEGACY_CLIENT";
    pub const DB_SHOW_ERRORS: &str = "DB_SHOW_ERRORS";
    pub const DB_SUPPRESS_ERRORS: &str = "DB_SUPPRESS_ERRORS";
    pub const DB_CHARSET: &str = "DB_CHARSET";
    pub const DB_COLLATE: &str = "DB_COLLATE";
    pub const DB_RECONNECT_RETRIES: &str = "DB_RECONNECT_RETRIES";
    pub const DB_RECONNECT_DELAY_MS: &str = "DB_RECONNECT_DELAY_MS";
    pub const DB_DEFER_CONNECT: &str = "DB_DEFER_CONNECT";
}

/// Where the server listens, parsed from the `host` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Socket { path: String },
}

/// Credentials and location of the database. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    user: String,
    password: String,
    database: String,
    host: String,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("host", &self.host)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            database: database.into(),
            host: host.into(),
        }
    }

    /// Reads `DB_USER`, `DB_PASSWORD`, `DB_NAME` and `DB_HOST`.
    ///
    /// `DB_HOST` defaults to `localhost` and `DB_PASSWORD` to empty. A
    /// `DB_HOST` that does not parse is rejected here rather than at connect.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            env::var(name).map_err(|_| Error::Config(format!("{name} is not set")))
        };
        let config = Self::new(
            required(vars::DB_USER)?,
            env::var(vars::DB_PASSWORD).unwrap_or_default(),
            required(vars::DB_NAME)?,
            env::var(vars::DB_HOST).unwrap_or_else(|_| "localhost".to_owned()),
        );
        config.endpoint()?;
        Ok(config)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Splits `host` into a TCP address or a socket path.
    ///
    /// Accepts `host`, `host:port`, `host:/path/to.sock`, `/path/to.sock`,
    /// bracketed IPv6 (`[::1]:3307`) and the persistent-connection prefix
    /// `p:`, which is ignored.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty host, an unterminated IPv6 bracket or a
    /// port that is not a number in `1..=65535`.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let host = self.host.strip_prefix("p:").unwrap_or(&self.host);
        if host.is_empty() {
            return Err(Error::Config(format!("{} is empty", vars::DB_HOST)));
        }

        if host.starts_with('/') {
            return Ok(Endpoint::Socket {
                path: host.to_owned(),
            });
        }

        if let Some(rest) = host.strip_prefix('[') {
            let (addr, tail) = rest.split_once(']').ok_or_else(|| {
                Error::Config(format!("Invalid {}: unterminated '[' in {host}", vars::DB_HOST))
            })?;
            let port = match tail {
                "" => DEFAULT_PORT,
                _ => match tail.strip_prefix(':') {
                    Some(port) => parse_port(port)?,
                    None => {
                        return Err(Error::Config(format!(
                            "Invalid {}: unexpected {tail:?} after ']'",
                            vars::DB_HOST
                        )))
                    }
                },
            };
            return Ok(Endpoint::Tcp {
                host: addr.to_owned(),
                port,
            });
        }

        match host.split_once(':') {
            Some((_, path)) if path.starts_with('/') => Ok(Endpoint::Socket {
                path: path.to_owned(),
            }),
            Some((name, port)) => Ok(Endpoint::Tcp {
                host: name.to_owned(),
                port: parse_port(port)?,
            }),
            None => Ok(Endpoint::Tcp {
                host: host.to_owned(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::Config(format!(
            "Invalid {}: port {raw:?} is not in 1..=65535",
            vars::DB_HOST
        ))),
    }
}

/// Options resolved once when a [`Database`](crate::Database) is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// `Some(true)` forces the legacy wire client, `Some(false)` the modern one
    pub use_legacy_client: Option<bool>,
    /// Report query failures at error level
    pub show_errors: bool,
    /// Do not report query failures at all
    pub suppress_errors: bool,
    /// Connect attempts before the manager gives up for good
    pub max_reconnect_attempts: u32,
    /// Pause between attempts; `None` retries immediately
    pub reconnect_delay: Option<Duration>,
    pub charset: String,
    pub collation: Option<String>,
    /// Build the object without connecting
    pub defer_connect: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            use_legacy_client: None,
            show_errors: false,
            suppress_errors: false,
            max_reconnect_attempts: 5,
            reconnect_delay: None,
            charset: "utf8mb4".to_owned(),
            collation: None,
            defer_connect: false,
        }
    }
}

impl Options {
    /// Defaults overridden by any `DB_*` option variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();

        if let Ok(val) = env::var(vars::DB_USE_LEGACY_CLIENT) {
            options.use_legacy_client = Some(parse_bool(&val));
        }
        if let Ok(val) = env::var(vars::DB_SHOW_ERRORS) {
            options.show_errors = parse_bool(&val);
        }
        if let Ok(val) = env::var(vars::DB_SUPPRESS_ERRORS) {
            options.suppress_errors = parse_bool(&val);
        }
        if let Ok(val) = env::var(vars::DB_CHARSET) {
            options.charset = val;
        }
        if let Ok(val) = env::var(vars::DB_COLLATE) {
            options.collation = Some(val).filter(|c| !c.is_empty());
        }
        if let Ok(val) = env::var(vars::DB_RECONNECT_RETRIES) {
            options.max_reconnect_attempts = val.parse().map_err(|e| {
                Error::Config(format!("Invalid {}: {e}", vars::DB_RECONNECT_RETRIES))
            })?;
        }
        if let Ok(val) = env::var(vars::DB_RECONNECT_DELAY_MS) {
            let ms: u64 = val.parse().map_err(|e| {
                Error::Config(format!("Invalid {}: {e}", vars::DB_RECONNECT_DELAY_MS))
            })?;
            options.reconnect_delay = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Ok(val) = env::var(vars::DB_DEFER_CONNECT) {
            options.defer_connect = parse_bool(&val);
        }

        if options.max_reconnect_attempts == 0 {
            return Err(Error::Config(format!(
                "{} must be at least 1",
                vars::DB_RECONNECT_RETRIES
            )));
        }
        Ok(options)
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> Endpoint {
        ConnectionConfig::new("u", "p", "db", host).endpoint().unwrap()
    }

    #[test]
    fn test_endpoint_plain_host() {
        assert_eq!(
            endpoint("db.internal"),
            Endpoint::Tcp {
                host: "db.internal".into(),
                port: 3306
            }
        );
    }

    #[test]
    fn test_endpoint_host_and_port() {
        assert_eq!(
            endpoint("p:127.0.0.1:3307"),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 3307
            }
        );
    }

    #[test]
    fn test_endpoint_socket() {
        assert_eq!(
            endpoint("localhost:/var/run/mysqld/mysqld.sock"),
            Endpoint::Socket {
                path: "/var/run/mysqld/mysqld.sock".into()
            }
        );
        assert_eq!(
            endpoint("/tmp/mysql.sock"),
            Endpoint::Socket {
                path: "/tmp/mysql.sock".into()
            }
        );
    }

    #[test]
    fn test_endpoint_ipv6() {
        assert_eq!(
            endpoint("[::1]:3310"),
            Endpoint::Tcp {
                host: "::1".into(),
                port: 3310
            }
        );
    }

    #[test]
    fn test_endpoint_ipv6_default_port() {
        assert_eq!(
            endpoint("[fe80::1]"),
            Endpoint::Tcp {
                host: "fe80::1".into(),
                port: 3306
            }
        );
    }

    #[test]
    fn test_endpoint_rejects_malformed_port() {
        for host in ["db:33o7", "[::1]:x", "db:", "db:0", "db:70000", "[::1", "[::1]3307", ""] {
            let err = ConnectionConfig::new("u", "p", "db", host).endpoint();
            assert!(matches!(err, Err(Error::Config(_))), "{host:?} was accepted");
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("root", "s3cret", "app", "localhost");
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.max_reconnect_attempts, 5);
        assert_eq!(options.charset, "utf8mb4");
        assert!(options.reconnect_delay.is_none());
    }
}
