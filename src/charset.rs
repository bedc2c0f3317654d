//! Charset/collation negotiation and SQL-mode safety checks.

use crate::capability::{Authorizer, CAP_USE_DB};
use crate::client::Session;
use crate::escape::SessionEscaper;
use crate::query::compile;
use crate::{NegotiationError, Value};

/// SQL modes that break the assumptions the escaping and comparison logic
/// relies on.
pub const INCOMPATIBLE_MODES: &[&str] = &[
    "NO_ZERO_DATE",
    "ONLY_FULL_GROUP_BY",
    "STRICT_TRANS_TABLES",
    "STRICT_ALL_TABLES",
    "TRADITIONAL",
];

/// Charsets in which `0x5C` can be the trailing byte of a multibyte
/// character, defeating backslash escaping of client-side text.
const BACKSLASH_UNSAFE_CHARSETS: &[&str] = &["big5", "cp932", "gb2312", "gbk", "sjis"];

const SET_NAMES_TEMPLATE: &str = "SET NAMES %s";
const COLLATE_TEMPLATE: &str = " COLLATE %s";
const SQL_MODE_QUERY: &str = "SELECT @@SESSION.sql_mode";

/// The character set and collation a connection uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetProfile {
    pub charset: String,
    pub collation: Option<String>,
}

impl CharsetProfile {
    pub fn new(charset: impl Into<String>, collation: Option<impl Into<String>>) -> Self {
        Self {
            charset: charset.into(),
            collation: collation.map(Into::into),
        }
    }

    /// Whether backslash escaping can be undermined by this charset.
    pub fn is_backslash_unsafe(&self) -> bool {
        BACKSLASH_UNSAFE_CHARSETS
            .iter()
            .any(|cs| cs.eq_ignore_ascii_case(&self.charset))
    }
}

/// The server's active SQL modes, checked against [`INCOMPATIBLE_MODES`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlModeReport {
    pub modes: Vec<String>,
    pub incompatible: Vec<String>,
}

impl SqlModeReport {
    /// Parses the comma separated value of `@@sql_mode`.
    pub fn parse(raw: &str) -> Self {
        let modes: Vec<String> = raw
            .split(',')
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        let incompatible = modes
            .iter()
            .filter(|m| INCOMPATIBLE_MODES.contains(&m.as_str()))
            .cloned()
            .collect();
        Self {
            modes,
            incompatible,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.incompatible.is_empty()
    }

    pub fn no_backslash_escapes(&self) -> bool {
        self.modes.iter().any(|m| m == "NO_BACKSLASH_ESCAPES")
    }
}

/// Applies a charset profile to a session on behalf of a principal.
///
/// The `SET NAMES` directive goes through the placeholder compiler like any
/// other statement, so the charset and collation names are escaped too.
#[derive(Debug)]
pub struct CharsetNegotiator<'a> {
    authorizer: &'a Authorizer,
}

impl<'a> CharsetNegotiator<'a> {
    pub fn new(authorizer: &'a Authorizer) -> Self {
        Self { authorizer }
    }

    /// Sets the session charset, falling back to `fallback` for anything not
    /// requested.
    ///
    /// The directive is escaped with the session's current escape mode, so
    /// the session must already match the server's SQL modes
    /// (see [`inspect_sql_modes`](Self::inspect_sql_modes)).
    ///
    /// # Errors
    ///
    /// [`NegotiationError::CapabilityDenied`] if the principal lacks `use_db`;
    /// nothing is sent to the server in that case.
    pub fn negotiate(
        &self,
        session: &mut dyn Session,
        fallback: &CharsetProfile,
        charset: Option<&str>,
        collation: Option<&str>,
    ) -> Result<CharsetProfile, NegotiationError> {
        let charset = charset.unwrap_or(fallback.charset.as_str());
        let collation = collation
            .or(fallback.collation.as_deref())
            .filter(|c| !c.is_empty());

        if !self.authorizer.allows(CAP_USE_DB) {
            return Err(NegotiationError::CapabilityDenied {
                principal: self.authorizer.principal().to_string(),
                capability: CAP_USE_DB,
            });
        }

        let directive = {
            let escaper = SessionEscaper::new(Some(&*session));
            let mut sql = compile(SET_NAMES_TEMPLATE, &[Value::from(charset)], &escaper)?
                .into_string();
            if let Some(collation) = collation {
                sql.push_str(compile(COLLATE_TEMPLATE, &[Value::from(collation)], &escaper)?.as_str());
            }
            sql
        };
        session.execute(&directive)?;
        tracing::debug!(charset, collation, "applied connection charset");

        Ok(CharsetProfile::new(charset, collation))
    }

    /// Reads the session's SQL modes and flags the incompatible ones.
    pub fn inspect_sql_modes(
        &self,
        session: &mut dyn Session,
    ) -> Result<SqlModeReport, NegotiationError> {
        let result = session.execute(SQL_MODE_QUERY)?;
        let report = SqlModeReport::parse(result.scalar().unwrap_or_default());
        if !report.is_compatible() {
            tracing::warn!(
                modes = ?report.incompatible,
                "server SQL mode is incompatible with escaping assumptions"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AllowAll, Principal, StaticCapabilities};
    use crate::test_utils::{ScriptedDriver, ServerScript};
    use crate::client::Driver;
    use crate::config::ConnectionConfig;

    fn session(script: &ServerScript) -> Box<dyn Session> {
        let driver = ScriptedDriver::new(script.clone());
        driver
            .connect(&ConnectionConfig::new("u", "p", "db", "localhost"))
            .unwrap()
    }

    #[test]
    fn test_sql_mode_report_parse() {
        let report = SqlModeReport::parse("strict_trans_tables, NO_ENGINE_SUBSTITUTION,,TRADITIONAL");
        assert_eq!(
            report.modes,
            vec!["STRICT_TRANS_TABLES", "NO_ENGINE_SUBSTITUTION", "TRADITIONAL"]
        );
        assert_eq!(report.incompatible, vec!["STRICT_TRANS_TABLES", "TRADITIONAL"]);
        assert!(!report.is_compatible());
        assert!(!report.no_backslash_escapes());
    }

    #[test]
    fn test_sql_mode_report_empty() {
        let report = SqlModeReport::parse("");
        assert!(report.modes.is_empty());
        assert!(report.is_compatible());
    }

    #[test]
    fn test_backslash_unsafe_charsets() {
        assert!(CharsetProfile::new("GBK", None::<String>).is_backslash_unsafe());
        assert!(!CharsetProfile::new("utf8mb4", None::<String>).is_backslash_unsafe());
    }

    #[test]
    fn test_negotiate_escapes_directive() {
        let script = ServerScript::new();
        let mut session = session(&script);
        let auth = Authorizer::new(Principal::new("admin"), AllowAll);
        let current = CharsetProfile::new("utf8", None::<String>);

        let profile = CharsetNegotiator::new(&auth)
            .negotiate(session.as_mut(), &current, Some("utf8mb4"), Some("utf8mb4_unicode_ci"))
            .unwrap();

        assert_eq!(profile, CharsetProfile::new("utf8mb4", Some("utf8mb4_unicode_ci")));
        assert_eq!(
            script.executed(),
            vec!["SET NAMES 'utf8mb4' COLLATE 'utf8mb4_unicode_ci'"]
        );
    }

    #[test]
    fn test_negotiate_hostile_charset_name_is_escaped() {
        let script = ServerScript::new();
        let mut session = session(&script);
        let auth = Authorizer::new(Principal::new("admin"), AllowAll);
        let current = CharsetProfile::new("utf8", None::<String>);

        CharsetNegotiator::new(&auth)
            .negotiate(session.as_mut(), &current, Some("utf8'; DROP TABLE users; --"), None)
            .unwrap();

        assert_eq!(
            script.executed(),
            vec![r"SET NAMES 'utf8\'; DROP TABLE users; --'"]
        );
    }

    #[test]
    fn test_negotiate_uses_session_escape_mode() {
        let script = ServerScript::new();
        let mut session = session(&script);
        session.set_no_backslash_escapes(true);
        let auth = Authorizer::new(Principal::new("admin"), AllowAll);
        let fallback = CharsetProfile::new("utf8", None::<String>);

        CharsetNegotiator::new(&auth)
            .negotiate(session.as_mut(), &fallback, Some(r"utf8\' , @x='1"), None)
            .unwrap();

        assert_eq!(script.executed(), vec![r"SET NAMES 'utf8\'' , @x=''1'"]);
    }

    #[test]
    fn test_negotiate_falls_back_to_current_profile() {
        let script = ServerScript::new();
        let mut session = session(&script);
        let auth = Authorizer::new(Principal::new("admin"), AllowAll);
        let current = CharsetProfile::new("latin1", Some("latin1_swedish_ci"));

        let profile = CharsetNegotiator::new(&auth)
            .negotiate(session.as_mut(), &current, None, None)
            .unwrap();

        assert_eq!(profile, current);
        assert_eq!(
            script.executed(),
            vec!["SET NAMES 'latin1' COLLATE 'latin1_swedish_ci'"]
        );
    }

    #[test]
    fn test_negotiate_without_capability_sends_nothing() {
        let script = ServerScript::new();
        let mut session = session(&script);
        let auth = Authorizer::new(Principal::new("guest"), StaticCapabilities::new());
        let current = CharsetProfile::new("utf8", None::<String>);

        let err = CharsetNegotiator::new(&auth)
            .negotiate(session.as_mut(), &current, Some("latin1"), None)
            .unwrap_err();

        assert!(matches!(err, NegotiationError::CapabilityDenied { .. }));
        assert!(script.executed().is_empty());
    }

    #[test]
    fn test_inspect_sql_modes() {
        let script = ServerScript::new().sql_mode("ONLY_FULL_GROUP_BY,NO_BACKSLASH_ESCAPES");
        let mut session = session(&script);
        let auth = Authorizer::new(Principal::new("admin"), AllowAll);

        let report = CharsetNegotiator::new(&auth)
            .inspect_sql_modes(session.as_mut())
            .unwrap();

        assert_eq!(report.incompatible, vec!["ONLY_FULL_GROUP_BY"]);
        assert!(report.no_backslash_escapes());
    }
}
