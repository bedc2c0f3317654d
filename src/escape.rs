use crate::client::Session;
use crate::CompileError;

/// How string literals are escaped for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    /// MySQL's default: special characters are backslash-escaped
    #[default]
    Backslash,
    /// The server runs with `NO_BACKSLASH_ESCAPES`; only `'` is doubled
    QuoteDoubling,
}

/// Escapes a raw string so it can sit between single quotes in a MySQL
/// statement. The surrounding quotes are not added.
///
/// # Examples
///
/// ```
/// use sqlx_format_bind::escape::{escape_string, EscapeMode};
///
/// assert_eq!(escape_string("O'Brien", EscapeMode::Backslash), r"O\'Brien");
/// assert_eq!(escape_string("O'Brien", EscapeMode::QuoteDoubling), "O''Brien");
/// ```
pub fn escape_string(raw: &str, mode: EscapeMode) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    match mode {
        EscapeMode::Backslash => {
            for ch in raw.chars() {
                match ch {
                    '\0' => out.push_str("\\0"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    '"' => out.push_str("\\\""),
                    '\x1a' => out.push_str("\\Z"),
                    _ => out.push(ch),
                }
            }
        }
        EscapeMode::QuoteDoubling => {
            for ch in raw.chars() {
                if ch == '\'' {
                    out.push('\'');
                }
                out.push(ch);
            }
        }
    }
    out
}

/// Source of string escaping for the placeholder compiler.
pub trait EscapeProvider {
    /// Returns `raw` escaped for inclusion inside a quoted literal.
    fn escape(&self, raw: &str) -> Result<String, CompileError>;
}

/// Escapes through a live session's native primitive.
///
/// Built with no session, every call fails with [`CompileError::NoConnection`].
pub struct SessionEscaper<'a> {
    session: Option<&'a dyn Session>,
}

impl<'a> SessionEscaper<'a> {
    pub fn new(session: Option<&'a dyn Session>) -> Self {
        Self { session }
    }
}

impl EscapeProvider for SessionEscaper<'_> {
    fn escape(&self, raw: &str) -> Result<String, CompileError> {
        self.session
            .map(|s| s.escape(raw))
            .ok_or(CompileError::NoConnection)
    }
}

impl<F> EscapeProvider for F
where
    F: Fn(&str) -> String,
{
    fn escape(&self, raw: &str) -> Result<String, CompileError> {
        Ok(self(raw))
    }
}
