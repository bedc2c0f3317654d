use crate::builder::{parse_template, PlaceholderKind, Segment};
use crate::escape::EscapeProvider;
use crate::{CompileError, Value};
use std::fmt;

/// Largest integer an `f64` represents exactly.
const MAX_EXACT_FLOAT_INT: i64 = 1 << 53;

/// A fully escaped, substituted SQL statement.
///
/// Produced fresh by every [`compile`] call; nothing here is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery(String);

impl PreparedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for PreparedQuery {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreparedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PreparedQuery> for String {
    fn from(q: PreparedQuery) -> Self {
        q.0
    }
}

/// Compiles a format-style template and its values into one SQL string.
///
/// The template is parsed first and every placeholder position fixed before
/// any value is looked at; values are then rendered by declared type:
///
/// - `%s` escapes through `escaper` and wraps the result in single quotes
/// - `%d` accepts values that are exactly an integer
/// - `%f` accepts values that are exactly a finite float; magnitudes below
///   `1e-5` or from `1e16` up are written in exponent form
/// - `%%` emits `%` and consumes nothing
///
/// `Value::Null` renders as `NULL` for any placeholder.
///
/// # Errors
///
/// - [`CompileError::ArgumentCountMismatch`] when placeholders and values differ in number
/// - [`CompileError::TypeCoercionFailed`] when a value does not fit its placeholder
/// - [`CompileError::NoConnection`] when the escaper has no live connection
///
/// # Examples
///
/// ```
/// use sqlx_format_bind::{query::compile, values};
///
/// let escaper = |raw: &str| raw.replace('\'', "\\'");
/// let sql = compile(
///     "UPDATE users SET password = %s WHERE user = %s",
///     &values!["hunter2", "alice"],
///     &escaper,
/// )?;
/// assert_eq!(sql.as_str(), "UPDATE users SET password = 'hunter2' WHERE user = 'alice'");
/// # Ok::<(), sqlx_format_bind::CompileError>(())
/// ```
pub fn compile(
    template: &str,
    values: &[Value],
    escaper: &dyn EscapeProvider,
) -> Result<PreparedQuery, CompileError> {
    let parsed = parse_template(template)?;
    let placeholders = parsed.placeholder_count();
    if placeholders != values.len() {
        return Err(CompileError::ArgumentCountMismatch {
            placeholders,
            values: values.len(),
        });
    }

    let mut sql = String::with_capacity(template.len() + values.len() * 8);
    let mut args = values.iter().enumerate();
    for segment in parsed.segments() {
        match segment {
            Segment::Literal(text) => sql.push_str(text),
            Segment::Placeholder(kind) => {
                let Some((index, value)) = args.next() else {
                    return Err(CompileError::ArgumentCountMismatch {
                        placeholders,
                        values: values.len(),
                    });
                };
                render(&mut sql, index, *kind, value, escaper)?;
            }
        }
    }
    Ok(PreparedQuery(sql))
}

fn render(
    sql: &mut String,
    index: usize,
    kind: PlaceholderKind,
    value: &Value,
    escaper: &dyn EscapeProvider,
) -> Result<(), CompileError> {
    if *value == Value::Null {
        sql.push_str("NULL");
        return Ok(());
    }
    match kind {
        PlaceholderKind::String => {
            let escaped = escaper.escape(&value.to_string())?;
            sql.push('\'');
            sql.push_str(&escaped);
            sql.push('\'');
        }
        PlaceholderKind::Integer => {
            let i = coerce_int(value).ok_or_else(|| mismatch(index, kind, value))?;
            sql.push_str(&i.to_string());
        }
        PlaceholderKind::Float => {
            let x = coerce_float(value).ok_or_else(|| mismatch(index, kind, value))?;
            sql.push_str(&format_float(x));
        }
    }
    Ok(())
}

/// Shortest round-trip text for `x`, switching to exponent form outside
/// `[1e-5, 1e16)` so extreme magnitudes stay short.
fn format_float(x: f64) -> String {
    let magnitude = x.abs();
    if magnitude != 0.0 && !(1e-5..1e16).contains(&magnitude) {
        format!("{x:e}")
    } else {
        x.to_string()
    }
}

fn mismatch(index: usize, expected: PlaceholderKind, value: &Value) -> CompileError {
    CompileError::TypeCoercionFailed {
        index,
        expected,
        value: format!("{value:?}"),
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Float(x) => {
            let in_range = x.is_finite() && x.abs() <= MAX_EXACT_FLOAT_INT as f64;
            (in_range && x.fract() == 0.0).then(|| *x as i64)
        }
        Value::Text(s) => s.parse::<i64>().ok(),
        Value::Null => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    let x = match value {
        Value::Float(x) => *x,
        Value::Int(i) if i.unsigned_abs() <= MAX_EXACT_FLOAT_INT.unsigned_abs() => *i as f64,
        Value::Text(s) => s.parse::<f64>().ok()?,
        Value::Bool(_) | Value::Int(_) | Value::Null => return None,
    };
    x.is_finite().then_some(x)
}
