use regex::Regex;
use std::fmt;

/// The type a placeholder declares for the value it consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// `%s`
    String,
    /// `%d`
    Integer,
    /// `%f`
    Float,
}

impl fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaceholderKind::String => "%s",
            PlaceholderKind::Integer => "%d",
            PlaceholderKind::Float => "%f",
        })
    }
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(PlaceholderKind),
}

/// A query template split into literal text and typed placeholders.
///
/// Placeholder positions are fixed once parsing is done, so nothing
/// substituted later is ever rescanned as template syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of values this template consumes.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Placeholder(_)))
            .count()
    }

    fn push_literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Literal(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Literal(text.to_owned()));
        }
    }
}

/// Splits a format-style template into literals and placeholders.
///
/// Recognizes `%s`, `%d` and `%f`; `%%` becomes a literal `%` and consumes
/// no value. Any other `%` is kept as literal text.
///
/// # Examples
///
/// ```
/// use sqlx_format_bind::builder::parse_template;
///
/// let template = parse_template("SELECT * FROM users WHERE id = %d AND name LIKE '100%%'")?;
/// assert_eq!(template.placeholder_count(), 1);
/// # Ok::<(), sqlx_format_bind::CompileError>(())
/// ```
pub fn parse_template(template: &str) -> Result<QueryTemplate, crate::CompileError> {
    let regex = Regex::new(r"%[%sdf]")?;
    let mut parsed = QueryTemplate {
        segments: Vec::new(),
    };
    let mut cursor = 0;
    for m in regex.find_iter(template) {
        parsed.push_literal(&template[cursor..m.start()]);
        match m.as_str() {
            "%%" => parsed.push_literal("%"),
            "%s" => parsed.segments.push(Segment::Placeholder(PlaceholderKind::String)),
            "%d" => parsed.segments.push(Segment::Placeholder(PlaceholderKind::Integer)),
            _ => parsed.segments.push(Segment::Placeholder(PlaceholderKind::Float)),
        }
        cursor = m.end();
    }
    parsed.push_literal(&template[cursor..]);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(template: &QueryTemplate) -> Vec<PlaceholderKind> {
        template
            .segments()
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(k) => Some(*k),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_template_typed_placeholders() {
        let t = parse_template("SELECT * FROM t WHERE a = %s AND b = %d AND c = %f").unwrap();
        assert_eq!(
            kinds(&t),
            vec![
                PlaceholderKind::String,
                PlaceholderKind::Integer,
                PlaceholderKind::Float
            ]
        );
    }

    #[test]
    fn test_parse_template_percent_literal() {
        let t = parse_template("LIKE 'a%%b'").unwrap();
        assert_eq!(t.placeholder_count(), 0);
        assert_eq!(t.segments(), &[Segment::Literal("LIKE 'a%b'".into())]);
    }

    #[test]
    fn test_parse_template_escaped_percent_before_s() {
        // `%%s` is a literal percent followed by the letter s
        let t = parse_template("%%s").unwrap();
        assert_eq!(t.placeholder_count(), 0);
        assert_eq!(t.segments(), &[Segment::Literal("%s".into())]);
    }

    #[test]
    fn test_parse_template_unknown_specifier_is_literal() {
        let t = parse_template("LIKE 'abc%' OR x = '%x' %").unwrap();
        assert_eq!(t.placeholder_count(), 0);
        assert_eq!(
            t.segments(),
            &[Segment::Literal("LIKE 'abc%' OR x = '%x' %".into())]
        );
    }

    #[test]
    fn test_parse_template_no_params() {
        let t = parse_template("SELECT * FROM users").unwrap();
        assert_eq!(t.segments(), &[Segment::Literal("SELECT * FROM users".into())]);
    }
}
