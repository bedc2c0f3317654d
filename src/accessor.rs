//! Name-based access to a database object's state for callers that predate
//! the typed API.

use crate::client::ColumnInfo;
use std::collections::HashMap;
use std::fmt;

/// Fields external writers may not replace. Internal code still updates them.
pub const PROTECTED_FIELDS: &[&str] = &["col_meta", "table_charset", "check_current_query"];

/// Fields computed on first read and cached until invalidated.
pub const LAZY_FIELDS: &[&str] = &["col_info"];

pub fn is_protected(name: &str) -> bool {
    PROTECTED_FIELDS.contains(&name)
}

pub fn is_lazy(name: &str) -> bool {
    LAZY_FIELDS.contains(&name)
}

/// A value held in a named field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<FieldValue>),
    Columns(Vec<ColumnInfo>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<u64> for FieldValue {
    fn from(i: u64) -> Self {
        FieldValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<u32> for FieldValue {
    fn from(i: u32) -> Self {
        FieldValue::Int(i64::from(i))
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

impl From<Vec<ColumnInfo>> for FieldValue {
    fn from(columns: Vec<ColumnInfo>) -> Self {
        FieldValue::Columns(columns)
    }
}

enum Slot {
    Stored(FieldValue),
    Pending(Box<dyn FnOnce() -> FieldValue>),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Stored(v) => f.debug_tuple("Stored").field(v).finish(),
            Slot::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// The named fields of a database object.
///
/// - `set` on a [`PROTECTED_FIELDS`] name is silently discarded
/// - `get` on a [`LAZY_FIELDS`] name runs its pending computation once and
///   caches the result
/// - `has` never triggers a computation
/// - `delete` removes any field, protected or not
#[derive(Debug, Default)]
pub struct FieldTable {
    slots: HashMap<String, Slot>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a field, computing it first if it is lazy and still pending.
    /// `None` means the field is unknown or currently unset.
    pub fn get(&mut self, name: &str) -> Option<&FieldValue> {
        if is_lazy(name) && matches!(self.slots.get(name), Some(Slot::Pending(_))) {
            if let Some(Slot::Pending(compute)) = self.slots.remove(name) {
                tracing::trace!(field = name, "computing lazy field");
                self.slots.insert(name.to_owned(), Slot::Stored(compute()));
            }
        }
        self.peek(name)
    }

    /// Reads a stored value without computing anything.
    pub fn peek(&self, name: &str) -> Option<&FieldValue> {
        match self.slots.get(name) {
            Some(Slot::Stored(value)) => Some(value),
            _ => None,
        }
    }

    /// Writes a field unless it is write-protected.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        if is_protected(name) {
            tracing::trace!(field = name, "ignoring write to protected field");
            return;
        }
        self.put(name, value);
    }

    /// Whether the field holds a non-null value.
    pub fn has(&self, name: &str) -> bool {
        matches!(self.peek(name), Some(v) if *v != FieldValue::Null)
    }

    pub fn delete(&mut self, name: &str) {
        self.slots.remove(name);
    }

    /// Internal write that ignores protection.
    pub(crate) fn put(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.slots
            .insert(name.to_owned(), Slot::Stored(value.into()));
    }

    /// Replaces a lazy field with a computation to run on its next read.
    pub(crate) fn defer(&mut self, name: &'static str, compute: impl FnOnce() -> FieldValue + 'static) {
        debug_assert!(is_lazy(name), "{name} is not a lazy field");
        self.slots
            .insert(name.to_owned(), Slot::Pending(Box::new(compute)));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_set_and_get_plain_field() {
        let mut fields = FieldTable::new();
        fields.set("prefix", "wp_");
        assert_eq!(fields.get("prefix"), Some(&FieldValue::Str("wp_".into())));
        assert!(fields.has("prefix"));
    }

    #[test]
    fn test_unknown_field() {
        let mut fields = FieldTable::new();
        assert_eq!(fields.get("nope"), None);
        assert!(!fields.has("nope"));
    }

    #[test]
    fn test_set_on_protected_field_is_ignored() {
        let mut fields = FieldTable::new();
        fields.put("check_current_query", true);

        fields.set("check_current_query", false);

        assert_eq!(fields.get("check_current_query"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_set_cannot_create_protected_field() {
        let mut fields = FieldTable::new();
        fields.set("col_meta", "injected");
        assert!(!fields.has("col_meta"));
    }

    #[test]
    fn test_lazy_field_computed_once() {
        let calls = Rc::new(Cell::new(0));
        let mut fields = FieldTable::new();
        let counter = Rc::clone(&calls);
        fields.defer("col_info", move || {
            counter.set(counter.get() + 1);
            FieldValue::Int(7)
        });

        assert!(!fields.has("col_info"));
        assert_eq!(calls.get(), 0);

        assert_eq!(fields.get("col_info"), Some(&FieldValue::Int(7)));
        assert_eq!(fields.get("col_info"), Some(&FieldValue::Int(7)));
        assert_eq!(calls.get(), 1);
        assert!(fields.has("col_info"));
    }

    #[test]
    fn test_has_treats_null_as_unset() {
        let mut fields = FieldTable::new();
        fields.set("last_result", FieldValue::Null);
        assert!(!fields.has("last_result"));
        assert_eq!(fields.get("last_result"), Some(&FieldValue::Null));
    }

    /// Quirk kept from the legacy contract: protection blocks `set` but not
    /// `delete`.
    #[test]
    fn test_delete_bypasses_protection_quirk() {
        let mut fields = FieldTable::new();
        fields.put("table_charset", "utf8mb4");

        fields.delete("table_charset");

        assert!(!fields.has("table_charset"));
        assert_eq!(fields.get("table_charset"), None);
    }
}
