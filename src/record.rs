//! Record model shared by the reconciliation engine and the store adapters.
//!
//! A [`Record`] is an open-ended field bag, but every value is a typed
//! [`FieldValue`] so the absent-equivalence rule lives in the type instead of
//! scattered null checks. Reserved bookkeeping columns (`ID`, `Last Updated`)
//! are carried in the bag like any other field; the engine knows to skip them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Store-assigned identifier column.
pub const FIELD_ID: &str = "ID";
/// Store-assigned modification timestamp column.
pub const FIELD_LAST_UPDATED: &str = "Last Updated";
/// Entry status column. Compared like a normal field except when it carries
/// the soft-delete sentinel.
pub const FIELD_STATUS: &str = "Status";

/// Soft-delete sentinel value for [`FIELD_STATUS`].
pub const STATUS_DELETED: &str = "Deleted";

/// Bookkeeping columns excluded from field-level change comparison.
pub const RESERVED_FIELDS: [&str; 2] = [FIELD_ID, FIELD_LAST_UPDATED];

/// Sparse set of field changes, as produced by the engine and consumed by
/// `apply_patch`. An [`FieldValue::Absent`] entry clears the field.
pub type FieldChanges = BTreeMap<String, FieldValue>;

/// A single scalar cell value.
///
/// Equality is exact within a kind and never coerced across kinds: a numeric
/// `1` and the text `"1"` are different values.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Explicit "no value" marker. See [`FieldValue::is_absent`].
    Absent,
}

impl FieldValue {
    /// Convenience constructor for text values.
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// The absent-equivalence predicate governing all comparisons: a missing
    /// field, an empty string, and a NaN number are all indistinguishable
    /// from [`FieldValue::Absent`].
    pub fn is_absent(&self) -> bool {
        match self {
            FieldValue::Absent => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Number(n) => n.is_nan(),
            FieldValue::Bool(_) | FieldValue::Timestamp(_) => false,
        }
    }

    /// Canonical text rendering, used for spreadsheet cells.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339(),
            FieldValue::Absent => String::new(),
        }
    }
}

/// One logical entry (a party booking) as a field/value mapping.
///
/// Mirror-origin records also carry the zero-based data-row index they were
/// read from, so a remote-assigned identifier can be written back onto the
/// originating row after a push insert. The row handle is bookkeeping, not a
/// field: it is excluded from equality.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
    row: Option<usize>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record pre-populated with the given identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.set(FIELD_ID, FieldValue::text(id));
        record
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Builder-style [`Record::set`].
    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    /// Look up a field. Missing fields read as [`FieldValue::Absent`].
    pub fn get(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Absent)
    }

    /// The store-assigned identifier, if this record has one.
    pub fn id(&self) -> Option<&str> {
        match self.get(FIELD_ID) {
            FieldValue::Text(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Mirror data-row index this record was read from, if any.
    pub fn row(&self) -> Option<usize> {
        self.row
    }

    pub fn set_row(&mut self, row: usize) {
        self.row = Some(row);
    }

    /// Builder-style [`Record::set_row`].
    pub fn at_row(mut self, row: usize) -> Self {
        self.set_row(row);
        self
    }

    /// Iterate fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// True when every non-reserved field is absent-equivalent. Blank rows
    /// are never insertion candidates.
    pub fn is_blank(&self) -> bool {
        self.fields
            .iter()
            .filter(|(name, _)| !RESERVED_FIELDS.contains(&name.as_str()))
            .all(|(_, value)| value.is_absent())
    }

    /// True when the `Status` field carries the soft-delete sentinel.
    pub fn marked_deleted(&self) -> bool {
        matches!(self.get(FIELD_STATUS), FieldValue::Text(s) if s == STATUS_DELETED)
    }
}

impl PartialEq for Record {
    /// Field-level equality only; the mirror row handle is bookkeeping.
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

/// The complete set of records as seen from one store at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
