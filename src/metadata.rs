//! Metadata records kept in lockstep with the vector index.
//!
//! A [`Record`] is an insertion-ordered mapping of string keys to scalar or
//! string values. The index never interprets records; it only stores and
//! returns them. The [`MetadataStore`] is a dense table indexed by the same
//! ids the index assigns, so `store.len()` always equals the number of items
//! ever inserted.

use serde::{Deserialize, Serialize};

/// A scalar or string value attached to a metadata key.
///
/// Externally tagged on the wire: the binary metadata blob needs a
/// self-describing variant marker to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 string.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// An ordered key/value record describing one indexed item.
///
/// Keys keep their insertion order; setting an existing key replaces its
/// value in place.
///
/// # Examples
/// ```rust
/// use glimpse::metadata::Record;
///
/// let mut record = Record::new();
/// record.set("source", "images/cat.png");
/// record.set("ordinal", 0i64);
/// assert_eq!(record.keys().collect::<Vec<_>>(), vec!["source", "ordinal"]);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, preserving first-insertion order.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    /// Look up a field by key.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Iterate over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Dense id → [`Record`] table.
///
/// Ids are assigned monotonically by the index, never reused, and index
/// directly into this table. The store is append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    records: Vec<Record>,
}

impl MetadataStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the record for a freshly-assigned id and return that id.
    pub fn push(&mut self, record: Record) -> u64 {
        let id = self.records.len() as u64;
        self.records.push(record);
        id
    }

    /// Look up the record for `id`. `None` for ids the index never assigned.
    pub fn get(&self, id: u64) -> Option<&Record> {
        self.records.get(id as usize)
    }

    /// Number of records (equals the number of items ever inserted).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_preserves_insertion_order() {
        let mut record = Record::new();
        record.set("source", "a.png");
        record.set("name", "a");
        record.set("ordinal", 3i64);
        record.set("source", "b.png"); // replace, not reorder

        let keys: Vec<_> = record.keys().collect();
        assert_eq!(keys, vec!["source", "name", "ordinal"]);
        assert_eq!(record.get("source"), Some(&FieldValue::Str("b.png".into())));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_get_missing_key() {
        let record = Record::new();
        assert!(record.get("anything").is_none());
        assert!(record.is_empty());
    }

    #[test]
    fn test_store_survives_binary_round_trip() {
        let mut store = MetadataStore::new();
        let mut record = Record::new();
        record.set("source", "images/a.png");
        record.set("ordinal", 7i64);
        record.set("score", 0.25f64);
        record.set("indexed", true);
        store.push(record);

        let bytes =
            bincode::serde::encode_to_vec(&store, bincode::config::standard()).unwrap();
        let (decoded, _): (MetadataStore, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded.get(0), store.get(0));
        assert_eq!(
            decoded.get(0).unwrap().get("ordinal"),
            Some(&FieldValue::Int(7))
        );
    }

    #[test]
    fn test_store_assigns_dense_ids() {
        let mut store = MetadataStore::new();
        let mut record = Record::new();
        record.set("name", "first");
        assert_eq!(store.push(record.clone()), 0);
        assert_eq!(store.push(record), 1);
        assert_eq!(store.len(), 2);
        assert!(store.get(0).is_some());
        assert!(store.get(2).is_none());
    }
}
