//! Record storage boundary.
//!
//! The gateway talks to storage only through [`RecordStore`]: named collections of JSON
//! documents, field-equality filters, and a couple of atomic counters. Tenant scoping is
//! never done here; the gateway injects it into every [`Filter`] it hands down.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryRecordStore;

pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record `{id}` already exists in `{collection}`")]
    Conflict { collection: String, id: String },
    #[error("invalid field name `{0}`")]
    InvalidField(String),
    #[error("document is missing a string `id`")]
    MissingId,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Field-equality predicate. `Value::Null` matches both a null and an absent field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    fields: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        for field in self.fields.keys() {
            validate_field_name(field)?;
        }
        Ok(())
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.fields.iter().all(|(field, expected)| {
            let actual = document.get(field).unwrap_or(&Value::Null);
            values_equal(actual, expected)
        })
    }
}

impl From<BTreeMap<String, Value>> for Filter {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl From<Document> for Filter {
    fn from(document: Document) -> Self {
        Self { fields: document.into_iter().collect() }
    }
}

/// `field` sorts ascending, `-field` descending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { field: field.into(), descending: false }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self { field: field.into(), descending: true }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        let (field, descending) = match raw.strip_prefix('-') {
            Some(field) => (field, true),
            None => (raw, false),
        };
        validate_field_name(field)?;
        Ok(Self { field: field.to_string(), descending })
    }

    pub fn compare(&self, left: &Document, right: &Document) -> Ordering {
        let l = left.get(&self.field).unwrap_or(&Value::Null);
        let r = right.get(&self.field).unwrap_or(&Value::Null);
        let ordering = compare_values(l, r);
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&SortKey>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.find(collection, filter, None).await?.into_iter().next())
    }

    /// First record in `sort` order, e.g. the oldest match.
    async fn find_one_sorted(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &SortKey,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.find(collection, filter, Some(sort)).await?.into_iter().next())
    }

    /// Inserts a document keyed by its `id`. An existing id yields [`StoreError::Conflict`].
    async fn insert(&self, collection: &str, document: Document) -> Result<Document, StoreError>;

    /// Inserts every document or none of them.
    async fn insert_all(&self, batch: Vec<(String, Document)>) -> Result<(), StoreError>;

    /// Merge-patches the single record matching `filter`. Null patch values remove keys.
    async fn update_where(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError>;

    /// Counts records matching `filter` whose `created_at` is at or after `since`.
    async fn count_since(
        &self,
        collection: &str,
        filter: &Filter,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Atomically increments the named counter, creating it at `seed` first when absent.
    /// Returns `None` without incrementing when the counter already reached `limit`.
    async fn increment_counter(
        &self,
        key: &str,
        seed: u64,
        limit: Option<u64>,
    ) -> Result<Option<u64>, StoreError>;

    /// Gives back one unit of a counter, never going below zero.
    async fn release_counter(&self, key: &str) -> Result<(), StoreError>;
}

pub fn validate_field_name(field: &str) -> Result<(), StoreError> {
    let valid = !field.is_empty()
        && field.len() <= 64
        && field.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidField(field.to_string()))
    }
}

pub fn document_id(document: &Document) -> Result<&str, StoreError> {
    document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(StoreError::MissingId)
}

pub fn document_created_at(document: &Document) -> Option<DateTime<Utc>> {
    document.get("created_at").and_then(Value::as_str).and_then(parse_timestamp)
}

/// Applies an RFC 7396 style merge patch at the top level.
pub fn merge_patch(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

pub fn encode_document<T: serde::Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(other) => Err(StoreError::Decode(format!("expected an object, got `{other}`"))),
        Err(error) => Err(StoreError::Decode(error.to_string())),
    }
}

pub fn decode_document<T: serde::de::DeserializeOwned>(document: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(document)).map_err(|error| StoreError::Decode(error.to_string()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Total order used for sorting: nulls first, then booleans, numbers, strings.
/// RFC 3339 strings compare chronologically so timestamps with differing precision
/// still sort correctly.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a.cmp(b),
        },
        _ => rank(left).cmp(&rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{compare_values, merge_patch, Document, Filter, SortKey, StoreError};

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn null_filter_matches_absent_fields() {
        let filter = Filter::new().eq("assigned_member_id", serde_json::Value::Null);
        assert!(filter.matches(&doc(json!({ "id": "l-1" }))));
        assert!(!filter.matches(&doc(json!({ "id": "l-1", "assigned_member_id": "m-1" }))));
    }

    #[test]
    fn numeric_filters_ignore_representation() {
        let filter = Filter::new().eq("call_count", json!(2.0));
        assert!(filter.matches(&doc(json!({ "call_count": 2 }))));
    }

    #[test]
    fn sort_key_parses_descending_marker() {
        assert_eq!(SortKey::parse("-created_at").expect("parse"), SortKey::descending("created_at"));
        assert_eq!(SortKey::parse("name").expect("parse"), SortKey::ascending("name"));
        assert!(matches!(SortKey::parse("data.$x"), Err(StoreError::InvalidField(_))));
    }

    #[test]
    fn timestamps_compare_chronologically_across_precision() {
        let earlier = json!("2026-03-01T10:00:00.500Z");
        let later = json!("2026-03-01T10:00:01Z");
        assert_eq!(compare_values(&earlier, &later), std::cmp::Ordering::Less);
    }

    #[test]
    fn merge_patch_removes_null_keys() {
        let mut target = doc(json!({ "a": 1, "b": 2 }));
        merge_patch(&mut target, doc(json!({ "a": null, "c": 3 })));
        assert_eq!(target, doc(json!({ "b": 2, "c": 3 })));
    }
}
