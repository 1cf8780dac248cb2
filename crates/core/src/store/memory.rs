use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{
    document_created_at, document_id, merge_patch, Document, Filter, RecordStore, SortKey,
    StoreError,
};

/// Process-local store used by tests and by single-node tooling.
#[derive(Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn counter_value(&self, key: &str) -> Option<u64> {
        self.counters.lock().await.get(key).copied()
    }
}

fn contains_id(records: &[Document], id: &str) -> bool {
    records.iter().any(|record| document_id(record).map(|existing| existing == id).unwrap_or(false))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&SortKey>,
    ) -> Result<Vec<Document>, StoreError> {
        filter.validate()?;
        let collections = self.collections.read().await;
        let mut found: Vec<Document> = collections
            .get(collection)
            .map(|records| records.iter().filter(|record| filter.matches(record)).cloned().collect())
            .unwrap_or_default();

        if let Some(sort) = sort {
            found.sort_by(|left, right| sort.compare(left, right));
        }
        Ok(found)
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<Document, StoreError> {
        let id = document_id(&document)?.to_string();
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        if contains_id(records, &id) {
            return Err(StoreError::Conflict { collection: collection.to_string(), id });
        }
        records.push(document.clone());
        Ok(document)
    }

    async fn insert_all(&self, batch: Vec<(String, Document)>) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;

        for (index, (collection, document)) in batch.iter().enumerate() {
            let id = document_id(document)?;
            let existing = collections.get(collection).map(|records| contains_id(records, id));
            let repeated = batch[..index]
                .iter()
                .any(|(other, doc)| other == collection && document_id(doc).ok() == Some(id));
            if existing.unwrap_or(false) || repeated {
                return Err(StoreError::Conflict {
                    collection: collection.clone(),
                    id: id.to_string(),
                });
            }
        }

        for (collection, document) in batch {
            collections.entry(collection).or_default().push(document);
        }
        Ok(())
    }

    async fn update_where(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        filter.validate()?;
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(record) = records.iter_mut().find(|record| filter.matches(record)) else {
            return Ok(None);
        };
        merge_patch(record, patch);
        Ok(Some(record.clone()))
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        filter.validate()?;
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match records.iter().position(|record| filter.matches(record)) {
            Some(index) => {
                records.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_since(
        &self,
        collection: &str,
        filter: &Filter,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        filter.validate()?;
        let collections = self.collections.read().await;
        let count = collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| filter.matches(record))
                    .filter(|record| document_created_at(record).is_some_and(|at| at >= since))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn increment_counter(
        &self,
        key: &str,
        seed: u64,
        limit: Option<u64>,
    ) -> Result<Option<u64>, StoreError> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(key.to_string()).or_insert(seed);
        if limit.is_some_and(|limit| *value >= limit) {
            return Ok(None);
        }
        *value += 1;
        Ok(Some(*value))
    }

    async fn release_counter(&self, key: &str) -> Result<(), StoreError> {
        let mut counters = self.counters.lock().await;
        if let Some(value) = counters.get_mut(key) {
            *value = value.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::InMemoryRecordStore;
    use crate::store::{Document, Filter, RecordStore, SortKey, StoreError};

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = InMemoryRecordStore::new();
        store.insert("leads", doc(json!({ "id": "l-1" }))).await.expect("first insert");

        let error = store.insert("leads", doc(json!({ "id": "l-1" }))).await.expect_err("dup");
        assert!(matches!(error, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn insert_all_is_all_or_nothing() {
        let store = InMemoryRecordStore::new();
        store.insert("members", doc(json!({ "id": "m-1" }))).await.expect("seed");

        let result = store
            .insert_all(vec![
                ("organizations".to_string(), doc(json!({ "id": "o-1" }))),
                ("members".to_string(), doc(json!({ "id": "m-1" }))),
            ])
            .await;

        assert!(result.is_err());
        let orgs = store.find("organizations", &Filter::new(), None).await.expect("find");
        assert!(orgs.is_empty(), "organization must not be written when the batch fails");
    }

    #[tokio::test]
    async fn find_sorts_by_requested_field() {
        let store = InMemoryRecordStore::new();
        for (id, name) in [("a", "Zed"), ("b", "Amy"), ("c", "Moe")] {
            store.insert("leads", doc(json!({ "id": id, "full_name": name }))).await.expect("ins");
        }

        let sorted = store
            .find("leads", &Filter::new(), Some(&SortKey::descending("full_name")))
            .await
            .expect("find");
        let names: Vec<_> = sorted.iter().map(|d| d["full_name"].as_str().unwrap_or("")).collect();
        assert_eq!(names, vec!["Zed", "Moe", "Amy"]);
    }

    #[tokio::test]
    async fn count_since_ignores_older_records() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        let old = now - Duration::days(40);
        store
            .insert("leads", doc(json!({ "id": "old", "created_at": old.to_rfc3339() })))
            .await
            .expect("old");
        store
            .insert("leads", doc(json!({ "id": "new", "created_at": now.to_rfc3339() })))
            .await
            .expect("new");

        let count = store
            .count_since("leads", &Filter::new(), now - Duration::days(1))
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn bounded_counter_never_passes_limit_under_contention() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_counter("usage:o-1:leads:2026-10", 0, Some(5)).await
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("join").expect("increment").is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(store.counter_value("usage:o-1:leads:2026-10").await, Some(5));
    }
}
