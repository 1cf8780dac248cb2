//! SQLite implementation of the record store.
//!
//! Documents live as JSON text in `entity_record`; filters are pushed down as
//! `json_extract` comparisons on a bound JSON path. Counters are single-statement
//! conditional updates so two writers can never both pass a quota check.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dealdesk_core::store::{document_id, Document, Filter, RecordStore, SortKey, StoreError};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::Row;
use tracing::debug;

use crate::DbPool;

#[derive(Clone)]
pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn counter_value(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let value = sqlx::query("SELECT value FROM usage_counter WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(|row| row.get::<i64, _>("value"));
        Ok(value.map(|value| u64::try_from(value).unwrap_or(0)))
    }
}

#[derive(Clone, Debug)]
enum Bind {
    Text(String),
    Int(i64),
    Real(f64),
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    binds: Vec<Bind>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Text(value) => query.bind(value),
            Bind::Int(value) => query.bind(value),
            Bind::Real(value) => query.bind(value),
        };
    }
    query
}

fn json_path(field: &str) -> Bind {
    Bind::Text(format!("$.{field}"))
}

/// `collection = ?` plus one predicate per filter field. Field names are validated
/// before they reach here and only ever travel as bound JSON paths.
fn where_clause(collection: &str, filter: &Filter) -> Result<(String, Vec<Bind>), StoreError> {
    filter.validate()?;
    let mut sql = String::from("collection = ?");
    let mut binds = vec![Bind::Text(collection.to_owned())];

    for (field, expected) in filter.iter() {
        match expected {
            Value::Null => {
                sql.push_str(" AND json_extract(body, ?) IS NULL");
                binds.push(json_path(field));
            }
            Value::Bool(flag) => {
                sql.push_str(" AND json_type(body, ?) = ?");
                binds.push(json_path(field));
                binds.push(Bind::Text(if *flag { "true" } else { "false" }.to_owned()));
            }
            Value::Number(number) => {
                sql.push_str(" AND json_type(body, ?) IN ('integer', 'real') AND json_extract(body, ?) = ?");
                binds.push(json_path(field));
                binds.push(json_path(field));
                binds.push(match number.as_i64() {
                    Some(value) => Bind::Int(value),
                    None => Bind::Real(number.as_f64().unwrap_or(0.0)),
                });
            }
            Value::String(text) => {
                sql.push_str(" AND json_type(body, ?) = 'text' AND json_extract(body, ?) = ?");
                binds.push(json_path(field));
                binds.push(json_path(field));
                binds.push(Bind::Text(text.clone()));
            }
            Value::Array(_) | Value::Object(_) => {
                sql.push_str(" AND json_extract(body, ?) = json(?)");
                binds.push(json_path(field));
                binds.push(Bind::Text(expected.to_string()));
            }
        }
    }
    Ok((sql, binds))
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn parse_body(raw: &str) -> Result<Document, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(other) => Err(StoreError::Decode(format!("stored record is not an object: `{other}`"))),
        Err(error) => Err(StoreError::Decode(error.to_string())),
    }
}

fn encode_body(document: &Document) -> Result<String, StoreError> {
    serde_json::to_string(document).map_err(|error| StoreError::Decode(error.to_string()))
}

fn conflict_or_backend(error: sqlx::Error, collection: &str, id: &str) -> StoreError {
    match &error {
        sqlx::Error::Database(database) if database.is_unique_violation() => {
            StoreError::Conflict { collection: collection.to_owned(), id: id.to_owned() }
        }
        _ => backend(error),
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&SortKey>,
    ) -> Result<Vec<Document>, StoreError> {
        let (predicate, binds) = where_clause(collection, filter)?;
        let sql = format!("SELECT body FROM entity_record WHERE {predicate} ORDER BY rowid ASC");
        let rows = bind_all(sqlx::query(&sql), binds).fetch_all(&self.pool).await.map_err(backend)?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let document = parse_body(&row.get::<String, _>("body"))?;
            if filter.matches(&document) {
                found.push(document);
            }
        }
        // Sorting stays in Rust so timestamps of mixed precision order chronologically.
        if let Some(sort) = sort {
            found.sort_by(|left, right| sort.compare(left, right));
        }
        Ok(found)
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<Document, StoreError> {
        let id = document_id(&document)?.to_owned();
        let body = encode_body(&document)?;
        sqlx::query("INSERT INTO entity_record (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|error| conflict_or_backend(error, collection, &id))?;
        Ok(document)
    }

    async fn insert_all(&self, batch: Vec<(String, Document)>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for (collection, document) in &batch {
            let id = document_id(document)?;
            sqlx::query("INSERT INTO entity_record (collection, id, body) VALUES (?, ?, ?)")
                .bind(collection.as_str())
                .bind(id)
                .bind(encode_body(document)?)
                .execute(&mut *tx)
                .await
                .map_err(|error| conflict_or_backend(error, collection, id))?;
        }
        tx.commit().await.map_err(backend)?;
        debug!(event_name = "store.batch_inserted", records = batch.len(), "batch inserted");
        Ok(())
    }

    async fn update_where(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        let (predicate, where_binds) = where_clause(collection, filter)?;

        // Top-level merge: present keys are replaced wholesale, null keys removed.
        let mut body = String::from("body");
        let mut binds = Vec::new();
        let (removed, replaced): (Vec<_>, Vec<_>) =
            patch.into_iter().partition(|(_, value)| value.is_null());
        if !replaced.is_empty() {
            let mut call = String::from("json_set(body");
            for (field, value) in replaced {
                dealdesk_core::store::validate_field_name(&field)?;
                call.push_str(", ?, json(?)");
                binds.push(json_path(&field));
                binds.push(Bind::Text(value.to_string()));
            }
            call.push(')');
            body = call;
        }
        if !removed.is_empty() {
            let mut call = format!("json_remove({body}");
            for (field, _) in removed {
                dealdesk_core::store::validate_field_name(&field)?;
                call.push_str(", ?");
                binds.push(json_path(&field));
            }
            call.push(')');
            body = call;
        }

        let sql = format!(
            "UPDATE entity_record SET body = {body}
             WHERE collection = ? AND id = (
                SELECT id FROM entity_record WHERE {predicate} ORDER BY rowid ASC LIMIT 1
             )
             RETURNING body"
        );
        binds.push(Bind::Text(collection.to_owned()));
        binds.extend(where_binds);

        let row = bind_all(sqlx::query(&sql), binds).fetch_optional(&self.pool).await.map_err(backend)?;
        row.map(|row| parse_body(&row.get::<String, _>("body"))).transpose()
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let (predicate, where_binds) = where_clause(collection, filter)?;
        let sql = format!(
            "DELETE FROM entity_record
             WHERE collection = ? AND id = (
                SELECT id FROM entity_record WHERE {predicate} ORDER BY rowid ASC LIMIT 1
             )"
        );
        let mut binds = vec![Bind::Text(collection.to_owned())];
        binds.extend(where_binds);
        let result = bind_all(sqlx::query(&sql), binds).execute(&self.pool).await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_since(
        &self,
        collection: &str,
        filter: &Filter,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let (predicate, mut binds) = where_clause(collection, filter)?;
        let sql = format!(
            "SELECT COUNT(*) AS count FROM entity_record
             WHERE {predicate} AND julianday(created_at) >= julianday(?)"
        );
        binds.push(Bind::Text(since.to_rfc3339_opts(SecondsFormat::Millis, true)));
        let count = bind_all(sqlx::query(&sql), binds)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?
            .get::<i64, _>("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn increment_counter(
        &self,
        key: &str,
        seed: u64,
        limit: Option<u64>,
    ) -> Result<Option<u64>, StoreError> {
        let now = now_text();
        sqlx::query(
            "INSERT INTO usage_counter (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(to_i64(seed))
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let limit = limit.map(to_i64);
        let row = sqlx::query(
            "UPDATE usage_counter SET value = value + 1, updated_at = ?
             WHERE key = ? AND (? IS NULL OR value < ?)
             RETURNING value",
        )
        .bind(&now)
        .bind(key)
        .bind(limit)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|row| u64::try_from(row.get::<i64, _>("value")).unwrap_or(0)))
    }

    async fn release_counter(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE usage_counter SET value = MAX(value - 1, 0), updated_at = ? WHERE key = ?",
        )
        .bind(now_text())
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use dealdesk_core::store::{Document, Filter, RecordStore, SortKey, StoreError};
    use serde_json::json;

    use super::SqlRecordStore;
    use crate::{connect_with_settings, migrations::run_pending};

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    async fn store() -> SqlRecordStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlRecordStore::new(pool)
    }

    #[tokio::test]
    async fn filters_match_scalars_and_null_like_memory_store() {
        let store = store().await;
        store
            .insert("leads", doc(json!({ "id": "l-1", "org_id": "o-1", "call_count": 2, "hot": true })))
            .await
            .expect("insert");
        store
            .insert(
                "leads",
                doc(json!({ "id": "l-2", "org_id": "o-1", "call_count": "2", "assigned_member_id": "m-1" })),
            )
            .await
            .expect("insert");

        let numeric = store.find("leads", &Filter::new().eq("call_count", 2), None).await.expect("find");
        assert_eq!(numeric.len(), 1);
        assert_eq!(numeric[0]["id"], "l-1");

        let unassigned = store
            .find("leads", &Filter::new().eq("assigned_member_id", serde_json::Value::Null), None)
            .await
            .expect("find");
        assert_eq!(unassigned.len(), 1);

        let hot = store.find("leads", &Filter::new().eq("hot", true), None).await.expect("find");
        assert_eq!(hot.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_conflict_and_batches_roll_back() {
        let store = store().await;
        store.insert("members", doc(json!({ "id": "m-1" }))).await.expect("seed");

        let error = store.insert("members", doc(json!({ "id": "m-1" }))).await.expect_err("dup");
        assert!(matches!(error, StoreError::Conflict { .. }));

        let result = store
            .insert_all(vec![
                ("organizations".to_owned(), doc(json!({ "id": "o-1" }))),
                ("members".to_owned(), doc(json!({ "id": "m-1" }))),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        let orgs = store.find("organizations", &Filter::new(), None).await.expect("find");
        assert!(orgs.is_empty());
    }

    #[tokio::test]
    async fn update_merges_top_level_and_removes_nulls() {
        let store = store().await;
        store
            .insert(
                "leads",
                doc(json!({ "id": "l-1", "org_id": "o-1", "status": "new", "rejection_reason": "x",
                            "address": { "city": "Haifa", "street": "Main" } })),
            )
            .await
            .expect("insert");

        let updated = store
            .update_where(
                "leads",
                &Filter::new().eq("id", "l-1").eq("org_id", "o-1"),
                doc(json!({ "status": "lost", "rejection_reason": null, "address": { "city": "Acre" } })),
            )
            .await
            .expect("update")
            .expect("matched");
        assert_eq!(updated["status"], "lost");
        assert!(!updated.contains_key("rejection_reason"));
        assert_eq!(updated["address"], json!({ "city": "Acre" }));

        let missed = store
            .update_where("leads", &Filter::new().eq("id", "l-1").eq("org_id", "o-2"), doc(json!({ "status": "won" })))
            .await
            .expect("update");
        assert!(missed.is_none());
    }

    #[tokio::test]
    async fn count_since_uses_created_at_window() {
        let store = store().await;
        let old = (Utc::now() - Duration::days(40)).to_rfc3339();
        let recent = Utc::now().to_rfc3339();
        store.insert("leads", doc(json!({ "id": "l-1", "org_id": "o-1", "created_at": old }))).await.expect("insert");
        store.insert("leads", doc(json!({ "id": "l-2", "org_id": "o-1", "created_at": recent }))).await.expect("insert");

        let count = store
            .count_since("leads", &Filter::new().eq("org_id", "o-1"), Utc::now() - Duration::days(1))
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn sort_orders_timestamps_chronologically() {
        let store = store().await;
        let earlier = (Utc::now() - Duration::hours(2)).to_rfc3339();
        let later = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        store.insert("leads", doc(json!({ "id": "late", "created_at": later }))).await.expect("insert");
        store.insert("leads", doc(json!({ "id": "early", "created_at": earlier }))).await.expect("insert");

        let sorted =
            store.find("leads", &Filter::new(), Some(&SortKey::ascending("created_at"))).await.expect("find");
        assert_eq!(sorted[0]["id"], "early");
    }

    #[tokio::test]
    async fn bounded_counter_never_exceeds_limit_under_concurrency() {
        let store = Arc::new(store().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.increment_counter("usage:o-1:leads:2026-10", 0, Some(3)).await }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("join").expect("increment").is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);

        store.release_counter("usage:o-1:leads:2026-10").await.expect("release");
        assert_eq!(store.counter_value("usage:o-1:leads:2026-10").await.expect("value"), Some(2));
    }

    #[tokio::test]
    async fn delete_removes_only_the_matching_record() {
        let store = store().await;
        store.insert("jobs", doc(json!({ "id": "j-1", "org_id": "o-1" }))).await.expect("insert");
        store.insert("jobs", doc(json!({ "id": "j-2", "org_id": "o-2" }))).await.expect("insert");

        assert!(!store.delete_where("jobs", &Filter::new().eq("id", "j-1").eq("org_id", "o-2")).await.expect("delete"));
        assert!(store.delete_where("jobs", &Filter::new().eq("id", "j-1").eq("org_id", "o-1")).await.expect("delete"));
        assert_eq!(store.find("jobs", &Filter::new(), None).await.expect("find").len(), 1);
    }
}
