//! In-process store
//!
//! Mirrors the behaviour of the hosted store closely enough to drive the
//! synchronization hooks without a database: server-assigned ids and
//! timestamps, column defaults, not-found errors. Every call yields to the
//! scheduler once, so operations issued concurrently really interleave.
//! Failures can be injected per collection and operation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{check_row, format_timestamp, Collection, Filter, OrderBy, RemoteStore, Row, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

type Rewrite = Box<dyn Fn(&mut Row) + Send + Sync>;

#[derive(Default)]
struct Inner {
    tables: HashMap<Collection, Vec<Row>>,
    failing: HashSet<(Collection, Operation)>,
    calls: Vec<(Operation, Collection)>,
    rewrites: HashMap<Collection, Rewrite>,
    last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent `op` on `collection` fail until `recover` is called
    pub fn fail(&self, collection: Collection, op: Operation) {
        self.lock().failing.insert((collection, op));
    }

    pub fn recover(&self, collection: Collection, op: Operation) {
        self.lock().failing.remove(&(collection, op));
    }

    /// Alter the row an update returns (and stores), after the patch is applied
    pub fn rewrite_updates<F>(&self, collection: Collection, f: F)
    where
        F: Fn(&mut Row) + Send + Sync + 'static,
    {
        self.lock().rewrites.insert(collection, Box::new(f));
    }

    /// Insert a fixture row verbatim, bypassing id and timestamp assignment
    pub fn seed(&self, collection: Collection, row: Row) {
        self.lock().tables.entry(collection).or_default().push(row);
    }

    /// Every remote call received so far, in arrival order
    pub fn calls(&self) -> Vec<(Operation, Collection)> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Current stored rows of a collection, in insertion order
    pub fn rows(&self, collection: Collection) -> Vec<Row> {
        self.lock().tables.get(&collection).cloned().unwrap_or_default()
    }

    /// Record the call, then fail it if a failure was injected
    fn begin(&self, op: Operation, collection: Collection) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.lock();
        inner.calls.push((op, collection));
        if inner.failing.contains(&(collection, op)) {
            return Err(StoreError::Rejected(format!(
                "{:?} on {} is unavailable",
                op, collection
            )));
        }
        Ok(inner)
    }
}

impl Inner {
    /// Strictly increasing so that ordering by timestamps is deterministic
    fn next_timestamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        format_timestamp(now)
    }
}

fn check_filters(collection: Collection, filters: &[Filter]) -> Result<(), StoreError> {
    filters
        .iter()
        .try_for_each(|filter| collection.check_column(&filter.column))
}

fn matches_scoped_id(row: &Row, id: &str, scope: &[Filter]) -> bool {
    row.get("id").and_then(Value::as_str) == Some(id)
        && scope.iter().all(|f| row.get(&f.column) == Some(&f.value))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            // Timestamps compare as instants; `...00Z` and `...00.000000Z` are equal
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        // Nulls sort first ascending, like the hosted store's default
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(
        &self,
        collection: Collection,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Row>, StoreError> {
        tokio::task::yield_now().await;
        let inner = self.begin(Operation::Select, collection)?;

        check_filters(collection, filters)?;
        let mut rows: Vec<Row> = inner
            .tables
            .get(&collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| row.get(&f.column) == Some(&f.value)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            collection.check_column(&order.column)?;
            if !order.ascending {
                // Ties keep insertion order in the same direction
                rows.reverse();
            }
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        Ok(rows)
    }

    async fn insert(&self, collection: Collection, mut row: Row) -> Result<Row, StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.begin(Operation::Insert, collection)?;
        check_row(collection, &row)?;

        if collection == Collection::ForumComments {
            let post_id = row.get("post_id").cloned().unwrap_or(Value::Null);
            let post_exists = inner
                .tables
                .get(&Collection::ForumPosts)
                .is_some_and(|posts| posts.iter().any(|p| p.get("id") == Some(&post_id)));
            if !post_exists {
                return Err(StoreError::Rejected(format!(
                    "forum post {} does not exist",
                    post_id
                )));
            }
        }

        for (column, default) in collection.defaults() {
            row.entry(column.to_string()).or_insert_with(|| default.to_json());
        }
        for column in collection.columns() {
            row.entry(column.to_string()).or_insert(Value::Null);
        }

        let now = inner.next_timestamp();
        row.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        row.insert("created_at".to_string(), Value::String(now.clone()));
        if collection.has_updated_at() {
            row.insert("updated_at".to_string(), Value::String(now));
        }

        inner.tables.entry(collection).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        scope: &[Filter],
        patch: Row,
    ) -> Result<Row, StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.begin(Operation::Update, collection)?;
        check_row(collection, &patch)?;
        check_filters(collection, scope)?;

        let Inner { tables, rewrites, .. } = &mut *inner;
        let stored = tables
            .get_mut(&collection)
            .and_then(|rows| {
                rows.iter_mut().find(|row| matches_scoped_id(row, id, scope))
            })
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })?;

        stored.extend(patch);
        if let Some(rewrite) = rewrites.get(&collection) {
            rewrite(stored);
        }
        Ok(stored.clone())
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        scope: &[Filter],
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.begin(Operation::Delete, collection)?;
        check_filters(collection, scope)?;

        let rows = inner.tables.entry(collection).or_default();
        let before = rows.len();
        rows.retain(|row| !matches_scoped_id(row, id, scope));
        if rows.len() == before {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }

        if collection == Collection::ForumPosts {
            if let Some(comments) = inner.tables.get_mut(&Collection::ForumComments) {
                comments.retain(|c| c.get("post_id").and_then(Value::as_str) != Some(id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::encode_row;
    use serde_json::json;

    fn row(value: Value) -> Row {
        encode_row(&value).unwrap()
    }

    #[tokio::test]
    async fn test_insert_fills_defaults_and_server_fields() {
        let store = MemoryStore::new();

        let task = store
            .insert(Collection::Tasks, row(json!({ "user_id": "u1", "title": "x" })))
            .await
            .unwrap();

        assert_eq!(task["status"], json!("todo"));
        assert_eq!(task["priority"], json!("medium"));
        assert_eq!(task["description"], Value::Null);
        assert!(task["id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_descending_order_breaks_ties_newest_first() {
        let store = MemoryStore::new();
        for title in ["a", "b", "c"] {
            store.seed(
                Collection::Notes,
                row(json!({ "id": title, "title": title, "updated_at": "2024-01-01T00:00:00Z" })),
            );
        }

        let rows = store
            .select(Collection::Notes, &[], Some(OrderBy::desc("updated_at")))
            .await
            .unwrap();

        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded_and_recoverable() {
        let store = MemoryStore::new();
        store.fail(Collection::Notes, Operation::Select);

        assert!(store.select(Collection::Notes, &[], None).await.is_err());
        store.recover(Collection::Notes, Operation::Select);
        assert!(store.select(Collection::Notes, &[], None).await.is_ok());

        assert_eq!(
            store.calls(),
            vec![
                (Operation::Select, Collection::Notes),
                (Operation::Select, Collection::Notes)
            ]
        );
    }

    #[tokio::test]
    async fn test_rewrite_changes_returned_and_stored_row() {
        let store = MemoryStore::new();
        store.seed(Collection::ForumPosts, row(json!({ "id": "p1", "likes": 4 })));
        store.rewrite_updates(Collection::ForumPosts, |row| {
            row.insert("likes".to_string(), json!(9));
        });

        let updated = store
            .update(Collection::ForumPosts, "p1", &[], row(json!({ "likes": 5 })))
            .await
            .unwrap();

        assert_eq!(updated["likes"], json!(9));
        assert_eq!(store.rows(Collection::ForumPosts)[0]["likes"], json!(9));
    }

    #[tokio::test]
    async fn test_comment_on_missing_post_is_rejected() {
        let store = MemoryStore::new();

        let result = store
            .insert(
                Collection::ForumComments,
                row(json!({ "post_id": "p1", "user_id": "u1", "content": "hi", "author_name": "Ana" })),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_timestamps_order_by_instant_not_text() {
        let store = MemoryStore::new();
        store.seed(
            Collection::Notes,
            row(json!({ "id": "later", "updated_at": "2024-01-01T00:00:00.000001Z" })),
        );
        store.seed(
            Collection::Notes,
            row(json!({ "id": "earlier", "updated_at": "2024-01-01T00:00:00Z" })),
        );

        let rows = store
            .select(Collection::Notes, &[], Some(OrderBy::asc("updated_at")))
            .await
            .unwrap();

        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn test_scope_limits_update_and_delete() {
        let store = MemoryStore::new();
        store.seed(Collection::Notes, row(json!({ "id": "n1", "user_id": "u1", "title": "a" })));
        let other = [Filter::eq("user_id", "u2")];

        let update = store
            .update(Collection::Notes, "n1", &other, row(json!({ "title": "b" })))
            .await;
        assert!(matches!(update, Err(StoreError::NotFound { .. })));
        let delete = store.delete(Collection::Notes, "n1", &other).await;
        assert!(matches!(delete, Err(StoreError::NotFound { .. })));

        let owner = [Filter::eq("user_id", "u1")];
        store
            .update(Collection::Notes, "n1", &owner, row(json!({ "title": "b" })))
            .await
            .unwrap();
        store.delete(Collection::Notes, "n1", &owner).await.unwrap();
        assert!(store.rows(Collection::Notes).is_empty());
    }
}
