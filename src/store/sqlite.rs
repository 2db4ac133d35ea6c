use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::Mutex;

use super::{check_row, timestamp_now, Collection, Filter, OrderBy, RemoteStore, Row, StoreError};

/// SQLite-backed store. Behaves like the hosted store: it assigns ids and
/// timestamps, applies column defaults, and returns stored rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and initialize the schema
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let db_path = PathBuf::from(path);

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        initialize_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "opened sqlite store");

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mostly for tests
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }
}

/// Initialize the database schema (tables and indexes)
fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT,
            status          TEXT NOT NULL DEFAULT 'todo',
            priority        TEXT NOT NULL DEFAULT 'medium',
            due_date        TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS forum_posts (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL,
            author_name     TEXT NOT NULL,
            likes           INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS forum_comments (
            id              TEXT PRIMARY KEY,
            post_id         TEXT NOT NULL REFERENCES forum_posts(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL,
            content         TEXT NOT NULL,
            author_name     TEXT NOT NULL,
            created_at      TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_user_updated ON notes(user_id, updated_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_user_created ON tasks(user_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_forum_posts_created ON forum_posts(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_forum_comments_post ON forum_comments(post_id, created_at)",
        [],
    )?;

    Ok(())
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn column_list(collection: Collection) -> String {
    collection
        .columns()
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_json(collection: Collection, row: &rusqlite::Row) -> Result<Row, rusqlite::Error> {
    let mut out = Row::new();
    for (i, column) in collection.columns().iter().enumerate() {
        out.insert(column.to_string(), to_json_value(row.get_ref(i)?));
    }
    Ok(out)
}

fn fetch_by_id(conn: &Connection, collection: Collection, id: &str) -> Result<Row, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        column_list(collection),
        collection.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([id], |row| row_to_json(collection, row))?;
    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(StoreError::NotFound {
            collection,
            id: id.to_string(),
        }),
    }
}

/// `id = ? AND <scope...>`, numbering placeholders after the ones already in `params`
fn scoped_id_condition(
    collection: Collection,
    id: &str,
    scope: &[Filter],
    params: &mut Vec<SqlValue>,
) -> Result<String, StoreError> {
    params.push(SqlValue::Text(id.to_string()));
    let mut condition = format!("id = ?{}", params.len());
    for filter in scope {
        collection.check_column(&filter.column)?;
        params.push(to_sql_value(&filter.value));
        condition.push_str(&format!(" AND \"{}\" = ?{}", filter.column, params.len()));
    }
    Ok(condition)
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn select(
        &self,
        collection: Collection,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut sql = format!("SELECT {} FROM {}", column_list(collection), collection.table());
        let mut params = Vec::with_capacity(filters.len());

        for (i, filter) in filters.iter().enumerate() {
            collection.check_column(&filter.column)?;
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("\"{}\" = ?{}", filter.column, i + 1));
            params.push(to_sql_value(&filter.value));
        }

        if let Some(order) = order {
            collection.check_column(&order.column)?;
            let direction = if order.ascending { "ASC" } else { "DESC" };
            // Ties fall back to insertion order in the same direction
            sql.push_str(&format!(
                " ORDER BY \"{}\" {}, rowid {}",
                order.column, direction, direction
            ));
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| row_to_json(collection, row))?
            .collect::<Result<Vec<_>, _>>()?;

        tracing::trace!(%collection, count = rows.len(), "select");
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, mut row: Row) -> Result<Row, StoreError> {
        check_row(collection, &row)?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp_now();
        row.insert("id".to_string(), Value::String(id.clone()));
        row.insert("created_at".to_string(), Value::String(now.clone()));
        if collection.has_updated_at() {
            row.insert("updated_at".to_string(), Value::String(now));
        }

        let columns = row
            .keys()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=row.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            collection.table(),
            columns,
            placeholders
        );

        let conn = self.conn.lock().await;
        conn.execute(&sql, rusqlite::params_from_iter(row.values().map(to_sql_value)))?;
        fetch_by_id(&conn, collection, &id)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        scope: &[Filter],
        patch: Row,
    ) -> Result<Row, StoreError> {
        check_row(collection, &patch)?;

        let mut params: Vec<SqlValue> = patch.values().map(to_sql_value).collect();
        let condition = scoped_id_condition(collection, id, scope, &mut params)?;
        let sql = if patch.is_empty() {
            format!("SELECT id FROM {} WHERE {}", collection.table(), condition)
        } else {
            let assignments = patch
                .keys()
                .enumerate()
                .map(|(i, c)| format!("\"{}\" = ?{}", c, i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "UPDATE {} SET {} WHERE {}",
                collection.table(),
                assignments,
                condition
            )
        };

        let conn = self.conn.lock().await;
        if patch.is_empty() {
            let mut stmt = conn.prepare(&sql)?;
            if !stmt.exists(rusqlite::params_from_iter(params))? {
                return Err(StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                });
            }
            return fetch_by_id(&conn, collection, id);
        }

        let changed = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        fetch_by_id(&conn, collection, id)
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        scope: &[Filter],
    ) -> Result<(), StoreError> {
        let mut params = Vec::with_capacity(scope.len() + 1);
        let condition = scoped_id_condition(collection, id, scope, &mut params)?;
        let sql = format!("DELETE FROM {} WHERE {}", collection.table(), condition);

        let conn = self.conn.lock().await;
        let changed = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
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
    async fn test_insert_assigns_id_timestamps_and_defaults() {
        let store = SqliteStore::in_memory().unwrap();

        let created = store
            .insert(Collection::Tasks, row(json!({ "user_id": "u1", "title": "Write docs" })))
            .await
            .unwrap();

        assert!(!created["id"].as_str().unwrap().is_empty());
        assert_eq!(created["status"], json!("todo"));
        assert_eq!(created["priority"], json!("medium"));
        assert_eq!(created["due_date"], Value::Null);
        assert_eq!(created["created_at"], created["updated_at"]);
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let store = SqliteStore::in_memory().unwrap();
        for (user, title) in [("u1", "a"), ("u2", "b"), ("u1", "c")] {
            store
                .insert(Collection::Notes, row(json!({ "user_id": user, "title": title })))
                .await
                .unwrap();
        }

        let rows = store
            .select(
                Collection::Notes,
                &[Filter::eq("user_id", "u1")],
                Some(OrderBy::desc("created_at")),
            )
            .await
            .unwrap();

        let titles: Vec<_> = rows.iter().map(|r| r["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_update_returns_stored_row() {
        let store = SqliteStore::in_memory().unwrap();
        let post = store
            .insert(
                Collection::ForumPosts,
                row(json!({ "user_id": "u1", "title": "t", "content": "c", "author_name": "Ana" })),
            )
            .await
            .unwrap();
        let id = post["id"].as_str().unwrap();

        let updated = store
            .update(Collection::ForumPosts, id, &[], row(json!({ "likes": 1 })))
            .await
            .unwrap();

        assert_eq!(updated["likes"], json!(1));
        assert_eq!(updated["title"], json!("t"));
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rows_fail() {
        let store = SqliteStore::in_memory().unwrap();

        let update = store
            .update(Collection::Notes, "missing", &[], row(json!({ "title": "x" })))
            .await;
        assert!(matches!(update, Err(StoreError::NotFound { .. })));

        let delete = store.delete(Collection::Notes, "missing", &[]).await;
        assert!(matches!(delete, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_scoped_update_and_delete_skip_other_owners() {
        let store = SqliteStore::in_memory().unwrap();
        let note = store
            .insert(Collection::Notes, row(json!({ "user_id": "u1", "title": "mine" })))
            .await
            .unwrap();
        let id = note["id"].as_str().unwrap();
        let intruder = [Filter::eq("user_id", "u2")];

        let update = store
            .update(Collection::Notes, id, &intruder, row(json!({ "title": "x" })))
            .await;
        assert!(matches!(update, Err(StoreError::NotFound { .. })));
        let delete = store.delete(Collection::Notes, id, &intruder).await;
        assert!(matches!(delete, Err(StoreError::NotFound { .. })));

        let updated = store
            .update(
                Collection::Notes,
                id,
                &[Filter::eq("user_id", "u1")],
                row(json!({ "title": "still mine" })),
            )
            .await
            .unwrap();
        assert_eq!(updated["title"], json!("still mine"));
    }

    #[tokio::test]
    async fn test_unknown_columns_are_rejected_before_sql() {
        let store = SqliteStore::in_memory().unwrap();

        let insert = store
            .insert(Collection::Notes, row(json!({ "user_id": "u1", "title": "x", "pinned": true })))
            .await;
        assert!(matches!(insert, Err(StoreError::UnknownColumn { .. })));

        let select = store
            .select(Collection::Notes, &[Filter::eq("title; DROP TABLE notes", "x")], None)
            .await;
        assert!(matches!(select, Err(StoreError::UnknownColumn { .. })));
    }

    #[tokio::test]
    async fn test_comment_requires_existing_post() {
        let store = SqliteStore::in_memory().unwrap();

        let result = store
            .insert(
                Collection::ForumComments,
                row(json!({ "post_id": "nope", "user_id": "u1", "content": "hi", "author_name": "Ana" })),
            )
            .await;

        assert!(matches!(result, Err(StoreError::SqliteError(_))));
    }

    #[tokio::test]
    async fn test_deleting_post_cascades_to_comments() {
        let store = SqliteStore::in_memory().unwrap();
        let post = store
            .insert(
                Collection::ForumPosts,
                row(json!({ "user_id": "u1", "title": "t", "content": "c", "author_name": "Ana" })),
            )
            .await
            .unwrap();
        let post_id = post["id"].as_str().unwrap();
        store
            .insert(
                Collection::ForumComments,
                row(json!({ "post_id": post_id, "user_id": "u1", "content": "hi", "author_name": "Ana" })),
            )
            .await
            .unwrap();

        store.delete(Collection::ForumPosts, post_id, &[]).await.unwrap();

        let comments = store.select(Collection::ForumComments, &[], None).await.unwrap();
        assert!(comments.is_empty());
    }
}
