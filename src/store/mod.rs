//! Remote store contract
//!
//! The synchronization hooks only ever talk to the store through plain
//! select/insert/update/delete calls on four collections. Joins, counters and
//! ordering beyond a single column are done client-side.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One record as exchanged with the store: column name to JSON value
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Row encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("No row with id {id} in {collection}")]
    NotFound { collection: Collection, id: String },
    #[error("Unknown column {column} in {collection}")]
    UnknownColumn { collection: Collection, column: String },
    #[error("Expected a JSON object for a row")]
    InvalidRow,
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Notes,
    Tasks,
    ForumPosts,
    ForumComments,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::Tasks => "tasks",
            Collection::ForumPosts => "forum_posts",
            Collection::ForumComments => "forum_comments",
        }
    }

    /// Every column the collection carries, server-assigned ones included
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Collection::Notes => &["id", "user_id", "title", "content", "created_at", "updated_at"],
            Collection::Tasks => &[
                "id",
                "user_id",
                "title",
                "description",
                "status",
                "priority",
                "due_date",
                "created_at",
                "updated_at",
            ],
            Collection::ForumPosts => &[
                "id",
                "user_id",
                "title",
                "content",
                "author_name",
                "likes",
                "created_at",
                "updated_at",
            ],
            Collection::ForumComments => &[
                "id",
                "post_id",
                "user_id",
                "content",
                "author_name",
                "created_at",
            ],
        }
    }

    /// Whether the store stamps `updated_at` on insert
    pub fn has_updated_at(&self) -> bool {
        !matches!(self, Collection::ForumComments)
    }

    /// Column defaults applied when an insert omits them
    pub fn defaults(&self) -> &'static [(&'static str, DefaultValue)] {
        match self {
            Collection::Notes => &[("content", DefaultValue::Text(""))],
            Collection::Tasks => &[
                ("status", DefaultValue::Text("todo")),
                ("priority", DefaultValue::Text("medium")),
            ],
            Collection::ForumPosts => &[("likes", DefaultValue::Integer(0))],
            Collection::ForumComments => &[],
        }
    }

    pub fn check_column(&self, column: &str) -> Result<(), StoreError> {
        if self.columns().contains(&column) {
            Ok(())
        } else {
            Err(StoreError::UnknownColumn {
                collection: *self,
                column: column.to_string(),
            })
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Text(&'static str),
    Integer(i64),
}

impl DefaultValue {
    pub fn to_json(self) -> Value {
        match self {
            DefaultValue::Text(s) => Value::String(s.to_string()),
            DefaultValue::Integer(n) => Value::from(n),
        }
    }
}

/// Column equality filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// Authenticated table operations against the backing store.
///
/// Implementations assign `id`, `created_at` and (where the collection has it)
/// `updated_at` on insert, and return the stored row from insert and update.
/// Update and delete only touch the row if it also matches `scope`; a row
/// outside the scope is reported as `NotFound`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(
        &self,
        collection: Collection,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError>;

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        scope: &[Filter],
        patch: Row,
    ) -> Result<Row, StoreError>;

    async fn delete(&self, collection: Collection, id: &str, scope: &[Filter])
    -> Result<(), StoreError>;
}

/// Serialize a typed insert or patch body into a row
pub fn encode_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::InvalidRow),
    }
}

/// Check every key of a row against the collection's columns
pub fn check_row(collection: Collection, row: &Row) -> Result<(), StoreError> {
    row.keys().try_for_each(|column| collection.check_column(column))
}

/// Fresh server-side timestamp in the store's canonical format
pub fn timestamp_now() -> String {
    format_timestamp(chrono::Utc::now())
}

pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Body<'a> {
        title: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        due_date: Option<&'a str>,
    }

    #[test]
    fn test_encode_row_skips_absent_optionals() {
        let row = encode_row(&Body { title: "x", due_date: None }).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row["title"], json!("x"));
    }

    #[test]
    fn test_encode_row_rejects_non_objects() {
        assert!(matches!(encode_row(&42), Err(StoreError::InvalidRow)));
    }

    #[test]
    fn test_check_row_flags_unknown_columns() {
        let row = encode_row(&json!({ "title": "x", "owner": "u1" })).unwrap();
        let err = check_row(Collection::Notes, &row).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnknownColumn { collection: Collection::Notes, ref column } if column == "owner"
        ));
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let earlier = chrono::DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
    }
}
