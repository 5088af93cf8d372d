//! Document store abstraction.
//!
//! Collections hold schemaless JSON documents keyed by a server-assigned
//! UUID. Queries are equality matches on dotted paths (`data.sensor_id`)
//! and always return newest documents first. Only the repositories in
//! `crate::repos` build [`Filter`]s; handlers never see a path string.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

// ---

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedStore = Arc<dyn DocumentStore>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque, globally unique document id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(Uuid);

impl DocId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned when a caller-supplied id is not a store id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid document id")]
pub struct InvalidDocId(pub String);

impl FromStr for DocId {
    type Err = InvalidDocId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(DocId)
            .map_err(|_| InvalidDocId(s.to_string()))
    }
}

impl From<Uuid> for DocId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub body: Value,
}

/// Conjunction of equality clauses over dotted paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `path` (dot separated) to equal `value`.
    pub fn eq(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((path.to_string(), value.into()));
        self
    }

    /// Add the clause only when `value` is present.
    pub fn eq_opt(self, path: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.eq(path, v),
            None => self,
        }
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// True when every clause matches `body`.
    pub fn matches(&self, body: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(path, expected)| lookup_path(body, path) == Some(expected))
    }
}

/// Resolve a dotted path inside a JSON tree.
pub fn lookup_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(body, |node, segment| node.as_object()?.get(segment))
}

/// Generic persistent document collection operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `body` under a fresh id.
    async fn insert(&self, collection: &str, body: Value) -> StoreResult<DocId>;

    async fn find_by_id(&self, collection: &str, id: DocId) -> StoreResult<Option<Document>>;

    /// Most recently inserted document matching `filter`.
    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Matching documents, newest first, at most `limit` when given.
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Document>>;

    /// Shallow-merge `set` into the top level of the document. Returns false
    /// when no document has that id.
    async fn update_one(
        &self,
        collection: &str,
        id: DocId,
        set: Map<String, Value>,
    ) -> StoreResult<bool>;

    /// Destructively remove every matching document, returning the count.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;
}
