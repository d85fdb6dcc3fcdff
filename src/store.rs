use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::document::{ClampedWrite, Document, FieldWrite};

/// Largest number of write operations a single batch may carry.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("no document to update at {path}")]
    Missing { path: String },
    #[error("batch of {ops} operations exceeds the limit of {limit}")]
    BatchTooLarge { ops: usize, limit: usize },
    #[error("malformed document at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[cfg(test)]
    #[error("injected failure on commit {0}")]
    Injected(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn doc(&self, id: &str) -> DocPath {
        DocPath(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocPath {
    pub fn parse(path: &str) -> Self {
        Self(path.to_string())
    }

    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }

    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    pub fn id(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, id)| id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known collections of the placement data set.
pub mod paths {
    use super::{CollectionPath, DocPath};

    pub fn students() -> CollectionPath {
        CollectionPath::root("students")
    }

    pub fn companies() -> CollectionPath {
        CollectionPath::root("companies")
    }

    pub fn years() -> CollectionPath {
        CollectionPath::root("years")
    }

    pub fn checkpoints() -> CollectionPath {
        CollectionPath::root("cascadeCheckpoints")
    }

    pub fn student(id: &str) -> DocPath {
        students().doc(id)
    }

    pub fn company(company_year_id: &str) -> DocPath {
        companies().doc(company_year_id)
    }

    pub fn year(year: i64) -> DocPath {
        years().doc(&year.to_string())
    }

    pub fn rounds(company_year_id: &str) -> CollectionPath {
        company(company_year_id).collection("rounds")
    }

    pub fn placement(company_year_id: &str, student_id: &str) -> DocPath {
        company(company_year_id)
            .collection("placements")
            .doc(student_id)
    }

    pub fn checkpoint(student_id: &str) -> DocPath {
        checkpoints().doc(student_id)
    }

    pub fn dashboard() -> DocPath {
        CollectionPath::root("systemStats").doc("dashboard")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { path: DocPath, data: Document },
    Merge {
        path: DocPath,
        fields: Vec<FieldWrite>,
    },
    Update {
        path: DocPath,
        fields: Vec<FieldWrite>,
    },
    Delete { path: DocPath },
    /// Adds `delta` to `field` floored at zero, as [`AggregateStore::clamped_add`]
    /// does, but inside the batch.
    ClampedAdd {
        path: DocPath,
        field: String,
        delta: i64,
        stamp_field: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filter: Option<(String, Value)>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filter: None,
            order: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter = Some((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    pub data: Document,
}

impl Snapshot {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|source| {
            StoreError::Malformed {
                path: self.path.to_string(),
                source,
            }
        })
    }
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError>;

    /// Applies every operation or none of them.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Adds `delta` to a numeric field under a row lock, floored at zero, and
    /// stamps `stamp_field` whenever a write happens.
    async fn clamped_add(
        &self,
        path: &DocPath,
        field: &str,
        delta: i64,
        stamp_field: &str,
    ) -> Result<ClampedWrite, StoreError>;

    fn batch_limit(&self) -> usize {
        MAX_BATCH_OPS
    }
}

/// Wraps a store and counts document reads for instrumentation.
pub struct CountingStore<S> {
    inner: S,
    reads: AtomicU64,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn count(&self, n: usize) {
        self.reads.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl<S: AggregateStore> AggregateStore for CountingStore<S> {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let result = self.inner.get(path).await?;
        self.count(1);
        Ok(result)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        let docs = self.inner.query(query).await?;
        self.count(docs.len());
        Ok(docs)
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.inner.commit(ops).await
    }

    async fn clamped_add(
        &self,
        path: &DocPath,
        field: &str,
        delta: i64,
        stamp_field: &str,
    ) -> Result<ClampedWrite, StoreError> {
        let result = self.inner.clamped_add(path, field, delta, stamp_field).await?;
        self.count(1);
        Ok(result)
    }

    fn batch_limit(&self) -> usize {
        self.inner.batch_limit()
    }
}
