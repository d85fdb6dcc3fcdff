use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::document::{
    apply_fields, lookup, plan_clamped_add, timestamp_now, ClampedWrite, Document, FieldWrite,
};
use crate::store::{
    AggregateStore, Direction, DocPath, Query, Snapshot, StoreError, WriteOp, MAX_BATCH_OPS,
};

/// In-process document store used by tests.
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Document>>,
    batch_limit: usize,
    commits: AtomicUsize,
    fail_on_commit: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_batch_limit(MAX_BATCH_OPS)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            batch_limit,
            commits: AtomicUsize::new(0),
            fail_on_commit: None,
        }
    }

    /// Makes the n-th commit (1-based) fail without applying anything.
    pub fn failing_on_commit(mut self, n: usize) -> Self {
        self.fail_on_commit = Some(n);
        self
    }

    pub fn clear_failure(&mut self) {
        self.fail_on_commit = None;
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn insert(&self, path: &str, data: Value) {
        let data = data.as_object().cloned().unwrap_or_default();
        self.docs.lock().await.insert(path.to_string(), data);
    }

    pub async fn read(&self, path: &str) -> Option<Document> {
        self.docs.lock().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }
}

/// Ordering used by ordered queries: numbers numerically, everything else by
/// its string form.
pub fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn merge_into(
    docs: &mut BTreeMap<String, Document>,
    path: &DocPath,
    fields: &[FieldWrite],
    must_exist: bool,
    now: &str,
) -> Result<(), StoreError> {
    if must_exist && !docs.contains_key(path.as_str()) {
        return Err(StoreError::Missing {
            path: path.to_string(),
        });
    }
    apply_fields(docs.entry(path.to_string()).or_default(), fields, now);
    Ok(())
}

fn clamped_into(
    docs: &mut BTreeMap<String, Document>,
    path: &DocPath,
    field: &str,
    delta: i64,
    stamp_field: &str,
    now: &str,
) -> ClampedWrite {
    let plan = plan_clamped_add(docs.get(path.as_str()), field, delta);
    if plan.written {
        apply_fields(
            docs.entry(path.to_string()).or_default(),
            &[
                FieldWrite::value(field, plan.current),
                FieldWrite::server_timestamp(stamp_field),
            ],
            now,
        );
    }
    plan
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(path.as_str()).map(|data| Snapshot {
            path: path.clone(),
            data: data.clone(),
        }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        let docs = self.docs.lock().await;
        let mut matches: Vec<Snapshot> = docs
            .iter()
            .map(|(path, data)| (DocPath::parse(path), data))
            .filter(|(path, _)| path.parent() == query.collection)
            .filter(|(_, data)| match &query.filter {
                Some((field, expected)) => lookup(data, field) == Some(expected),
                None => true,
            })
            .filter(|(_, data)| match &query.order {
                Some((field, _)) => lookup(data, field).is_some(),
                None => true,
            })
            .map(|(path, data)| Snapshot {
                path,
                data: data.clone(),
            })
            .collect();

        if let Some((field, direction)) = &query.order {
            matches.sort_by(|a, b| {
                let ordering = match (lookup(&a.data, field), lookup(&b.data, field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => CmpOrdering::Equal,
                };
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.len() > self.batch_limit {
            return Err(StoreError::BatchTooLarge {
                ops: ops.len(),
                limit: self.batch_limit,
            });
        }

        let attempt = self.commits.load(Ordering::SeqCst) + 1;
        if self.fail_on_commit == Some(attempt) {
            return Err(StoreError::Injected(attempt));
        }

        let mut docs = self.docs.lock().await;
        let mut staged = docs.clone();
        let now = timestamp_now();
        for op in &ops {
            match op {
                WriteOp::Set { path, data } => {
                    staged.insert(path.to_string(), data.clone());
                }
                WriteOp::Merge { path, fields } => {
                    merge_into(&mut staged, path, fields, false, &now)?;
                }
                WriteOp::Update { path, fields } => {
                    merge_into(&mut staged, path, fields, true, &now)?;
                }
                WriteOp::Delete { path } => {
                    staged.remove(path.as_str());
                }
                WriteOp::ClampedAdd {
                    path,
                    field,
                    delta,
                    stamp_field,
                } => {
                    clamped_into(&mut staged, path, field, *delta, stamp_field, &now);
                }
            }
        }
        *docs = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clamped_add(
        &self,
        path: &DocPath,
        field: &str,
        delta: i64,
        stamp_field: &str,
    ) -> Result<ClampedWrite, StoreError> {
        let mut docs = self.docs.lock().await;
        Ok(clamped_into(&mut docs, path, field, delta, stamp_field, &timestamp_now()))
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paths;
    use serde_json::json;

    #[tokio::test]
    async fn failed_batches_leave_no_trace() {
        let store = MemoryStore::new();
        store.insert("companies/acme-2025", json!({"totalApplied": 2})).await;

        let result = store
            .commit(vec![
                WriteOp::Update {
                    path: paths::company("acme-2025"),
                    fields: vec![FieldWrite::increment("totalApplied", -1)],
                },
                WriteOp::Update {
                    path: paths::company("missing-2025"),
                    fields: vec![FieldWrite::increment("totalApplied", -1)],
                },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::Missing { .. })));
        let acme = store.read("companies/acme-2025").await.unwrap();
        assert_eq!(acme["totalApplied"], json!(2));
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn rejects_batches_over_the_limit() {
        let store = MemoryStore::with_batch_limit(2);
        let ops = (0..3)
            .map(|i| WriteOp::Delete {
                path: paths::student(&format!("s{i}")),
            })
            .collect();
        let err = store.commit(ops).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge { ops: 3, limit: 2 }));
    }

    #[tokio::test]
    async fn queries_scope_to_direct_children() {
        let store = MemoryStore::new();
        store.insert("companies/acme-2025", json!({"year": 2025})).await;
        store.insert("companies/acme-2025/rounds/r1", json!({"roundNumber": 1})).await;
        store.insert("companies/globex-2026", json!({"year": 2026})).await;

        let all = store.query(&Query::new(paths::companies())).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .query(&Query::new(paths::companies()).where_eq("year", 2026))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id(), "globex-2026");
    }

    #[tokio::test]
    async fn clamped_adds_inside_a_batch_floor_at_zero() {
        let store = MemoryStore::new();
        store
            .insert("systemStats/dashboard", json!({"totalOffers": 1, "totalPlaced": 0}))
            .await;

        let clamp = |field: &str, delta: i64| WriteOp::ClampedAdd {
            path: paths::dashboard(),
            field: field.to_string(),
            delta,
            stamp_field: "lastUpdated".to_string(),
        };
        store
            .commit(vec![clamp("totalOffers", -3), clamp("totalPlaced", -1)])
            .await
            .unwrap();

        let doc = store.read("systemStats/dashboard").await.unwrap();
        assert_eq!(doc["totalOffers"], json!(0));
        assert_eq!(doc["totalPlaced"], json!(0));
        assert!(doc.contains_key("lastUpdated"));
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = json!("2026-01-01T00:00:00.000000Z");
        let b = json!("2026-01-02T00:00:00.000000Z");
        assert_eq!(compare_values(&a, &b), CmpOrdering::Less);
        assert_eq!(compare_values(&json!(10), &json!(9)), CmpOrdering::Greater);
    }
}
