use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

use crate::document::{
    apply_fields, plan_clamped_add, timestamp_now, ClampedWrite, Document, FieldWrite,
};
use crate::store::{AggregateStore, Direction, DocPath, Query, Snapshot, StoreError, WriteOp};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Document store kept in a single Postgres table, one row per document path.
pub struct PgStore {
    pool: PgPool,
    batch_limit: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, batch_limit: usize) -> Self {
        Self { pool, batch_limit }
    }
}

fn select_sql(query: &Query) -> String {
    let mut sql = String::from(
        "SELECT path, data FROM placement_ledger.documents WHERE collection = $1",
    );
    let mut next = 2;

    if query.filter.is_some() {
        sql.push_str(&format!(" AND data -> ${next}::text = ${}::jsonb", next + 1));
        next += 2;
    }

    match &query.order {
        Some((_, direction)) => {
            let direction = match direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            sql.push_str(&format!(
                " AND data ? ${next}::text ORDER BY data -> ${next}::text {direction}, path"
            ));
            next += 1;
        }
        None => sql.push_str(" ORDER BY path"),
    }

    if query.limit.is_some() {
        sql.push_str(&format!(" LIMIT ${next}"));
    }
    sql
}

async fn lock_row(conn: &mut PgConnection, path: &DocPath) -> Result<Option<Document>, StoreError> {
    let data: Option<Json<Document>> = sqlx::query_scalar(
        "SELECT data FROM placement_ledger.documents WHERE path = $1 FOR UPDATE",
    )
    .bind(path.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(data.map(|json| json.0))
}

/// Inserts an empty document unless one exists, so the row can be locked.
/// Returns whether the row was created.
async fn insert_empty(conn: &mut PgConnection, path: &DocPath) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO placement_ledger.documents (path, collection, doc_id, data, updated_at)
        VALUES ($1, $2, $3, '{}'::jsonb, now())
        ON CONFLICT (path) DO NOTHING
        "#,
    )
    .bind(path.as_str())
    .bind(path.parent().as_str())
    .bind(path.id())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn upsert(
    conn: &mut PgConnection,
    path: &DocPath,
    data: &Document,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO placement_ledger.documents (path, collection, doc_id, data, updated_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (path) DO UPDATE
        SET data = EXCLUDED.data, updated_at = now()
        "#,
    )
    .bind(path.as_str())
    .bind(path.parent().as_str())
    .bind(path.id())
    .bind(Json(data))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Applies a clamped add to one row while holding its lock.
async fn clamped_in_tx(
    conn: &mut PgConnection,
    path: &DocPath,
    field: &str,
    delta: i64,
    stamp_field: &str,
    now: &str,
) -> Result<ClampedWrite, StoreError> {
    let created = insert_empty(conn, path).await?;
    let existing = lock_row(conn, path).await?;
    let plan = plan_clamped_add(
        if created { None } else { existing.as_ref() },
        field,
        delta,
    );

    if plan.written {
        let mut doc = existing.unwrap_or_default();
        apply_fields(
            &mut doc,
            &[
                FieldWrite::value(field, plan.current),
                FieldWrite::server_timestamp(stamp_field),
            ],
            now,
        );
        upsert(conn, path, &doc).await?;
    }
    Ok(plan)
}

#[async_trait]
impl AggregateStore for PgStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let data: Option<Json<Document>> =
            sqlx::query_scalar("SELECT data FROM placement_ledger.documents WHERE path = $1")
                .bind(path.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(data.map(|json| Snapshot {
            path: path.clone(),
            data: json.0,
        }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Snapshot>, StoreError> {
        let sql = select_sql(query);
        let mut rows = sqlx::query(&sql).bind(query.collection.as_str());

        if let Some((field, value)) = &query.filter {
            rows = rows.bind(field.as_str()).bind(Json(value));
        }
        if let Some((field, _)) = &query.order {
            rows = rows.bind(field.as_str());
        }
        if let Some(limit) = query.limit {
            rows = rows.bind(limit as i64);
        }

        let records = rows.fetch_all(&self.pool).await?;
        let mut snapshots = Vec::with_capacity(records.len());

        for row in records {
            let path: String = row.try_get("path")?;
            let data: Json<Document> = row.try_get("data")?;
            snapshots.push(Snapshot {
                path: DocPath::parse(&path),
                data: data.0,
            });
        }

        Ok(snapshots)
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.len() > self.batch_limit {
            return Err(StoreError::BatchTooLarge {
                ops: ops.len(),
                limit: self.batch_limit,
            });
        }

        let mut tx = self.pool.begin().await?;
        let now = timestamp_now();

        for op in &ops {
            match op {
                WriteOp::Set { path, data } => upsert(&mut tx, path, data).await?,
                WriteOp::Merge { path, fields } => {
                    insert_empty(&mut tx, path).await?;
                    let mut doc = lock_row(&mut tx, path).await?.unwrap_or_default();
                    apply_fields(&mut doc, fields, &now);
                    upsert(&mut tx, path, &doc).await?;
                }
                WriteOp::Update { path, fields } => {
                    let Some(mut doc) = lock_row(&mut tx, path).await? else {
                        // Dropping the transaction rolls back everything staged so far.
                        return Err(StoreError::Missing {
                            path: path.to_string(),
                        });
                    };
                    apply_fields(&mut doc, fields, &now);
                    upsert(&mut tx, path, &doc).await?;
                }
                WriteOp::Delete { path } => {
                    sqlx::query("DELETE FROM placement_ledger.documents WHERE path = $1")
                        .bind(path.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOp::ClampedAdd {
                    path,
                    field,
                    delta,
                    stamp_field,
                } => {
                    clamped_in_tx(&mut tx, path, field, *delta, stamp_field, &now).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clamped_add(
        &self,
        path: &DocPath,
        field: &str,
        delta: i64,
        stamp_field: &str,
    ) -> Result<ClampedWrite, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = timestamp_now();
        let plan = clamped_in_tx(&mut tx, path, field, delta, stamp_field, &now).await?;
        tx.commit().await?;
        Ok(plan)
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}
