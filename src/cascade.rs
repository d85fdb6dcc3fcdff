//! Cascading deletion of a student across every collection that references it.
//!
//! All reads happen up front and produce a plan: idempotent deletions first,
//! then the counter decrements (company-years, years and the dashboard
//! counters), then the student document itself. A plan that fits in one batch
//! is committed atomically. A longer plan is committed in chunks, and every
//! chunk carries a write to `cascadeCheckpoints/{student}` recording how far
//! the cascade got, so an interrupted cascade can be resumed without
//! decrementing anything twice.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::document::{timestamp_now, FieldWrite};
use crate::models::{CascadingUpdates, DeletionSummary, PlacementStatus, Student};
use crate::stats::{self, StatField};
use crate::store::{paths, AggregateStore, DocPath, Query, StoreError, WriteOp};

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("student {0} not found")]
    NotFound(String),
    #[error(
        "cascade for student {student_id} stopped after {batches_committed} committed batch(es): {source}"
    )]
    Partial {
        student_id: String,
        batches_committed: usize,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Checkpoint {
    student_id: String,
    student: Student,
    #[serde(flatten)]
    progress: Progress,
    started_at: String,
}

/// Running totals of what committed batches have applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Progress {
    decrements_committed: usize,
    batches_committed: usize,
    placements_deleted: usize,
    rounds_deleted: usize,
}

impl Progress {
    fn record(&mut self, batch: &[Step]) {
        self.batches_committed += 1;
        for step in batch {
            match step.kind {
                StepKind::Placement => self.placements_deleted += 1,
                StepKind::RoundRow => self.rounds_deleted += 1,
                StepKind::Decrement => self.decrements_committed += 1,
                StepKind::Student => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Placement,
    RoundRow,
    Decrement,
    Student,
}

struct Step {
    op: WriteOp,
    kind: StepKind,
}

enum Mode {
    Atomic,
    Fresh(Checkpoint),
    Resume(Progress),
}

/// Deletes a student and everything derived from it. When an earlier
/// cascade for the same student was interrupted, that cascade is resumed
/// instead of planning a new one.
pub async fn delete_student_cascade<S>(
    store: &S,
    student_id: &str,
) -> Result<DeletionSummary, CascadeError>
where
    S: AggregateStore + ?Sized,
{
    if store.get(&paths::checkpoint(student_id)).await?.is_some() {
        warn!(student_id, "found an interrupted cascade, resuming it");
        return resume_cascade(store, student_id).await;
    }

    info!(student_id, "fetching student");
    let snapshot = store
        .get(&paths::student(student_id))
        .await?
        .ok_or_else(|| CascadeError::NotFound(student_id.to_string()))?;
    let student: Student = snapshot.decode()?;

    info!(
        student_id,
        status = ?student.current_status,
        offers = student.total_offers,
        companies = student.company_status.len(),
        "planning cascade"
    );

    let deletions = plan_deletions(store, student_id, &student, false).await?;
    let (decrements, years) = plan_decrements(&student);

    let total_ops = deletions.len() + decrements.len() + 1;
    let mode = if total_ops <= store.batch_limit() {
        Mode::Atomic
    } else {
        Mode::Fresh(Checkpoint {
            student_id: student_id.to_string(),
            student: student.clone(),
            progress: Progress::default(),
            started_at: timestamp_now(),
        })
    };

    let steps = build_steps(student_id, deletions, decrements);
    let progress = execute(store, student_id, steps, mode).await?;

    Ok(finish(student_id, &student, years.len(), progress))
}

/// Completes a cascade that was interrupted after committing some batches.
pub async fn resume_cascade<S>(
    store: &S,
    student_id: &str,
) -> Result<DeletionSummary, CascadeError>
where
    S: AggregateStore + ?Sized,
{
    let snapshot = store
        .get(&paths::checkpoint(student_id))
        .await?
        .ok_or_else(|| CascadeError::NotFound(student_id.to_string()))?;
    let Checkpoint {
        student, progress, ..
    } = snapshot.decode()?;

    info!(
        student_id,
        decrements_committed = progress.decrements_committed,
        batches_committed = progress.batches_committed,
        "resuming cascade"
    );

    let deletions = plan_deletions(store, student_id, &student, true).await?;
    let (decrements, years) = plan_decrements(&student);
    let pending: Vec<WriteOp> = decrements
        .into_iter()
        .skip(progress.decrements_committed)
        .collect();

    let steps = build_steps(student_id, deletions, pending);
    let progress = execute(store, student_id, steps, Mode::Resume(progress)).await?;

    Ok(finish(student_id, &student, years.len(), progress))
}

/// Ids of students whose cascade started but never completed.
pub async fn pending_cascades<S>(store: &S) -> Result<Vec<String>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let checkpoints = store.query(&Query::new(paths::checkpoints())).await?;
    Ok(checkpoints
        .iter()
        .map(|snapshot| snapshot.id().to_string())
        .collect())
}

/// Placement and round-data deletions. With `verify_placements` each
/// placement is read first and only deleted while it still exists, so a
/// resumed cascade counts only what it removes itself.
async fn plan_deletions<S>(
    store: &S,
    student_id: &str,
    student: &Student,
    verify_placements: bool,
) -> Result<Vec<Step>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let mut steps = Vec::new();

    for (company_year_id, entry) in &student.company_status {
        if entry.final_selection {
            let path = paths::placement(company_year_id, student_id);
            if verify_placements && store.get(&path).await?.is_none() {
                debug!(%path, "placement already deleted");
            } else {
                debug!(%path, "deleting placement");
                steps.push(Step {
                    op: WriteOp::Delete { path },
                    kind: StepKind::Placement,
                });
            }
        }

        // Round data is not indexed by student, so every round is checked.
        let rounds = store
            .query(&Query::new(paths::rounds(company_year_id)))
            .await?;
        for round in rounds {
            let rows = store
                .query(
                    &Query::new(round.path.collection("data"))
                        .where_eq("studentId", student_id)
                        .limit(1),
                )
                .await?;
            for row in rows {
                debug!(path = %row.path, "deleting round data");
                steps.push(Step {
                    op: WriteOp::Delete { path: row.path },
                    kind: StepKind::RoundRow,
                });
            }
        }
    }

    Ok(steps)
}

/// Counter updates implied by the student snapshot: one per Company-Year,
/// one per year, then the dashboard counters. Depends only on the snapshot,
/// so a resumed cascade reproduces the same sequence.
fn plan_decrements(student: &Student) -> (Vec<WriteOp>, BTreeSet<i64>) {
    let mut ops = Vec::new();
    let mut years = BTreeSet::new();

    for (company_year_id, entry) in &student.company_status {
        if let Some(year) = entry.year {
            years.insert(year);
        }

        let mut fields = vec![
            FieldWrite::increment("totalApplied", -1),
            FieldWrite::server_timestamp("updatedAt"),
        ];
        if entry.final_selection {
            fields.push(FieldWrite::increment("totalPlaced", -1));
        }
        ops.push(WriteOp::Update {
            path: paths::company(company_year_id),
            fields,
        });
    }

    for &year in &years {
        let mut fields = vec![
            FieldWrite::increment("totalStudentsParticipated", -1),
            FieldWrite::server_timestamp("updatedAt"),
        ];
        let mut placed = 0;
        for (company_year_id, entry) in &student.company_status {
            if entry.year == Some(year) && entry.final_selection {
                placed += 1;
                fields.push(FieldWrite::increment(
                    format!("companyWise.{company_year_id}.placed"),
                    -1,
                ));
            }
        }
        if placed > 0 {
            fields.push(FieldWrite::increment("totalPlaced", -placed));
        }
        ops.push(WriteOp::Update {
            path: paths::year(year),
            fields,
        });
    }

    ops.push(stats::decrement_op(StatField::TotalStudents, 1));
    let status_field = match student.current_status {
        PlacementStatus::Placed => StatField::TotalPlaced,
        PlacementStatus::NotPlaced => StatField::TotalNotPlaced,
    };
    ops.push(stats::decrement_op(status_field, 1));
    if student.total_offers > 0 {
        ops.push(stats::decrement_op(StatField::TotalOffers, student.total_offers));
    }

    (ops, years)
}

fn build_steps(student_id: &str, deletions: Vec<Step>, decrements: Vec<WriteOp>) -> Vec<Step> {
    let mut steps = deletions;
    steps.extend(decrements.into_iter().map(|op| Step {
        op,
        kind: StepKind::Decrement,
    }));
    steps.push(Step {
        op: WriteOp::Delete {
            path: paths::student(student_id),
        },
        kind: StepKind::Student,
    });
    steps
}

fn checkpoint_write(
    path: DocPath,
    fresh: Option<Checkpoint>,
    progress: Progress,
) -> Result<WriteOp, StoreError> {
    let Some(checkpoint) = fresh else {
        return Ok(WriteOp::Merge {
            path,
            fields: vec![
                FieldWrite::value("decrementsCommitted", progress.decrements_committed),
                FieldWrite::value("batchesCommitted", progress.batches_committed),
                FieldWrite::value("placementsDeleted", progress.placements_deleted),
                FieldWrite::value("roundsDeleted", progress.rounds_deleted),
                FieldWrite::server_timestamp("updatedAt"),
            ],
        });
    };

    let checkpoint = Checkpoint {
        progress,
        ..checkpoint
    };
    let data = serde_json::to_value(&checkpoint).map_err(|source| StoreError::Malformed {
        path: path.to_string(),
        source,
    })?;
    Ok(WriteOp::Set {
        path,
        data: data.as_object().cloned().unwrap_or_default(),
    })
}

async fn execute<S>(
    store: &S,
    student_id: &str,
    steps: Vec<Step>,
    mode: Mode,
) -> Result<Progress, CascadeError>
where
    S: AggregateStore + ?Sized,
{
    let (mut fresh, mut progress) = match mode {
        Mode::Atomic => {
            let mut progress = Progress::default();
            progress.record(&steps);
            let ops: Vec<WriteOp> = steps.into_iter().map(|step| step.op).collect();
            let count = ops.len();
            store.commit(ops).await?;
            info!(student_id, ops = count, "committed cascade in a single batch");
            return Ok(progress);
        }
        Mode::Fresh(checkpoint) => (Some(checkpoint), Progress::default()),
        Mode::Resume(progress) => (None, progress),
    };

    // One slot in every batch belongs to the checkpoint write.
    let capacity = store.batch_limit().saturating_sub(1).max(1);
    let checkpoint_path = paths::checkpoint(student_id);
    let mut remaining = steps.into_iter().peekable();

    while remaining.peek().is_some() {
        let chunk: Vec<Step> = remaining.by_ref().take(capacity).collect();
        let mut next = progress;
        next.record(&chunk);

        let checkpoint_op = if remaining.peek().is_none() {
            WriteOp::Delete {
                path: checkpoint_path.clone(),
            }
        } else {
            checkpoint_write(checkpoint_path.clone(), fresh.take(), next)?
        };
        let mut ops: Vec<WriteOp> = chunk.into_iter().map(|step| step.op).collect();
        ops.push(checkpoint_op);

        let count = ops.len();
        if let Err(source) = store.commit(ops).await {
            if progress.batches_committed == 0 {
                return Err(CascadeError::Store(source));
            }
            error!(
                student_id,
                batches_committed = progress.batches_committed,
                decrements_committed = progress.decrements_committed,
                error = %source,
                "cascade interrupted after partial commit, resume from checkpoint"
            );
            return Err(CascadeError::Partial {
                student_id: student_id.to_string(),
                batches_committed: progress.batches_committed,
                source,
            });
        }

        progress = next;
        info!(
            student_id,
            batch = progress.batches_committed,
            ops = count,
            "committed cascade batch"
        );
    }

    Ok(progress)
}

fn finish(
    student_id: &str,
    student: &Student,
    years_affected: usize,
    progress: Progress,
) -> DeletionSummary {
    let summary = DeletionSummary {
        message: "Student deleted successfully".to_string(),
        student_id: student_id.to_string(),
        student_name: student.display_name().to_string(),
        total_offers: student.total_offers,
        cascading_updates: CascadingUpdates {
            companies_affected: student.company_status.len(),
            rounds_deleted: progress.rounds_deleted,
            placements_deleted: progress.placements_deleted,
            years_affected,
        },
        batches_committed: progress.batches_committed,
    };
    info!(
        student_id,
        companies = summary.cascading_updates.companies_affected,
        rounds = summary.cascading_updates.rounds_deleted,
        placements = summary.cascading_updates.placements_deleted,
        years = summary.cascading_updates.years_affected,
        batches = summary.batches_committed,
        "student deletion complete"
    );
    summary
}
