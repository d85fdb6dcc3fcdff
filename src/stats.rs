//! Maintenance of the `systemStats/dashboard` summary record.
//!
//! Increments go through the store's atomic field increment. Decrements are
//! floored at zero, which needs a read before the write, so they go through
//! [`AggregateStore::clamped_add`] and run under the store's row lock.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::document::{timestamp_now, FieldWrite};
use crate::models::{
    CompanyStatus, CompanyYear, PlacementStatus, Student, StudentStats, SystemStats,
};
use crate::store::{paths, AggregateStore, Query, StoreError, WriteOp};

const LAST_UPDATED: &str = "lastUpdated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "camelCase")]
pub enum StatField {
    TotalYears,
    TotalCompanies,
    CompletedCompanies,
    RunningCompanies,
    TotalStudents,
    TotalPlaced,
    TotalNotPlaced,
    TotalOffers,
}

impl StatField {
    pub const ALL: [StatField; 8] = [
        StatField::TotalYears,
        StatField::TotalCompanies,
        StatField::CompletedCompanies,
        StatField::RunningCompanies,
        StatField::TotalStudents,
        StatField::TotalPlaced,
        StatField::TotalNotPlaced,
        StatField::TotalOffers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatField::TotalYears => "totalYears",
            StatField::TotalCompanies => "totalCompanies",
            StatField::CompletedCompanies => "completedCompanies",
            StatField::RunningCompanies => "runningCompanies",
            StatField::TotalStudents => "totalStudents",
            StatField::TotalPlaced => "totalPlaced",
            StatField::TotalNotPlaced => "totalNotPlaced",
            StatField::TotalOffers => "totalOffers",
        }
    }
}

impl fmt::Display for StatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("unknown stat field: {s}"))
    }
}

pub async fn increment<S>(store: &S, field: StatField, delta: i64) -> Result<(), StoreError>
where
    S: AggregateStore + ?Sized,
{
    let path = paths::dashboard();

    if delta >= 0 {
        store
            .commit(vec![WriteOp::Merge {
                path,
                fields: vec![
                    FieldWrite::increment(field.as_str(), delta),
                    FieldWrite::server_timestamp(LAST_UPDATED),
                ],
            }])
            .await?;
        info!(%field, delta, "incremented system stat");
        return Ok(());
    }

    let outcome = store
        .clamped_add(&path, field.as_str(), delta, LAST_UPDATED)
        .await?;
    match outcome.previous {
        None => warn!(%field, "system stats missing on decrement, created at 0"),
        Some(_) if !outcome.written => warn!(%field, "skipped decrement, already at 0"),
        Some(previous) => info!(
            %field,
            previous,
            current = outcome.current,
            "decremented system stat"
        ),
    }
    Ok(())
}

pub async fn decrement<S>(store: &S, field: StatField, delta: i64) -> Result<(), StoreError>
where
    S: AggregateStore + ?Sized,
{
    increment(store, field, -delta).await
}

/// A clamped decrement of one counter, for callers that fold the counter
/// update into a larger batch.
pub fn decrement_op(field: StatField, delta: i64) -> WriteOp {
    WriteOp::ClampedAdd {
        path: paths::dashboard(),
        field: field.as_str().to_string(),
        delta: -delta,
        stamp_field: LAST_UPDATED.to_string(),
    }
}

pub async fn set_stat<S>(store: &S, field: StatField, value: i64) -> Result<(), StoreError>
where
    S: AggregateStore + ?Sized,
{
    store
        .commit(vec![WriteOp::Merge {
            path: paths::dashboard(),
            fields: vec![
                FieldWrite::value(field.as_str(), value),
                FieldWrite::server_timestamp(LAST_UPDATED),
            ],
        }])
        .await?;
    info!(%field, value, "set system stat");
    Ok(())
}

/// Reads the summary record, or a zeroed one when it has never been written.
pub async fn get_stats<S>(store: &S) -> Result<SystemStats, StoreError>
where
    S: AggregateStore + ?Sized,
{
    match store.get(&paths::dashboard()).await? {
        Some(snapshot) => snapshot.decode(),
        None => Ok(SystemStats::default()),
    }
}

pub fn tally(years: usize, companies: &[CompanyYear], students: &[Student]) -> SystemStats {
    let mut stats = SystemStats {
        total_years: years as i64,
        total_companies: companies.len() as i64,
        total_students: students.len() as i64,
        ..SystemStats::default()
    };

    for company in companies {
        match company.status {
            CompanyStatus::Completed => stats.completed_companies += 1,
            CompanyStatus::Running => stats.running_companies += 1,
            CompanyStatus::Unknown => {}
        }
    }

    for student in students {
        match student.current_status {
            PlacementStatus::Placed => stats.total_placed += 1,
            PlacementStatus::NotPlaced => stats.total_not_placed += 1,
        }
        stats.total_offers += student.total_offers;
    }

    stats
}

/// Totals over an already filtered set of students. `avg_offers` is rounded
/// to two decimals and is 0 for an empty set.
pub fn student_stats<'a>(students: impl IntoIterator<Item = &'a Student>) -> StudentStats {
    let mut stats = StudentStats::default();
    for student in students {
        stats.total += 1;
        match student.current_status {
            PlacementStatus::Placed => stats.placed += 1,
            PlacementStatus::NotPlaced => stats.not_placed += 1,
        }
        stats.total_offers += student.total_offers;
    }
    if stats.total > 0 {
        let avg = stats.total_offers as f64 / stats.total as f64;
        stats.avg_offers = (avg * 100.0).round() / 100.0;
    }
    stats
}

/// Recomputes every counter from the source collections and overwrites the
/// summary record.
pub async fn rebuild_from_source<S>(store: &S) -> Result<SystemStats, StoreError>
where
    S: AggregateStore + ?Sized,
{
    info!("rebuilding system stats from source collections");

    let years = store.query(&Query::new(paths::years())).await?;
    let companies = store
        .query(&Query::new(paths::companies()))
        .await?
        .iter()
        .map(|snapshot| snapshot.decode::<CompanyYear>())
        .collect::<Result<Vec<_>, _>>()?;
    let students = store
        .query(&Query::new(paths::students()))
        .await?
        .iter()
        .map(|snapshot| snapshot.decode::<Student>())
        .collect::<Result<Vec<_>, _>>()?;

    let stats = tally(years.len(), &companies, &students);

    let now = timestamp_now();
    let mut data = Map::new();
    let counters = [
        (StatField::TotalYears, stats.total_years),
        (StatField::TotalCompanies, stats.total_companies),
        (StatField::CompletedCompanies, stats.completed_companies),
        (StatField::RunningCompanies, stats.running_companies),
        (StatField::TotalStudents, stats.total_students),
        (StatField::TotalPlaced, stats.total_placed),
        (StatField::TotalNotPlaced, stats.total_not_placed),
        (StatField::TotalOffers, stats.total_offers),
    ];
    for (field, value) in counters {
        data.insert(field.as_str().to_string(), Value::from(value));
    }
    data.insert(LAST_UPDATED.to_string(), Value::String(now.clone()));
    data.insert("initializedAt".to_string(), Value::String(now));

    store
        .commit(vec![WriteOp::Set {
            path: paths::dashboard(),
            data,
        }])
        .await?;

    info!(
        years = stats.total_years,
        companies = stats.total_companies,
        students = stats.total_students,
        placed = stats.total_placed,
        offers = stats.total_offers,
        "system stats rebuilt"
    );

    get_stats(store).await
}
