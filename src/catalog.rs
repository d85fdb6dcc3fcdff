use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{CompanyDetails, CompanyYear, Round, YearSummary};
use crate::store::{paths, AggregateStore, Query, StoreError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("company {0} not found")]
    CompanyNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// All Company-Year records, newest year first and by name within a year.
pub async fn list_companies<S>(store: &S) -> Result<Vec<CompanyYear>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let mut companies = store
        .query(&Query::new(paths::companies()))
        .await?
        .into_iter()
        .map(|snapshot| {
            let mut company: CompanyYear = snapshot.decode()?;
            company.company_year_id = snapshot.id().to_string();
            Ok(company)
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    companies.sort_by(|a, b| {
        (b.year, b.company_name.as_deref()).cmp(&(a.year, a.company_name.as_deref()))
    });
    Ok(companies)
}

pub async fn company_details<S>(
    store: &S,
    company_year_id: &str,
) -> Result<CompanyDetails, CatalogError>
where
    S: AggregateStore + ?Sized,
{
    let company = load_company(store, company_year_id).await?;

    let placements = store
        .query(&Query::new(paths::company(company_year_id).collection("placements")))
        .await?
        .into_iter()
        .map(|snapshot| (snapshot.id().to_string(), snapshot.data))
        .collect();

    Ok(CompanyDetails {
        company,
        placements,
    })
}

/// Rounds of a company ordered by round number, each with its data rows.
pub async fn company_rounds<S>(store: &S, company_year_id: &str) -> Result<Vec<Round>, CatalogError>
where
    S: AggregateStore + ?Sized,
{
    load_company(store, company_year_id).await?;

    let mut rounds = Vec::new();
    for snapshot in store.query(&Query::new(paths::rounds(company_year_id))).await? {
        let mut round: Round = snapshot.decode()?;
        round.round_id = snapshot.id().to_string();
        round.data = store
            .query(&Query::new(snapshot.path.collection("data")))
            .await?
            .into_iter()
            .map(|row| (row.id().to_string(), row.data))
            .collect::<BTreeMap<_, _>>();
        debug!(
            company_year_id,
            round_id = %round.round_id,
            rows = round.data.len(),
            "loaded round"
        );
        rounds.push(round);
    }

    rounds.sort_by_key(|round| round.round_number);
    Ok(rounds)
}

/// Year summaries, most recent first. The year is taken from the document id.
pub async fn list_years<S>(store: &S) -> Result<Vec<YearSummary>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let mut years = Vec::new();
    for snapshot in store.query(&Query::new(paths::years())).await? {
        let Ok(year) = snapshot.id().parse::<i64>() else {
            warn!(id = snapshot.id(), "skipping year document with a non-numeric id");
            continue;
        };
        let mut summary: YearSummary = snapshot.decode()?;
        summary.year = year;
        years.push(summary);
    }

    years.sort_by(|a, b| b.year.cmp(&a.year));
    Ok(years)
}

async fn load_company<S>(store: &S, company_year_id: &str) -> Result<CompanyYear, CatalogError>
where
    S: AggregateStore + ?Sized,
{
    let snapshot = store
        .get(&paths::company(company_year_id))
        .await?
        .ok_or_else(|| CatalogError::CompanyNotFound(company_year_id.to_string()))?;
    let mut company: CompanyYear = snapshot.decode()?;
    company.company_year_id = company_year_id.to_string();
    Ok(company)
}
