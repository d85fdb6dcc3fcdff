use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::models::{
    CompanyWiseEntry, CompanyYear, DashboardCounts, DashboardStats, DashboardSummary, YearSummary,
};
use crate::stats;
use crate::store::{paths, AggregateStore, Direction, Query, StoreError};

pub const RECENT_COMPANIES: usize = 5;

/// Builds the dashboard from the counters record, one year document and a
/// bounded sample of recently updated companies.
pub async fn dashboard_summary<S>(store: &S, year: i64) -> Result<DashboardSummary, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let stats = stats::get_stats(store).await?;

    let mut latest_year = match store.get(&paths::year(year)).await? {
        Some(snapshot) => snapshot.decode::<YearSummary>()?,
        None => {
            warn!(year, "no year document, starting from an empty summary");
            YearSummary::default()
        }
    };
    latest_year.year = year;

    if latest_year.company_wise.is_empty() {
        latest_year.company_wise = company_wise_from_companies(store, year).await?;
        info!(
            year,
            companies = latest_year.company_wise.len(),
            "rebuilt companyWise from companies"
        );
    }

    let recent_companies = recent_companies(store).await?;

    Ok(DashboardSummary {
        counts: DashboardCounts {
            years: stats.total_years,
            companies: stats.total_companies,
            students: stats.total_students,
        },
        stats: DashboardStats {
            total_companies: stats.total_companies,
            completed_companies: stats.completed_companies,
            running_companies: stats.running_companies,
            total_placed: stats.total_placed,
        },
        latest_year,
        recent_companies,
    })
}

async fn company_wise_from_companies<S>(
    store: &S,
    year: i64,
) -> Result<BTreeMap<String, CompanyWiseEntry>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let companies = store
        .query(&Query::new(paths::companies()).where_eq("year", year))
        .await?;

    let mut company_wise = BTreeMap::new();
    for snapshot in companies {
        let company: CompanyYear = snapshot.decode()?;
        company_wise.insert(
            snapshot.id().to_string(),
            CompanyWiseEntry {
                company_name: company.company_name.unwrap_or_else(|| "Unknown".to_string()),
                placed: company.total_placed,
                status: company.status.as_str().to_string(),
            },
        );
    }
    Ok(company_wise)
}

async fn recent_companies<S>(store: &S) -> Result<Vec<CompanyYear>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let query = Query::new(paths::companies())
        .order_by("updatedAt", Direction::Descending)
        .limit(RECENT_COMPANIES);

    store
        .query(&query)
        .await?
        .into_iter()
        .map(|snapshot| {
            let mut company: CompanyYear = snapshot.decode()?;
            company.company_year_id = snapshot.id().to_string();
            Ok(company)
        })
        .collect()
}
