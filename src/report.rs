use std::fmt::Write;

use crate::models::{DashboardSummary, SystemStats};

pub fn build_report(summary: &DashboardSummary, stats: &SystemStats) -> String {
    let mut output = String::new();
    let year = &summary.latest_year;

    let _ = writeln!(output, "# Placement Dashboard Report");
    match stats.last_updated {
        Some(updated) => {
            let _ = writeln!(output, "Counters as of {}", updated.format("%Y-%m-%d %H:%M UTC"));
        }
        None => {
            let _ = writeln!(output, "Counters have never been written.");
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Totals");
    let _ = writeln!(output, "- Years: {}", summary.counts.years);
    let _ = writeln!(
        output,
        "- Companies: {} ({} completed, {} running)",
        summary.stats.total_companies,
        summary.stats.completed_companies,
        summary.stats.running_companies
    );
    let _ = writeln!(
        output,
        "- Students: {} ({} placed, {} not placed)",
        summary.counts.students, stats.total_placed, stats.total_not_placed
    );
    let _ = writeln!(output, "- Offers: {}", stats.total_offers);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Year {}", year.year);
    let _ = writeln!(
        output,
        "{} students participated, {} placed.",
        year.total_students_participated, year.total_placed
    );

    if year.company_wise.is_empty() {
        let _ = writeln!(output, "No companies recorded for this year.");
    } else {
        let mut entries: Vec<_> = year.company_wise.iter().collect();
        entries.sort_by(|a, b| b.1.placed.cmp(&a.1.placed).then_with(|| a.0.cmp(b.0)));
        for (company_year_id, entry) in entries {
            let _ = writeln!(
                output,
                "- {} ({}, {}): {} placed",
                entry.company_name, company_year_id, entry.status, entry.placed
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activity");

    if summary.recent_companies.is_empty() {
        let _ = writeln!(output, "No company updates recorded.");
    } else {
        for company in &summary.recent_companies {
            let updated = company
                .updated_at
                .map(|at| at.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let _ = writeln!(
                output,
                "- {} ({}) on {}: {} applied, {} placed, {}",
                company.company_name.as_deref().unwrap_or("Unknown"),
                company.company_year_id,
                updated,
                company.total_applied,
                company.total_placed,
                company.status.as_str()
            );
        }
    }

    output
}
