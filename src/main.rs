use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cascade;
mod catalog;
mod config;
mod dashboard;
mod db;
mod document;
#[cfg(test)]
mod memory_store;
mod models;
mod report;
mod seed;
mod stats;
mod store;
mod students;

use config::Config;
use models::PlacementStatus;
use stats::StatField;
use store::CountingStore;
use students::StudentFilter;

#[derive(Parser)]
#[command(name = "placement-ledger")]
#[command(about = "Placement tracking ledger with cascading deletes and dashboard counters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data and rebuild the counters
    Seed,
    /// Register students from a CSV file (name,roll_number,email)
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Delete a student and everything that references it
    DeleteStudent {
        student_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Finish cascades that were interrupted part way
    ResumeCascades,
    /// Print the dashboard counters
    Stats,
    /// Recompute the dashboard counters from source collections
    RebuildStats,
    /// Add a (possibly negative) delta to one counter
    AdjustStat {
        field: StatField,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },
    /// Overwrite one counter
    SetStat { field: StatField, value: i64 },
    /// Print the dashboard summary
    Dashboard {
        #[arg(long)]
        year: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown dashboard report
    Report {
        #[arg(long)]
        year: Option<i64>,
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
    /// List students by name, optionally filtered
    Students {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<PlacementStatus>,
        #[arg(long)]
        json: bool,
    },
    /// Placement totals and average offers for a set of students
    StudentStats {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<PlacementStatus>,
    },
    /// Print one student record
    Student { student_id: String },
    /// List Company-Year records, newest year first
    Companies {
        #[arg(long)]
        json: bool,
    },
    /// Print one Company-Year with its placements, or its rounds
    Company {
        company_year_id: String,
        #[arg(long)]
        rounds: bool,
    },
    /// List year summaries, newest first
    Years {
        #[arg(long)]
        json: bool,
    },
    /// List students whose offer count disagrees with their final selections
    AuditOffers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    if let Commands::InitDb = cli.command {
        db::init_db(&pool).await?;
        println!("Schema ready.");
        return Ok(());
    }

    let store = CountingStore::new(db::PgStore::new(pool, config.batch_limit));

    match cli.command {
        Commands::InitDb => {}
        Commands::Seed => {
            let stats = seed::seed(&store).await?;
            println!(
                "Seed data inserted ({} students, {} companies).",
                stats.total_students, stats.total_companies
            );
        }
        Commands::ImportStudents { csv } => {
            let inserted = students::import_csv(&store, &csv).await?;
            println!("Inserted {inserted} students from {}.", csv.display());
        }
        Commands::DeleteStudent { student_id, json } => {
            let summary = cascade::delete_student_cascade(&store, &student_id)
                .await
                .with_context(|| format!("failed to delete student {student_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let updates = &summary.cascading_updates;
                println!(
                    "Deleted {} ({}): {} companies, {} round rows, {} placements, {} years updated.",
                    summary.student_name,
                    summary.student_id,
                    updates.companies_affected,
                    updates.rounds_deleted,
                    updates.placements_deleted,
                    updates.years_affected
                );
            }
        }
        Commands::ResumeCascades => {
            let pending = cascade::pending_cascades(&store).await?;
            if pending.is_empty() {
                println!("No interrupted cascades.");
            }
            for student_id in pending {
                let summary = cascade::resume_cascade(&store, &student_id)
                    .await
                    .with_context(|| format!("failed to resume cascade for {student_id}"))?;
                println!(
                    "Completed cascade for {} ({}) in {} batches.",
                    summary.student_name, summary.student_id, summary.batches_committed
                );
            }
        }
        Commands::Stats => {
            let stats = stats::get_stats(&store).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::RebuildStats => {
            let stats = stats::rebuild_from_source(&store).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::AdjustStat { field, delta } => {
            stats::increment(&store, field, delta).await?;
            let stats = stats::get_stats(&store).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::SetStat { field, value } => {
            stats::set_stat(&store, field, value).await?;
            println!("Set {field} = {value}.");
        }
        Commands::Dashboard { year, json } => {
            let year = year.unwrap_or(config.current_year);
            let summary = dashboard::dashboard_summary(&store, year).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let stats = stats::get_stats(&store).await?;
                print!("{}", report::build_report(&summary, &stats));
            }
        }
        Commands::Report { year, out } => {
            let year = year.unwrap_or(config.current_year);
            let summary = dashboard::dashboard_summary(&store, year).await?;
            let stats = stats::get_stats(&store).await?;
            std::fs::write(&out, report::build_report(&summary, &stats))?;
            println!("Report written to {}.", out.display());
        }
        Commands::AuditOffers => {
            let drift = students::audit_offers(&store).await?;
            if drift.is_empty() {
                println!("Every student's offer count matches their final selections.");
            }
            for entry in drift {
                println!(
                    "- {} ({}) records {} offers but has {} final selections",
                    entry.student_name, entry.student_id, entry.recorded, entry.derived
                );
            }
        }
        Commands::Students {
            search,
            status,
            json,
        } => {
            let list = students::list_students(&store, &StudentFilter { search, status }).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                for record in &list.students {
                    println!(
                        "{}  {}  {}  {}  offers={}",
                        record.student_id,
                        record.student.display_name(),
                        record.student.roll_number,
                        record.student.current_status.as_str(),
                        record.student.total_offers
                    );
                }
                println!(
                    "{} students, {} placed, {} not placed.",
                    list.total, list.placed, list.not_placed
                );
            }
        }
        Commands::StudentStats { search, status } => {
            let stats = students::student_stats(&store, &StudentFilter { search, status }).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Student { student_id } => {
            let record = students::get_student(&store, &student_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Companies { json } => {
            let companies = catalog::list_companies(&store).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&companies)?);
            } else {
                for company in &companies {
                    println!(
                        "{}  {}  {}  {}  applied={} placed={}",
                        company.company_year_id,
                        company.company_name.as_deref().unwrap_or("Unknown"),
                        company.year.map_or_else(|| "-".to_string(), |year| year.to_string()),
                        company.status.as_str(),
                        company.total_applied,
                        company.total_placed
                    );
                }
            }
        }
        Commands::Company {
            company_year_id,
            rounds,
        } => {
            if rounds {
                let rounds = catalog::company_rounds(&store, &company_year_id).await?;
                println!("{}", serde_json::to_string_pretty(&rounds)?);
            } else {
                let details = catalog::company_details(&store, &company_year_id).await?;
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
        }
        Commands::Years { json } => {
            let years = catalog::list_years(&store).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&years)?);
            } else {
                for summary in &years {
                    println!(
                        "{}  participated={} placed={} companies={}",
                        summary.year,
                        summary.total_students_participated,
                        summary.total_placed,
                        summary.total_companies
                    );
                }
            }
        }
    }

    info!(reads = store.reads(), "document reads");
    Ok(())
}
