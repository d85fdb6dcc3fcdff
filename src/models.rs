use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum PlacementStatus {
    Placed,
    #[default]
    #[serde(other)]
    NotPlaced,
}

impl PlacementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlacementStatus::Placed => "placed",
            PlacementStatus::NotPlaced => "not_placed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Running,
    Completed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CompanyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompanyStatus::Running => "running",
            CompanyStatus::Completed => "completed",
            CompanyStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyStatusEntry {
    pub year: Option<i64>,
    pub final_selection: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Student {
    pub name: Option<String>,
    pub roll_number: String,
    pub email: String,
    pub current_status: PlacementStatus,
    pub total_offers: i64,
    /// Company-Year id to this student's standing there. Authoritative index
    /// of every Company-Year that references the student.
    pub company_status: BTreeMap<String, CompanyStatusEntry>,
    pub selected_companies: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: Document,
}

impl Student {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    pub fn final_selections(&self) -> i64 {
        self.company_status
            .values()
            .filter(|entry| entry.final_selection)
            .count() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyYear {
    /// Filled from the document path after loading.
    pub company_year_id: String,
    pub company_name: Option<String>,
    pub year: Option<i64>,
    pub total_applied: i64,
    pub total_placed: i64,
    pub status: CompanyStatus,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyWiseEntry {
    pub company_name: String,
    pub placed: i64,
    pub status: String,
}

impl Default for CompanyWiseEntry {
    fn default() -> Self {
        Self {
            company_name: "Unknown".to_string(),
            placed: 0,
            status: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct YearSummary {
    pub year: i64,
    pub total_students_participated: i64,
    pub total_placed: i64,
    pub total_companies: i64,
    pub company_wise: BTreeMap<String, CompanyWiseEntry>,
    #[serde(flatten)]
    pub extra: Document,
}

/// The `systemStats/dashboard` singleton.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemStats {
    pub total_years: i64,
    pub total_companies: i64,
    pub completed_companies: i64,
    pub running_companies: i64,
    pub total_students: i64,
    pub total_placed: i64,
    pub total_not_placed: i64,
    pub total_offers: i64,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadingUpdates {
    pub companies_affected: usize,
    pub rounds_deleted: usize,
    pub placements_deleted: usize,
    pub years_affected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionSummary {
    pub message: String,
    pub student_id: String,
    pub student_name: String,
    pub total_offers: i64,
    pub cascading_updates: CascadingUpdates,
    pub batches_committed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub years: i64,
    pub companies: i64,
    pub students: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_companies: i64,
    pub completed_companies: i64,
    pub running_companies: i64,
    pub total_placed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub counts: DashboardCounts,
    pub stats: DashboardStats,
    pub latest_year: YearSummary,
    pub recent_companies: Vec<CompanyYear>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub student_id: String,
    #[serde(flatten)]
    pub student: Student,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentList {
    pub students: Vec<StudentRecord>,
    pub total: usize,
    pub placed: usize,
    pub not_placed: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub total: i64,
    pub placed: i64,
    pub not_placed: i64,
    pub total_offers: i64,
    pub avg_offers: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDetails {
    #[serde(flatten)]
    pub company: CompanyYear,
    /// Student id to placement record.
    pub placements: BTreeMap<String, Document>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Round {
    pub round_id: String,
    pub round_number: i64,
    /// Row id to round data, filled after loading.
    pub data: BTreeMap<String, Document>,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDrift {
    pub student_id: String,
    pub student_name: String,
    pub recorded: i64,
    pub derived: i64,
}
