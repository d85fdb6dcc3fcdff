use std::path::Path;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::document::timestamp_now;
use crate::models::{
    OfferDrift, PlacementStatus, Student, StudentList, StudentRecord, StudentStats,
};
use crate::stats::{self, StatField};
use crate::store::{paths, AggregateStore, Query, StoreError, WriteOp};

#[derive(Debug, Error)]
pub enum StudentError {
    #[error("student {0} not found")]
    NotFound(String),
    #[error("invalid student: {0}")]
    Invalid(String),
    #[error("student with {field} {value} already exists")]
    Constraint { field: &'static str, value: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub roll_number: String,
    pub email: String,
}

impl NewStudent {
    fn normalized(&self) -> Result<NewStudent, StudentError> {
        let student = NewStudent {
            name: self.name.trim().to_string(),
            roll_number: self.roll_number.trim().to_string(),
            email: self.email.trim().to_string(),
        };

        if student.name.is_empty() {
            return Err(StudentError::Invalid("name is required".to_string()));
        }
        if student.roll_number.is_empty() {
            return Err(StudentError::Invalid("roll number is required".to_string()));
        }
        if student.email.is_empty() {
            return Err(StudentError::Invalid("email is required".to_string()));
        }
        if !student.email.contains('@') || !student.email.contains('.') {
            return Err(StudentError::Invalid(format!(
                "invalid email format: {}",
                student.email
            )));
        }
        Ok(student)
    }
}

async fn ensure_unique<S>(store: &S, field: &'static str, value: &str) -> Result<(), StudentError>
where
    S: AggregateStore + ?Sized,
{
    let existing = store
        .query(&Query::new(paths::students()).where_eq(field, value).limit(1))
        .await?;
    if existing.is_empty() {
        Ok(())
    } else {
        Err(StudentError::Constraint {
            field,
            value: value.to_string(),
        })
    }
}

/// Creates a student with no placement history and counts it in the
/// dashboard totals. Returns the new student id.
pub async fn register_student<S>(store: &S, new: &NewStudent) -> Result<String, StudentError>
where
    S: AggregateStore + ?Sized,
{
    let student = new.normalized()?;
    ensure_unique(store, "rollNumber", &student.roll_number).await?;
    ensure_unique(store, "email", &student.email).await?;

    let id = Uuid::new_v4().simple().to_string();
    let now = timestamp_now();
    let data = json!({
        "name": student.name,
        "rollNumber": student.roll_number,
        "email": student.email,
        "companyStatus": {},
        "selectedCompanies": [],
        "currentStatus": "not_placed",
        "totalOffers": 0,
        "createdAt": now,
        "updatedAt": now,
    });
    let Value::Object(data) = data else {
        return Err(StudentError::Invalid("student document must be an object".to_string()));
    };

    store
        .commit(vec![WriteOp::Set {
            path: paths::student(&id),
            data,
        }])
        .await?;
    info!(student_id = %id, roll_number = %student.roll_number, "student registered");

    stats::increment(store, StatField::TotalStudents, 1).await?;
    stats::increment(store, StatField::TotalNotPlaced, 1).await?;
    Ok(id)
}

/// Registers every row of a `name,roll_number,email` CSV file, skipping rows
/// that collide with an existing student. Returns the number inserted.
pub async fn import_csv<S>(store: &S, csv_path: &Path) -> anyhow::Result<usize>
where
    S: AggregateStore + ?Sized,
{
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<NewStudent>() {
        let row = result?;
        match register_student(store, &row).await {
            Ok(_) => inserted += 1,
            Err(StudentError::Constraint { field, value }) => {
                warn!(field, %value, "skipping duplicate student");
            }
            Err(StudentError::Invalid(reason)) => {
                warn!(%reason, roll_number = %row.roll_number, "skipping invalid student");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(inserted)
}

/// Narrows student listings. `search` matches case-insensitively against
/// name, roll number and email.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub search: Option<String>,
    pub status: Option<PlacementStatus>,
}

impl StudentFilter {
    pub fn matches(&self, student: &Student) -> bool {
        if let Some(status) = self.status {
            if student.current_status != status {
                return false;
            }
        }
        let Some(term) = self.search.as_deref().map(str::to_lowercase) else {
            return true;
        };
        if term.is_empty() {
            return true;
        }
        [
            student.name.as_deref().unwrap_or(""),
            student.roll_number.as_str(),
            student.email.as_str(),
        ]
        .iter()
        .any(|value| value.to_lowercase().contains(&term))
    }
}

async fn load_students<S>(
    store: &S,
    filter: &StudentFilter,
) -> Result<Vec<StudentRecord>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let snapshots = store.query(&Query::new(paths::students())).await?;
    let mut records = Vec::new();
    for snapshot in snapshots {
        let student: Student = snapshot.decode()?;
        if filter.matches(&student) {
            records.push(StudentRecord {
                student_id: snapshot.id().to_string(),
                student,
            });
        }
    }
    Ok(records)
}

/// Every matching student sorted by name, with placed and not placed totals.
pub async fn list_students<S>(
    store: &S,
    filter: &StudentFilter,
) -> Result<StudentList, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let mut students = load_students(store, filter).await?;
    students.sort_by(|a, b| {
        let a = a.student.name.as_deref().unwrap_or("");
        let b = b.student.name.as_deref().unwrap_or("");
        a.cmp(b)
    });

    let placed = students
        .iter()
        .filter(|record| record.student.current_status == PlacementStatus::Placed)
        .count();
    Ok(StudentList {
        total: students.len(),
        placed,
        not_placed: students.len() - placed,
        students,
    })
}

pub async fn student_stats<S>(
    store: &S,
    filter: &StudentFilter,
) -> Result<StudentStats, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let records = load_students(store, filter).await?;
    Ok(stats::student_stats(records.iter().map(|record| &record.student)))
}

pub async fn get_student<S>(store: &S, student_id: &str) -> Result<StudentRecord, StudentError>
where
    S: AggregateStore + ?Sized,
{
    let snapshot = store
        .get(&paths::student(student_id))
        .await?
        .ok_or_else(|| StudentError::NotFound(student_id.to_string()))?;
    Ok(StudentRecord {
        student_id: student_id.to_string(),
        student: snapshot.decode()?,
    })
}

/// Students whose recorded `totalOffers` disagrees with the number of final
/// selections in their `companyStatus`. The counter is advisory; this report
/// is how drift gets noticed.
pub async fn audit_offers<S>(store: &S) -> Result<Vec<OfferDrift>, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let students = store.query(&Query::new(paths::students())).await?;
    let mut drift = Vec::new();

    for snapshot in students {
        let student: Student = snapshot.decode()?;
        let derived = student.final_selections();
        if derived != student.total_offers {
            drift.push(OfferDrift {
                student_id: snapshot.id().to_string(),
                student_name: student.display_name().to_string(),
                recorded: student.total_offers,
                derived,
            });
        }
    }

    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::io::Write;

    fn avery() -> NewStudent {
        NewStudent {
            name: " Avery Lee ".to_string(),
            roll_number: "21B81A0501".to_string(),
            email: "avery.lee@example.edu".to_string(),
        }
    }

    #[tokio::test]
    async fn registers_and_counts_student() {
        let store = MemoryStore::new();
        let id = register_student(&store, &avery()).await.unwrap();

        let doc = store.read(&format!("students/{id}")).await.unwrap();
        assert_eq!(doc["name"], json!("Avery Lee"));
        assert_eq!(doc["currentStatus"], json!("not_placed"));
        assert_eq!(doc["companyStatus"], json!({}));

        let stats = stats::get_stats(&store).await.unwrap();
        assert_eq!(stats.total_students, 1);
        assert_eq!(stats.total_not_placed, 1);
    }

    #[tokio::test]
    async fn rejects_duplicates_before_writing() {
        let store = MemoryStore::new();
        register_student(&store, &avery()).await.unwrap();
        let commits = store.commits();

        let same_roll = NewStudent {
            email: "someone.else@example.edu".to_string(),
            ..avery()
        };
        let err = register_student(&store, &same_roll).await.unwrap_err();
        assert!(matches!(err, StudentError::Constraint { field: "rollNumber", .. }));

        let same_email = NewStudent {
            roll_number: "21B81A0599".to_string(),
            ..avery()
        };
        let err = register_student(&store, &same_email).await.unwrap_err();
        assert!(matches!(err, StudentError::Constraint { field: "email", .. }));

        assert_eq!(store.commits(), commits);
    }

    #[tokio::test]
    async fn rejects_malformed_email() {
        let store = MemoryStore::new();
        let bad = NewStudent {
            email: "not-an-email".to_string(),
            ..avery()
        };
        assert!(matches!(
            register_student(&store, &bad).await,
            Err(StudentError::Invalid(_))
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn imports_csv_and_skips_duplicates() {
        let store = MemoryStore::new();
        let path = std::env::temp_dir().join(format!("students-{}.csv", Uuid::new_v4()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "name,roll_number,email").unwrap();
            writeln!(file, "Avery Lee,21B81A0501,avery@example.edu").unwrap();
            writeln!(file, "Jules Moreno,21B81A0502,jules@example.edu").unwrap();
            writeln!(file, "Avery Again,21B81A0501,other@example.edu").unwrap();
        }

        let inserted = import_csv(&store, &path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(stats::get_stats(&store).await.unwrap().total_students, 2);
    }

    async fn three_students(store: &MemoryStore) {
        store
            .insert(
                "students/s1",
                json!({
                    "name": "Kiara Patel",
                    "rollNumber": "21B81A0503",
                    "email": "kiara@example.edu",
                    "currentStatus": "placed",
                    "totalOffers": 2
                }),
            )
            .await;
        store
            .insert(
                "students/s2",
                json!({
                    "name": "Avery Lee",
                    "rollNumber": "21B81A0501",
                    "email": "avery@example.edu",
                    "currentStatus": "placed",
                    "totalOffers": 1
                }),
            )
            .await;
        store
            .insert(
                "students/s3",
                json!({
                    "name": "Jules Moreno",
                    "rollNumber": "21B81A0502",
                    "email": "jules@example.edu"
                }),
            )
            .await;
    }

    #[tokio::test]
    async fn lists_students_by_name_with_totals() {
        let store = MemoryStore::new();
        three_students(&store).await;

        let list = list_students(&store, &StudentFilter::default()).await.unwrap();
        let names: Vec<&str> = list
            .students
            .iter()
            .map(|record| record.student.display_name())
            .collect();

        assert_eq!(names, vec!["Avery Lee", "Jules Moreno", "Kiara Patel"]);
        assert_eq!((list.total, list.placed, list.not_placed), (3, 2, 1));
        assert_eq!(list.students[0].student_id, "s2");
    }

    #[tokio::test]
    async fn search_matches_roll_number_and_email() {
        let store = MemoryStore::new();
        three_students(&store).await;

        let by_roll = StudentFilter {
            search: Some("0502".to_string()),
            ..StudentFilter::default()
        };
        let list = list_students(&store, &by_roll).await.unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.students[0].student_id, "s3");

        let by_email = StudentFilter {
            search: Some("KIARA@".to_string()),
            ..StudentFilter::default()
        };
        assert_eq!(list_students(&store, &by_email).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn stats_follow_search_and_status() {
        let store = MemoryStore::new();
        three_students(&store).await;

        let placed = StudentFilter {
            status: Some(PlacementStatus::Placed),
            ..StudentFilter::default()
        };
        let stats = student_stats(&store, &placed).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.not_placed, 0);
        assert_eq!(stats.total_offers, 3);
        assert_eq!(stats.avg_offers, 1.5);

        let nobody = StudentFilter {
            search: Some("zed".to_string()),
            ..StudentFilter::default()
        };
        let stats = student_stats(&store, &nobody).await.unwrap();
        assert_eq!(stats, StudentStats::default());
    }

    #[tokio::test]
    async fn fetching_a_student_fills_defaults() {
        let store = MemoryStore::new();
        store.insert("students/bare", json!({"name": "Avery Lee"})).await;

        let record = get_student(&store, "bare").await.unwrap();
        assert_eq!(record.student.current_status, PlacementStatus::NotPlaced);
        assert!(record.student.company_status.is_empty());

        let err = get_student(&store, "ghost").await.unwrap_err();
        assert!(matches!(err, StudentError::NotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn audit_reports_offer_drift() {
        let store = MemoryStore::new();
        store
            .insert(
                "students/ok",
                json!({"totalOffers": 1, "companyStatus": {"acme-2025": {"finalSelection": true}}}),
            )
            .await;
        store
            .insert(
                "students/drifted",
                json!({
                    "name": "Kiara Patel",
                    "totalOffers": 3,
                    "companyStatus": {"acme-2025": {"finalSelection": true}}
                }),
            )
            .await;

        let drift = audit_offers(&store).await.unwrap();
        assert_eq!(
            drift,
            vec![OfferDrift {
                student_id: "drifted".to_string(),
                student_name: "Kiara Patel".to_string(),
                recorded: 3,
                derived: 1,
            }]
        );
    }
}
