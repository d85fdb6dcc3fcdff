use serde_json::{json, Value};

use crate::document::timestamp_now;
use crate::models::SystemStats;
use crate::stats;
use crate::store::{paths, AggregateStore, DocPath, StoreError, WriteOp};

fn set(path: DocPath, value: Value) -> WriteOp {
    WriteOp::Set {
        path,
        data: value.as_object().cloned().unwrap_or_default(),
    }
}

fn round_row(
    company_year_id: &str,
    round: &str,
    row: &str,
    student_id: &str,
    name: &str,
) -> WriteOp {
    set(
        paths::rounds(company_year_id)
            .doc(round)
            .collection("data")
            .doc(row),
        json!({"studentId": student_id, "name": name}),
    )
}

/// Loads a small, internally consistent placement data set and rebuilds the
/// dashboard counters from it.
pub async fn seed<S>(store: &S) -> Result<SystemStats, StoreError>
where
    S: AggregateStore + ?Sized,
{
    let now = timestamp_now();

    let students = [
        (
            "avery-lee",
            "Avery Lee",
            "21B81A0501",
            "avery.lee@example.edu",
            "placed",
            1,
            json!({
                "acme-2025": {"year": 2025, "finalSelection": true},
                "globex-2026": {"year": 2026, "finalSelection": false}
            }),
        ),
        (
            "jules-moreno",
            "Jules Moreno",
            "21B81A0502",
            "jules.moreno@example.edu",
            "placed",
            1,
            json!({
                "globex-2026": {"year": 2026, "finalSelection": true}
            }),
        ),
        (
            "kiara-patel",
            "Kiara Patel",
            "21B81A0503",
            "kiara.patel@example.edu",
            "not_placed",
            0,
            json!({
                "acme-2025": {"year": 2025, "finalSelection": false}
            }),
        ),
    ];

    let mut ops = Vec::new();
    for (id, name, roll, email, status, offers, company_status) in students {
        ops.push(set(
            paths::student(id),
            json!({
                "name": name,
                "rollNumber": roll,
                "email": email,
                "currentStatus": status,
                "totalOffers": offers,
                "companyStatus": company_status,
                "createdAt": now,
                "updatedAt": now,
            }),
        ));
    }

    ops.push(set(
        paths::company("acme-2025"),
        json!({
            "companyName": "Acme Analytics",
            "year": 2025,
            "totalApplied": 2,
            "totalPlaced": 1,
            "status": "completed",
            "updatedAt": now,
        }),
    ));
    ops.push(set(
        paths::company("globex-2026"),
        json!({
            "companyName": "Globex Systems",
            "year": 2026,
            "totalApplied": 2,
            "totalPlaced": 1,
            "status": "running",
            "updatedAt": now,
        }),
    ));

    for (company, round, number) in [
        ("acme-2025", "round-1", 1),
        ("acme-2025", "round-2", 2),
        ("globex-2026", "round-1", 1),
    ] {
        ops.push(set(
            paths::rounds(company).doc(round),
            json!({"roundNumber": number}),
        ));
    }
    ops.push(round_row("acme-2025", "round-1", "row-1", "avery-lee", "Avery Lee"));
    ops.push(round_row("acme-2025", "round-1", "row-2", "kiara-patel", "Kiara Patel"));
    ops.push(round_row("acme-2025", "round-2", "row-1", "avery-lee", "Avery Lee"));
    ops.push(round_row("globex-2026", "round-1", "row-1", "avery-lee", "Avery Lee"));
    ops.push(round_row("globex-2026", "round-1", "row-2", "jules-moreno", "Jules Moreno"));

    ops.push(set(
        paths::placement("acme-2025", "avery-lee"),
        json!({"name": "Avery Lee", "rollNumber": "21B81A0501"}),
    ));
    ops.push(set(
        paths::placement("globex-2026", "jules-moreno"),
        json!({"name": "Jules Moreno", "rollNumber": "21B81A0502"}),
    ));

    ops.push(set(
        paths::year(2025),
        json!({
            "totalStudentsParticipated": 2,
            "totalPlaced": 1,
            "totalCompanies": 1,
            "companyWise": {
                "acme-2025": {"companyName": "Acme Analytics", "placed": 1, "status": "completed"}
            },
            "updatedAt": now,
        }),
    ));
    ops.push(set(
        paths::year(2026),
        json!({
            "totalStudentsParticipated": 2,
            "totalPlaced": 1,
            "totalCompanies": 1,
            "companyWise": {
                "globex-2026": {"companyName": "Globex Systems", "placed": 1, "status": "running"}
            },
            "updatedAt": now,
        }),
    ));

    store.commit(ops).await?;
    stats::rebuild_from_source(store).await
}
