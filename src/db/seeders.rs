//! Demo data for trying out a fresh installation.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::info;

use super::{CreatePatientRequest, Exam, ExamCategory, ExamStatus, NewExam, Patient};
use crate::lifecycle::transition_exam;

/// Path from `PENDING` to each seeded status
fn steps_to(status: ExamStatus) -> &'static [ExamStatus] {
    match status {
        ExamStatus::Pending => &[],
        ExamStatus::Processing => &[ExamStatus::Processing],
        ExamStatus::Completed => &[ExamStatus::Processing, ExamStatus::Completed],
        ExamStatus::Cancelled => &[ExamStatus::Cancelled],
    }
}

/// Insert demo patients and exams. Does nothing when patients already exist.
/// Returns the number of exams created.
pub async fn seed_demo_data(pool: &SqlitePool) -> Result<usize> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        info!("Patients already present, skipping demo data");
        return Ok(0);
    }

    info!("Seeding demo patients and exams...");

    // (name, national_id, secondary_id, phone, birth date)
    let patients: Vec<(&str, &str, &str, &str, (i32, u32, u32))> = vec![
        ("Jane Doe", "12345678900", "RG-7654321", "(88) 99999-0001", (1990, 4, 12)),
        ("John Roe", "98765432100", "RG-1234567", "(88) 99999-0002", (1985, 11, 3)),
        ("Maria Silva", "45678912300", "RG-2468013", "(88) 99999-0003", (2001, 7, 25)),
        ("Pedro Santos", "32165498700", "RG-1357924", "(88) 99999-0004", (1972, 1, 30)),
    ];

    // (patient index, category, custom label, days ago, final status, result)
    let exams: Vec<(usize, ExamCategory, Option<&str>, i64, ExamStatus, Option<&str>)> = vec![
        (0, ExamCategory::BetaHcg, None, 2, ExamStatus::Completed, Some("Positive")),
        (0, ExamCategory::Dengue, None, 40, ExamStatus::Completed, Some("Negative")),
        (1, ExamCategory::Covid, None, 1, ExamStatus::Processing, None),
        (1, ExamCategory::SputumSmear, None, 10, ExamStatus::Pending, None),
        (2, ExamCategory::Chikungunya, None, 5, ExamStatus::Cancelled, None),
        (2, ExamCategory::Other, Some("Lipid panel"), 0, ExamStatus::Pending, None),
        (3, ExamCategory::Chagas, None, 70, ExamStatus::Completed, Some("Non-reactive")),
        (3, ExamCategory::Ppd, None, 3, ExamStatus::Processing, None),
    ];

    let mut ids = Vec::with_capacity(patients.len());
    for (name, national_id, secondary_id, phone, (y, m, d)) in patients {
        let patient = Patient::create(
            pool,
            &CreatePatientRequest {
                name: name.to_string(),
                national_id: Some(national_id.to_string()),
                secondary_id: Some(secondary_id.to_string()),
                phone: Some(phone.to_string()),
                birth_date: NaiveDate::from_ymd_opt(y, m, d),
                ..Default::default()
            },
        )
        .await?;
        ids.push(patient.id);
    }

    let now = Utc::now();
    let mut created = 0;
    for (patient, category, custom, days_ago, status, result) in exams {
        let mut new = NewExam::new(&ids[patient], category).ordered_at(now - Duration::days(days_ago));
        new.custom_category = custom.map(str::to_string);
        let exam = Exam::create(pool, &new).await?;

        for step in steps_to(status) {
            let text = if *step == ExamStatus::Completed { result } else { None };
            transition_exam(pool, &exam.id, *step, text).await?;
        }
        created += 1;
    }

    info!(patients = ids.len(), exams = created, "Demo data seeded");
    Ok(created)
}
