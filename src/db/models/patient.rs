//! Patient models and DTOs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::exam::Exam;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Patient {
    pub id: String,
    pub name: String,
    /// National identity number, unique across patients
    pub national_id: Option<String>,
    /// Secondary identity document, used as the portal login secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_id: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub health_system_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patient with the most recently ordered exam, for list views
#[derive(Debug, Clone, Serialize)]
pub struct PatientWithLatestExam {
    #[serde(flatten)]
    pub patient: Patient,
    pub latest_exam: Option<Exam>,
}

/// Patient with the full exam history, for detail views
#[derive(Debug, Clone, Serialize)]
pub struct PatientWithExams {
    #[serde(flatten)]
    pub patient: Patient,
    pub exams: Vec<Exam>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreatePatientRequest {
    #[serde(default)]
    pub name: String,
    pub national_id: Option<String>,
    pub secondary_id: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub health_system_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub national_id: Option<String>,
    pub secondary_id: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub health_system_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientListQuery {
    /// Case-insensitive substring of the name or national ID
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletePatientResponse {
    pub deleted: bool,
    pub exams_deleted: u64,
}

/// Trim a free-text field, mapping blank input to `None`.
pub fn normalize(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Patient {
    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_national_id(
        db: &SqlitePool,
        national_id: &str,
    ) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM patients WHERE national_id = ?")
            .bind(national_id)
            .fetch_optional(db)
            .await
    }

    pub async fn list(db: &SqlitePool, search: Option<&str>) -> Result<Vec<Patient>, sqlx::Error> {
        match search.map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                sqlx::query_as(
                    r#"
                    SELECT * FROM patients
                    WHERE lower(name) LIKE ? OR lower(COALESCE(national_id, '')) LIKE ?
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(&pattern)
                .bind(&pattern)
                .fetch_all(db)
                .await
            }
            None => {
                sqlx::query_as("SELECT * FROM patients ORDER BY created_at DESC")
                    .fetch_all(db)
                    .await
            }
        }
    }

    pub async fn create(db: &SqlitePool, req: &CreatePatientRequest) -> Result<Patient, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO patients (
                id, name, national_id, secondary_id, phone, address,
                birth_date, health_system_number, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(req.name.trim())
        .bind(normalize(&req.national_id))
        .bind(normalize(&req.secondary_id))
        .bind(normalize(&req.phone))
        .bind(normalize(&req.address))
        .bind(req.birth_date)
        .bind(normalize(&req.health_system_number))
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM patients WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    /// Merge the supplied fields into the stored record. Returns `None` when
    /// no patient has this id.
    pub async fn update(
        db: &SqlitePool,
        id: &str,
        req: &UpdatePatientRequest,
    ) -> Result<Option<Patient>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE patients SET
                name = COALESCE(?, name),
                national_id = COALESCE(?, national_id),
                secondary_id = COALESCE(?, secondary_id),
                phone = COALESCE(?, phone),
                address = COALESCE(?, address),
                birth_date = COALESCE(?, birth_date),
                health_system_number = COALESCE(?, health_system_number),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(normalize(&req.name))
        .bind(normalize(&req.national_id))
        .bind(normalize(&req.secondary_id))
        .bind(normalize(&req.phone))
        .bind(normalize(&req.address))
        .bind(req.birth_date)
        .bind(normalize(&req.health_system_number))
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Self::find(db, id).await
    }

    /// Delete a patient and every exam they own in one transaction.
    /// Returns the number of exams removed, or `None` if the patient does not exist.
    pub async fn delete_with_exams(db: &SqlitePool, id: &str) -> Result<Option<u64>, sqlx::Error> {
        let mut tx = db.begin().await?;

        let exams = sqlx::query("DELETE FROM exams WHERE patient_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let patient = sqlx::query("DELETE FROM patients WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if patient.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(exams.rows_affected()))
    }
}
