//! Exam order models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

pub use crate::lifecycle::ExamStatus;

/// Kind of diagnostic test ordered. `Other` is paired with a free-text
/// label stored in `Exam::custom_category`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamCategory {
    BetaHcg,
    Dengue,
    Chikungunya,
    Zika,
    Covid,
    Ppd,
    Ingram,
    Chagas,
    SputumSmear,
    Other,
}

impl ExamCategory {
    pub const ALL: [ExamCategory; 10] = [
        ExamCategory::BetaHcg,
        ExamCategory::Dengue,
        ExamCategory::Chikungunya,
        ExamCategory::Zika,
        ExamCategory::Covid,
        ExamCategory::Ppd,
        ExamCategory::Ingram,
        ExamCategory::Chagas,
        ExamCategory::SputumSmear,
        ExamCategory::Other,
    ];

    /// Wire/storage code, e.g. `BETA_HCG`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BetaHcg => "BETA_HCG",
            Self::Dengue => "DENGUE",
            Self::Chikungunya => "CHIKUNGUNYA",
            Self::Zika => "ZIKA",
            Self::Covid => "COVID",
            Self::Ppd => "PPD",
            Self::Ingram => "INGRAM",
            Self::Chagas => "CHAGAS",
            Self::SputumSmear => "SPUTUM_SMEAR",
            Self::Other => "OTHER",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            Self::BetaHcg => "Beta HCG",
            Self::Dengue => "Dengue",
            Self::Chikungunya => "Chikungunya",
            Self::Zika => "Zika",
            Self::Covid => "COVID-19",
            Self::Ppd => "PPD",
            Self::Ingram => "Ingram",
            Self::Chagas => "Chagas",
            Self::SputumSmear => "Sputum smear microscopy",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for ExamCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExamCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown exam category: {}", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Exam {
    pub id: String,
    pub patient_id: String,
    pub category: ExamCategory,
    pub custom_category: Option<String>,
    pub result: Option<String>,
    pub notes: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub result_at: Option<DateTime<Utc>>,
    pub status: ExamStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Exam {
    /// Category name for display; `Other` exams show their free-text label.
    pub fn category_label(&self) -> &str {
        match (self.category, self.custom_category.as_deref()) {
            (ExamCategory::Other, Some(custom)) => custom,
            (category, _) => category.label(),
        }
    }
}

/// Exam joined with the owning patient's identifying fields
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExamWithPatient {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub exam: Exam,
    pub patient_name: String,
    pub patient_national_id: Option<String>,
}

/// Conjunctive filters for exam listings
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ExamFilter {
    pub category: Option<ExamCategory>,
    pub status: Option<ExamStatus>,
    pub patient_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateExamRequest {
    #[serde(default)]
    pub patient_id: String,
    pub category: Option<ExamCategory>,
    pub custom_category: Option<String>,
    pub notes: Option<String>,
    pub ordered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateExamRequest {
    pub category: Option<ExamCategory>,
    pub custom_category: Option<String>,
    pub result: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExamStatusRequest {
    pub status: Option<ExamStatus>,
    /// Result text recorded together with a transition to `COMPLETED`
    pub result: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExamTransitionsResponse {
    pub status: ExamStatus,
    pub allowed: Vec<ExamStatus>,
}

/// Validated input for inserting an exam
#[derive(Debug, Clone)]
pub struct NewExam {
    pub patient_id: String,
    pub category: ExamCategory,
    pub custom_category: Option<String>,
    pub notes: Option<String>,
    pub ordered_at: DateTime<Utc>,
}

impl NewExam {
    pub fn new(patient_id: &str, category: ExamCategory) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            category,
            custom_category: None,
            notes: None,
            ordered_at: Utc::now(),
        }
    }

    pub fn ordered_at(mut self, ordered_at: DateTime<Utc>) -> Self {
        self.ordered_at = ordered_at;
        self
    }
}

const EXAM_WITH_PATIENT_SELECT: &str = r#"
    SELECT e.*, p.name AS patient_name, p.national_id AS patient_national_id
    FROM exams e
    JOIN patients p ON p.id = e.patient_id
"#;

impl Exam {
    pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM exams WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_with_patient(
        db: &SqlitePool,
        id: &str,
    ) -> Result<Option<ExamWithPatient>, sqlx::Error> {
        let sql = format!("{} WHERE e.id = ?", EXAM_WITH_PATIENT_SELECT);
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Exams matching every supplied filter, most recent order first.
    pub async fn list(db: &SqlitePool, filter: &ExamFilter) -> Result<Vec<ExamWithPatient>, sqlx::Error> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(EXAM_WITH_PATIENT_SELECT);
        query.push(" WHERE 1 = 1");

        if let Some(category) = filter.category {
            query.push(" AND e.category = ").push_bind(category);
        }
        if let Some(status) = filter.status {
            query.push(" AND e.status = ").push_bind(status);
        }
        if let Some(patient_id) = filter.patient_id.as_deref().filter(|p| !p.is_empty()) {
            query.push(" AND e.patient_id = ").push_bind(patient_id.to_string());
        }

        query.push(" ORDER BY e.ordered_at DESC");

        query.build_query_as::<ExamWithPatient>().fetch_all(db).await
    }

    pub async fn list_for_patient(db: &SqlitePool, patient_id: &str) -> Result<Vec<Exam>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM exams WHERE patient_id = ? ORDER BY ordered_at DESC")
            .bind(patient_id)
            .fetch_all(db)
            .await
    }

    pub async fn latest_for_patient(
        db: &SqlitePool,
        patient_id: &str,
    ) -> Result<Option<Exam>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM exams WHERE patient_id = ? ORDER BY ordered_at DESC LIMIT 1",
        )
        .bind(patient_id)
        .fetch_optional(db)
        .await
    }

    /// Exams ordered in `[start, end)`.
    pub async fn ordered_between(
        db: &SqlitePool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Exam>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM exams WHERE ordered_at >= ? AND ordered_at < ? ORDER BY ordered_at ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(db)
        .await
    }

    /// Insert a new exam in the `PENDING` state.
    pub async fn create(db: &SqlitePool, new: &NewExam) -> Result<Exam, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let custom_category = match new.category {
            ExamCategory::Other => new.custom_category.clone(),
            _ => None,
        };

        sqlx::query(
            r#"
            INSERT INTO exams (
                id, patient_id, category, custom_category, result, notes,
                ordered_at, result_at, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, NULL, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.patient_id)
        .bind(new.category)
        .bind(custom_category)
        .bind(&new.notes)
        .bind(new.ordered_at)
        .bind(ExamStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM exams WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    /// Merge result, notes and category changes. Status is only changed
    /// through the lifecycle manager.
    pub async fn update_details(
        db: &SqlitePool,
        id: &str,
        req: &UpdateExamRequest,
    ) -> Result<Option<Exam>, sqlx::Error> {
        let Some(existing) = Self::find(db, id).await? else {
            return Ok(None);
        };

        let category = req.category.unwrap_or(existing.category);
        let custom_category = match category {
            ExamCategory::Other => super::patient::normalize(&req.custom_category)
                .or(existing.custom_category),
            _ => None,
        };

        sqlx::query(
            r#"
            UPDATE exams SET
                category = ?,
                custom_category = ?,
                result = COALESCE(?, result),
                notes = COALESCE(?, notes),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(category)
        .bind(custom_category)
        .bind(super::patient::normalize(&req.result))
        .bind(super::patient::normalize(&req.notes))
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;

        Self::find(db, id).await
    }

    pub async fn delete(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM exams WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
