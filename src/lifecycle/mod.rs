//! Exam status state machine.
//!
//! The pure half (`next_allowed_states`, `apply_transition`) decides whether a
//! move is legal and what it stamps. `transition_exam` persists a move with a
//! compare-and-swap on the status it read, so a concurrent change is reported
//! as a conflict instead of overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::Exam;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl ExamStatus {
    pub const ALL: [ExamStatus; 4] = [
        ExamStatus::Pending,
        ExamStatus::Processing,
        ExamStatus::Completed,
        ExamStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// States reachable from `self` in one step
    pub fn next_allowed_states(&self) -> &'static [ExamStatus] {
        match self {
            Self::Pending => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Completed, Self::Cancelled],
            Self::Completed => &[Self::Processing],
            Self::Cancelled => &[Self::Pending],
        }
    }

    pub fn can_transition_to(&self, target: ExamStatus) -> bool {
        self.next_allowed_states().contains(&target)
    }
}

impl std::fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown exam status: {}", s))
    }
}

/// Allowed next states for `current`.
pub fn next_allowed_states(current: ExamStatus) -> &'static [ExamStatus] {
    current.next_allowed_states()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot move exam from {from} to {to}")]
    InvalidTransition { from: ExamStatus, to: ExamStatus },
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Exam not found")]
    NotFound,
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("Exam status changed concurrently, reload and retry")]
    Conflict,
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Return a copy of `exam` moved to `target`, stamped with the current time.
pub fn apply_transition(exam: &Exam, target: ExamStatus) -> Result<Exam, TransitionError> {
    apply_transition_at(exam, target, Utc::now())
}

/// Same as [`apply_transition`] with an explicit clock. `result_at` is set
/// only when entering `COMPLETED`; reopening keeps the earlier stamp.
pub fn apply_transition_at(
    exam: &Exam,
    target: ExamStatus,
    now: DateTime<Utc>,
) -> Result<Exam, TransitionError> {
    if !exam.status.can_transition_to(target) {
        return Err(TransitionError::InvalidTransition {
            from: exam.status,
            to: target,
        });
    }

    let mut next = exam.clone();
    next.status = target;
    next.updated_at = now;
    if target == ExamStatus::Completed {
        next.result_at = Some(now);
    }
    Ok(next)
}

/// Persist a status change. `result` is recorded alongside a move to
/// `COMPLETED` and ignored for any other target.
///
/// The write is a single `UPDATE` guarded by the status that was read, so it
/// takes the write lock directly instead of upgrading a read transaction.
pub async fn transition_exam(
    db: &SqlitePool,
    id: &str,
    target: ExamStatus,
    result: Option<&str>,
) -> Result<Exam, LifecycleError> {
    let current = Exam::find(db, id).await?.ok_or(LifecycleError::NotFound)?;

    let mut next = apply_transition(&current, target)?;
    if target == ExamStatus::Completed {
        if let Some(text) = result.map(str::trim).filter(|r| !r.is_empty()) {
            next.result = Some(text.to_string());
        }
    }

    let updated = sqlx::query(
        r#"
        UPDATE exams SET status = ?, result = ?, result_at = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(next.status)
    .bind(&next.result)
    .bind(next.result_at)
    .bind(next.updated_at)
    .bind(id)
    .bind(current.status)
    .execute(db)
    .await
    .map_err(|e| {
        if is_busy(&e) {
            warn!(exam_id = %id, "Store busy while changing exam status");
            LifecycleError::Conflict
        } else {
            LifecycleError::Store(e)
        }
    })?;

    if updated.rows_affected() == 0 {
        if Exam::find(db, id).await?.is_none() {
            return Err(LifecycleError::NotFound);
        }
        warn!(exam_id = %id, expected = %current.status, "Exam status changed concurrently");
        return Err(LifecycleError::Conflict);
    }

    info!(
        exam_id = %id,
        from = %current.status,
        to = %next.status,
        "Exam status changed"
    );
    Ok(next)
}

/// SQLITE_BUSY and SQLITE_BUSY_SNAPSHOT
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("517"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, CreatePatientRequest, ExamCategory, NewExam, Patient};
    use chrono::TimeZone;

    fn exam_in(status: ExamStatus) -> Exam {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        Exam {
            id: "exam-1".to_string(),
            patient_id: "patient-1".to_string(),
            category: ExamCategory::BetaHcg,
            custom_category: None,
            result: None,
            notes: None,
            ordered_at: created,
            result_at: None,
            status,
            created_at: created,
            updated_at: created,
        }
    }

    fn is_allowed(from: ExamStatus, to: ExamStatus) -> bool {
        use ExamStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Cancelled)
                | (Completed, Processing)
                | (Cancelled, Pending)
        )
    }

    #[test]
    fn test_every_pair() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 10, 30, 0).unwrap();
        for from in ExamStatus::ALL {
            for to in ExamStatus::ALL {
                let exam = exam_in(from);
                let outcome = apply_transition_at(&exam, to, now);
                if is_allowed(from, to) {
                    let next = outcome.unwrap();
                    assert_eq!(next.status, to);
                    assert_eq!(next.updated_at, now);
                } else {
                    assert_eq!(
                        outcome.unwrap_err(),
                        TransitionError::InvalidTransition { from, to }
                    );
                    assert_eq!(exam, exam_in(from));
                }
                assert_eq!(from.can_transition_to(to), is_allowed(from, to));
            }
        }
    }

    #[test]
    fn test_completion_stamps_result_at() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 10, 30, 0).unwrap();
        let done = apply_transition_at(&exam_in(ExamStatus::Processing), ExamStatus::Completed, now)
            .unwrap();
        assert_eq!(done.result_at, Some(now));

        let started = apply_transition_at(&exam_in(ExamStatus::Pending), ExamStatus::Processing, now)
            .unwrap();
        assert_eq!(started.result_at, None);
    }

    #[test]
    fn test_reopen_keeps_result_at() {
        let completed_at = Utc.with_ymd_and_hms(2024, 3, 2, 10, 30, 0).unwrap();
        let mut exam = exam_in(ExamStatus::Completed);
        exam.result_at = Some(completed_at);

        let later = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let reopened = apply_transition_at(&exam, ExamStatus::Processing, later).unwrap();
        assert_eq!(reopened.status, ExamStatus::Processing);
        assert_eq!(reopened.result_at, Some(completed_at));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("processing".parse::<ExamStatus>(), Ok(ExamStatus::Processing));
        assert!("DONE".parse::<ExamStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ExamStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        assert_eq!(next_allowed_states(ExamStatus::Cancelled), &[ExamStatus::Pending]);
    }

    async fn jane_with_exam(pool: &SqlitePool) -> Exam {
        let jane = Patient::create(
            pool,
            &CreatePatientRequest {
                name: "Jane Doe".to_string(),
                national_id: Some("12345678900".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        Exam::create(pool, &NewExam::new(&jane.id, ExamCategory::BetaHcg))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_jane_doe_exam_flow() {
        let pool = test_pool().await;
        let exam = jane_with_exam(&pool).await;
        assert_eq!(exam.status, ExamStatus::Pending);

        let processing = transition_exam(&pool, &exam.id, ExamStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(processing.status, ExamStatus::Processing);

        let completed = transition_exam(&pool, &exam.id, ExamStatus::Completed, Some(" Positive "))
            .await
            .unwrap();
        assert_eq!(completed.status, ExamStatus::Completed);
        assert_eq!(completed.result.as_deref(), Some("Positive"));
        assert!(completed.result_at.is_some());

        let err = transition_exam(&pool, &exam.id, ExamStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition(TransitionError::InvalidTransition {
                from: ExamStatus::Completed,
                to: ExamStatus::Pending,
            })
        ));

        let stored = Exam::find(&pool, &exam.id).await.unwrap().unwrap();
        assert_eq!(stored, completed);
    }

    #[tokio::test]
    async fn test_result_ignored_unless_completing() {
        let pool = test_pool().await;
        let exam = jane_with_exam(&pool).await;

        let moved = transition_exam(&pool, &exam.id, ExamStatus::Cancelled, Some("Negative"))
            .await
            .unwrap();
        assert_eq!(moved.result, None);
    }

    #[tokio::test]
    async fn test_failed_transition_leaves_store_unchanged() {
        let pool = test_pool().await;
        let exam = jane_with_exam(&pool).await;

        let err = transition_exam(&pool, &exam.id, ExamStatus::Completed, Some("Negative"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));

        let stored = Exam::find(&pool, &exam.id).await.unwrap().unwrap();
        assert_eq!(stored, exam);
    }

    #[tokio::test]
    async fn test_unknown_exam() {
        let pool = test_pool().await;
        let err = transition_exam(&pool, "missing", ExamStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("lab.db").display());
        let pool = crate::db::connect(&url, 8, std::time::Duration::from_secs(10))
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let mut exam_ids = Vec::new();
        for i in 0..10 {
            let patient = Patient::create(
                &pool,
                &CreatePatientRequest {
                    name: format!("Patient {}", i),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            let exam = Exam::create(&pool, &NewExam::new(&patient.id, ExamCategory::Covid))
                .await
                .unwrap();
            exam_ids.push(exam.id);
        }

        let mut handles = Vec::new();
        for id in &exam_ids {
            for _ in 0..8 {
                let pool = pool.clone();
                let id = id.clone();
                handles.push(tokio::spawn(async move {
                    let outcome =
                        transition_exam(&pool, &id, ExamStatus::Processing, None).await;
                    (id, outcome)
                }));
            }
        }

        let mut wins: std::collections::HashMap<String, usize> = Default::default();
        for handle in handles {
            let (id, outcome) = handle.await.unwrap();
            match outcome {
                Ok(exam) => {
                    assert_eq!(exam.status, ExamStatus::Processing);
                    *wins.entry(id).or_default() += 1;
                }
                Err(LifecycleError::Conflict) | Err(LifecycleError::InvalidTransition(_)) => {}
                Err(other) => panic!("unexpected failure: {}", other),
            }
        }

        for id in &exam_ids {
            assert_eq!(wins.get(id), Some(&1));
            let stored = Exam::find(&pool, id).await.unwrap().unwrap();
            assert_eq!(stored.status, ExamStatus::Processing);
        }
        pool.close().await;
    }
}
