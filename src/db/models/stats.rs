//! Dashboard statistics aggregated from the exam and patient tables.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use super::exam::{ExamCategory, ExamStatus, ExamWithPatient};
use crate::reports::{sort_shares, CountShare};

/// Number of recent exams included in the dashboard
const RECENT_EXAMS: i64 = 5;

/// Number of months in the trend series, current month included
const TREND_MONTHS: u32 = 12;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MonthCount {
    /// `YYYY-MM`
    pub month: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_exams: i64,
    pub exams_today: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub total_patients: i64,
    pub by_category: Vec<CountShare>,
    pub by_status: Vec<CountShare>,
    pub monthly: Vec<MonthCount>,
    pub recent_exams: Vec<ExamWithPatient>,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// First day of the month `back` months before the one containing `date`
fn month_start(date: NaiveDate, back: u32) -> NaiveDate {
    let index = date.year() * 12 + date.month0() as i32 - back as i32;
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)
        .unwrap_or(date)
}

impl DashboardStats {
    pub async fn get(db: &SqlitePool) -> Result<Self, sqlx::Error> {
        Self::get_at(db, Utc::now()).await
    }

    pub async fn get_at(db: &SqlitePool, now: DateTime<Utc>) -> Result<Self, sqlx::Error> {
        let today = now.date_naive();

        let total_exams: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exams")
            .fetch_one(db)
            .await?;

        let exams_today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM exams WHERE ordered_at >= ? AND ordered_at < ?",
        )
        .bind(midnight(today))
        .bind(midnight(today) + Duration::days(1))
        .fetch_one(db)
        .await?;

        let total_patients: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(db)
            .await?;

        let status_rows: Vec<(ExamStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM exams GROUP BY status")
                .fetch_all(db)
                .await?;
        let status_counts: HashMap<ExamStatus, i64> = status_rows.into_iter().collect();
        let status_count = |s: ExamStatus| status_counts.get(&s).copied().unwrap_or(0);

        let category_rows: Vec<(ExamCategory, i64)> =
            sqlx::query_as("SELECT category, COUNT(*) FROM exams GROUP BY category")
                .fetch_all(db)
                .await?;

        let mut by_category: Vec<CountShare> = category_rows
            .iter()
            .map(|(category, count)| {
                CountShare::new(category.as_str(), category.label(), *count, total_exams)
            })
            .collect();
        sort_shares(&mut by_category);

        let mut by_status: Vec<CountShare> = ExamStatus::ALL
            .iter()
            .map(|s| (s, status_count(*s)))
            .filter(|(_, count)| *count > 0)
            .map(|(s, count)| CountShare::new(s.as_str(), s.label(), count, total_exams))
            .collect();
        sort_shares(&mut by_status);

        let monthly = Self::monthly_counts(db, today).await?;

        let recent_exams: Vec<ExamWithPatient> = sqlx::query_as(
            r#"
            SELECT e.*, p.name AS patient_name, p.national_id AS patient_national_id
            FROM exams e
            JOIN patients p ON p.id = e.patient_id
            ORDER BY e.ordered_at DESC
            LIMIT ?
            "#,
        )
        .bind(RECENT_EXAMS)
        .fetch_all(db)
        .await?;

        Ok(Self {
            total_exams,
            exams_today,
            pending: status_count(ExamStatus::Pending),
            processing: status_count(ExamStatus::Processing),
            completed: status_count(ExamStatus::Completed),
            cancelled: status_count(ExamStatus::Cancelled),
            total_patients,
            by_category,
            by_status,
            monthly,
            recent_exams,
        })
    }

    /// Exams ordered per month over the trend window, oldest first, zero-filled.
    async fn monthly_counts(db: &SqlitePool, today: NaiveDate) -> Result<Vec<MonthCount>, sqlx::Error> {
        let first = month_start(today, TREND_MONTHS - 1);
        let end = month_start(today, 0)
            .checked_add_months(chrono::Months::new(1))
            .unwrap_or(today);

        // ordered_at is stored as RFC 3339 text, so its first 7 chars are YYYY-MM
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT substr(ordered_at, 1, 7) AS month, COUNT(*)
            FROM exams
            WHERE ordered_at >= ? AND ordered_at < ?
            GROUP BY month
            "#,
        )
        .bind(midnight(first))
        .bind(midnight(end))
        .fetch_all(db)
        .await?;
        let counts: HashMap<String, i64> = rows.into_iter().collect();

        Ok((0..TREND_MONTHS)
            .rev()
            .map(|back| {
                let month = month_start(today, back).format("%Y-%m").to_string();
                let count = counts.get(&month).copied().unwrap_or(0);
                MonthCount { month, count }
            })
            .collect())
    }
}
