//! Monthly exam reports.

mod html;

pub use html::{render_monthly_report, report_filename};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::db::{Exam, ExamCategory, ExamStatus};

/// First year accepted for reports
pub const FIRST_REPORT_YEAR: i32 = 2020;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Month must be between 1 and 12, got {0}")]
    InvalidMonth(u32),
    #[error("Year must be between {min} and {max}, got {year}")]
    InvalidYear { year: i32, min: i32, max: i32 },
    #[error("Failed to render report: {0}")]
    Render(#[from] askama::Error),
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// A validated calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    month: u32,
    year: i32,
}

impl ReportPeriod {
    /// Validate `month`/`year` against the accepted window, where the latest
    /// year is the one after `today`.
    pub fn new(month: u32, year: i32, today: NaiveDate) -> Result<Self, ReportError> {
        if !(1..=12).contains(&month) {
            return Err(ReportError::InvalidMonth(month));
        }
        let max = today.year() + 1;
        if !(FIRST_REPORT_YEAR..=max).contains(&year) {
            return Err(ReportError::InvalidYear {
                year,
                min: FIRST_REPORT_YEAR,
                max,
            });
        }
        Ok(Self { month, year })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// e.g. "March 2024"
    pub fn label(&self) -> String {
        format!("{} {}", MONTH_NAMES[(self.month - 1) as usize], self.year)
    }

    fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    fn next_first_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default()
    }

    /// UTC bounds `[start, end)` of the month
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.from_utc_datetime(&self.first_day().and_time(chrono::NaiveTime::MIN));
        let end = Utc.from_utc_datetime(&self.next_first_day().and_time(chrono::NaiveTime::MIN));
        (start, end)
    }

    pub fn days(&self) -> u32 {
        (self.next_first_day() - self.first_day()).num_days() as u32
    }

    /// Number of histogram weeks (4 or 5)
    pub fn weeks(&self) -> u32 {
        week_of_month(self.days())
    }
}

/// Week bucket of a day of the month: days 1-7 are week 1, 8-14 week 2, and so on.
pub fn week_of_month(day: u32) -> u32 {
    day.div_ceil(7)
}

/// Share of `count` in `total` as a percentage with one decimal place.
pub fn percentage(count: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (count as f64 * 1000.0 / total as f64).round() / 10.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountShare {
    pub key: String,
    pub label: String,
    pub count: i64,
    pub percentage: f64,
}

impl CountShare {
    pub fn new(key: &str, label: &str, count: i64, total: i64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            count,
            percentage: percentage(count, total),
        }
    }
}

/// Non-zero groups, largest first
pub(crate) fn sort_shares(shares: &mut [CountShare]) {
    shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WeekCount {
    pub week: u32,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub month: u32,
    pub year: i32,
    pub period: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total: i64,
    pub by_category: Vec<CountShare>,
    pub by_status: Vec<CountShare>,
    pub weeks: Vec<WeekCount>,
    pub generated_at: DateTime<Utc>,
}

impl MonthlyReport {
    /// Aggregate `exams` (already restricted to the period) into a report.
    pub fn build(period: ReportPeriod, exams: &[Exam], generated_at: DateTime<Utc>) -> Self {
        let total = exams.len() as i64;
        let (start, end) = period.bounds();

        let mut categories: BTreeMap<ExamCategory, i64> = BTreeMap::new();
        let mut statuses: BTreeMap<ExamStatus, i64> = BTreeMap::new();
        let mut weeks = vec![0i64; period.weeks() as usize];

        for exam in exams {
            *categories.entry(exam.category).or_default() += 1;
            *statuses.entry(exam.status).or_default() += 1;
            let week = week_of_month(exam.ordered_at.day()) as usize;
            if let Some(slot) = weeks.get_mut(week - 1) {
                *slot += 1;
            }
        }

        let mut by_category: Vec<CountShare> = categories
            .into_iter()
            .map(|(category, count)| {
                CountShare::new(category.as_str(), category.label(), count, total)
            })
            .collect();
        sort_shares(&mut by_category);

        let mut by_status: Vec<CountShare> = statuses
            .into_iter()
            .map(|(status, count)| CountShare::new(status.as_str(), status.label(), count, total))
            .collect();
        sort_shares(&mut by_status);

        Self {
            month: period.month(),
            year: period.year(),
            period: period.label(),
            start,
            end,
            total,
            by_category,
            by_status,
            weeks: weeks
                .into_iter()
                .enumerate()
                .map(|(i, count)| WeekCount {
                    week: i as u32 + 1,
                    count,
                })
                .collect(),
            generated_at,
        }
    }
}

/// Load the period's exams and aggregate them.
pub async fn monthly_report(db: &SqlitePool, period: ReportPeriod) -> Result<MonthlyReport, ReportError> {
    let (start, end) = period.bounds();
    let exams = Exam::ordered_between(db, start, end).await?;
    debug!(month = period.month(), year = period.year(), exams = exams.len(), "Building monthly report");
    Ok(MonthlyReport::build(period, &exams, Utc::now()))
}
