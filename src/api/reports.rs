//! Monthly report endpoints.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::reports::{
    monthly_report, render_monthly_report, report_filename, MonthlyReport, ReportPeriod,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};

#[derive(Debug, Default, Deserialize)]
pub struct MonthlyReportQuery {
    pub month: Option<String>,
    pub year: Option<String>,
}

impl MonthlyReportQuery {
    /// Parse and range-check the requested period without touching the store.
    pub fn period(&self) -> Result<ReportPeriod, ApiError> {
        let mut errors = ValidationErrorBuilder::new();

        let month = match self.month.as_deref().map(str::trim) {
            None | Some("") => {
                errors.add("month", "Month is required");
                None
            }
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| errors.add("month", "Month must be a number"))
                .ok(),
        };
        let year = match self.year.as_deref().map(str::trim) {
            None | Some("") => {
                errors.add("year", "Year is required");
                None
            }
            Some(raw) => raw
                .parse::<i32>()
                .map_err(|_| errors.add("year", "Year must be a number"))
                .ok(),
        };
        errors.finish()?;

        match (month, year) {
            (Some(month), Some(year)) => {
                Ok(ReportPeriod::new(month, year, Utc::now().date_naive())?)
            }
            _ => Err(ApiError::bad_request("Month and year are required")),
        }
    }
}

/// Monthly report as JSON
pub async fn get_monthly_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonthlyReportQuery>,
) -> Result<Json<MonthlyReport>, ApiError> {
    let period = query.period()?;
    let report = monthly_report(&state.db, period).await?;
    Ok(Json(report))
}

/// Monthly report as a printable HTML document
pub async fn get_monthly_report_html(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonthlyReportQuery>,
) -> Result<Response, ApiError> {
    let period = query.period()?;
    let report = monthly_report(&state.db, period).await?;
    let html = render_monthly_report(&report)?;

    let disposition = format!("inline; filename=\"{}\"", report_filename(&report));
    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        html,
    )
        .into_response())
}
