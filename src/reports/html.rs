//! Printable HTML rendering of monthly reports.

use askama::Template;

use super::{CountShare, MonthlyReport, ReportError, WeekCount};

/// Custom filters for Askama templates
mod filters {
    use std::borrow::Borrow;

    pub fn percent<T: Borrow<f64>>(value: T) -> ::askama::Result<String> {
        Ok(format!("{:.1}%", value.borrow()))
    }

    /// Bar width (0-100) of `count` relative to `peak`
    pub fn bar_width<T: Borrow<i64>, U: Borrow<i64>>(count: T, peak: U) -> ::askama::Result<i64> {
        let peak = (*peak.borrow()).max(1);
        Ok(count.borrow() * 100 / peak)
    }
}

#[derive(Template)]
#[template(path = "monthly_report.html")]
struct MonthlyReportTemplate<'a> {
    period: &'a str,
    total: i64,
    by_category: &'a [CountShare],
    by_status: &'a [CountShare],
    weeks: &'a [WeekCount],
    /// Largest weekly count, for scaling the histogram bars
    peak_week: i64,
    generated_at: String,
}

/// Render `report` as a standalone HTML document.
pub fn render_monthly_report(report: &MonthlyReport) -> Result<String, ReportError> {
    let template = MonthlyReportTemplate {
        period: &report.period,
        total: report.total,
        by_category: &report.by_category,
        by_status: &report.by_status,
        weeks: &report.weeks,
        peak_week: report.weeks.iter().map(|w| w.count).max().unwrap_or(0).max(1),
        generated_at: report.generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
    };
    Ok(template.render()?)
}

/// Download name, e.g. `report-03-2024.html`
pub fn report_filename(report: &MonthlyReport) -> String {
    format!("report-{:02}-{}.html", report.month, report.year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Exam, ExamCategory, ExamStatus};
    use crate::reports::ReportPeriod;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn report() -> MonthlyReport {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let period = ReportPeriod::new(3, 2024, today).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let exam = Exam {
            id: "e1".to_string(),
            patient_id: "p1".to_string(),
            category: ExamCategory::SputumSmear,
            custom_category: None,
            result: None,
            notes: None,
            ordered_at: at,
            result_at: None,
            status: ExamStatus::Processing,
            created_at: at,
            updated_at: at,
        };
        MonthlyReport::build(period, &[exam], at)
    }

    #[test]
    fn test_render_contains_groups() {
        let html = render_monthly_report(&report()).unwrap();
        assert!(html.contains("March 2024"));
        assert!(html.contains("Sputum smear microscopy"));
        assert!(html.contains("Processing"));
        assert!(html.contains("100.0%"));
        assert!(html.contains("Week 5"));
    }

    #[test]
    fn test_filename() {
        assert_eq!(report_filename(&report()), "report-03-2024.html");
    }

    #[test]
    fn test_percent_filter() {
        assert_eq!(filters::percent(&33.333).unwrap(), "33.3%");
        assert_eq!(filters::percent(0.0).unwrap(), "0.0%");
    }
}
