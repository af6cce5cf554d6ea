//! Exam order endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::auth::StaffClaims;
use crate::db::{
    normalize, CreateExamRequest, Exam, ExamCategory, ExamFilter, ExamStatus,
    ExamTransitionsResponse, ExamWithPatient, NewExam, Patient, UpdateExamRequest,
    UpdateExamStatusRequest,
};
use crate::lifecycle::transition_exam;
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::session::Authenticated;
use super::validation::{validate_text, validate_uuid, MAX_LONG_TEXT_LEN};

/// Maximum length of the free-text label of an `OTHER` exam
const MAX_CUSTOM_CATEGORY_LEN: usize = 100;

fn validate_exam_id(id: &str) -> Result<(), ApiError> {
    validate_uuid(id, "exam_id").map_err(|e| ApiError::validation_field("exam_id", e))
}

fn validate_custom_category(value: &Option<String>) -> Result<(), String> {
    match normalize(value) {
        None => Err("A custom category is required for OTHER exams".to_string()),
        Some(v) if v.chars().count() > MAX_CUSTOM_CATEGORY_LEN => Err(format!(
            "Custom category is too long (max {} characters)",
            MAX_CUSTOM_CATEGORY_LEN
        )),
        Some(_) => Ok(()),
    }
}

fn validate_create_request(req: &CreateExamRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    errors.check("patient_id", validate_uuid(req.patient_id.trim(), "patient_id"));
    match req.category {
        None => {
            errors.add("category", "Category is required");
        }
        Some(ExamCategory::Other) => {
            errors.check("custom_category", validate_custom_category(&req.custom_category));
        }
        Some(_) => {}
    }
    errors.check("notes", validate_text(&req.notes, "Notes", MAX_LONG_TEXT_LEN));

    errors.finish()
}

fn validate_update_request(req: &UpdateExamRequest, existing: &Exam) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let becomes_other = req.category == Some(ExamCategory::Other)
        && existing.category != ExamCategory::Other;
    if becomes_other || (existing.category == ExamCategory::Other && req.custom_category.is_some()) {
        errors.check("custom_category", validate_custom_category(&req.custom_category));
    }
    errors
        .check("result", validate_text(&req.result, "Result", MAX_LONG_TEXT_LEN))
        .check("notes", validate_text(&req.notes, "Notes", MAX_LONG_TEXT_LEN));

    errors.finish()
}

/// List exams, optionally filtered by category, status and patient
pub async fn list_exams(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ExamFilter>,
) -> Result<Json<Vec<ExamWithPatient>>, ApiError> {
    let exams = Exam::list(&state.db, &filter).await?;
    Ok(Json(exams))
}

/// Get an exam with its patient summary
pub async fn get_exam(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExamWithPatient>, ApiError> {
    validate_exam_id(&id)?;

    let exam = Exam::find_with_patient(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Exam not found"))?;

    Ok(Json(exam))
}

/// Order a new exam for a patient
pub async fn create_exam(
    State(state): State<Arc<AppState>>,
    Authenticated(staff): Authenticated<StaffClaims>,
    Json(req): Json<CreateExamRequest>,
) -> Result<(StatusCode, Json<Exam>), ApiError> {
    validate_create_request(&req)?;
    let category = req
        .category
        .ok_or_else(|| ApiError::validation_field("category", "Category is required"))?;

    let patient_id = req.patient_id.trim();
    if Patient::find(&state.db, patient_id).await?.is_none() {
        return Err(ApiError::not_found("Patient not found"));
    }

    let new = NewExam {
        patient_id: patient_id.to_string(),
        category,
        custom_category: normalize(&req.custom_category),
        notes: normalize(&req.notes),
        ordered_at: req.ordered_at.unwrap_or_else(Utc::now),
    };
    let exam = Exam::create(&state.db, &new).await?;

    info!(
        exam_id = %exam.id,
        patient_id = %exam.patient_id,
        category = %exam.category,
        staff_id = %staff.sub,
        "Exam ordered"
    );
    Ok((StatusCode::CREATED, Json(exam)))
}

/// Update result, notes or category of an exam. Status changes go through
/// the status endpoint.
pub async fn update_exam(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateExamRequest>,
) -> Result<Json<Exam>, ApiError> {
    validate_exam_id(&id)?;

    let existing = Exam::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Exam not found"))?;
    validate_update_request(&req, &existing)?;

    let exam = Exam::update_details(&state.db, &id, &req)
        .await?
        .ok_or_else(|| ApiError::not_found("Exam not found"))?;

    Ok(Json(exam))
}

/// Move an exam through its lifecycle
pub async fn update_exam_status(
    State(state): State<Arc<AppState>>,
    Authenticated(staff): Authenticated<StaffClaims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateExamStatusRequest>,
) -> Result<Json<Exam>, ApiError> {
    validate_exam_id(&id)?;

    let target = req
        .status
        .ok_or_else(|| ApiError::validation_field("status", "Status is required"))?;

    let result = normalize(&req.result);
    if result.is_some() && target != ExamStatus::Completed {
        return Err(ApiError::validation_field(
            "result",
            "A result can only be recorded when completing an exam",
        ));
    }
    if let Err(e) = validate_text(&result, "Result", MAX_LONG_TEXT_LEN) {
        return Err(ApiError::validation_field("result", e));
    }

    let exam = transition_exam(&state.db, &id, target, result.as_deref()).await?;

    info!(exam_id = %id, status = %exam.status, staff_id = %staff.sub, "Exam status updated");
    Ok(Json(exam))
}

/// States an exam can move to next
pub async fn get_exam_transitions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExamTransitionsResponse>, ApiError> {
    validate_exam_id(&id)?;

    let exam = Exam::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Exam not found"))?;

    Ok(Json(ExamTransitionsResponse {
        status: exam.status,
        allowed: exam.status.next_allowed_states().to_vec(),
    }))
}

/// Delete an exam
pub async fn delete_exam(
    State(state): State<Arc<AppState>>,
    Authenticated(staff): Authenticated<StaffClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_exam_id(&id)?;

    if !Exam::delete(&state.db, &id).await? {
        return Err(ApiError::not_found("Exam not found"));
    }

    info!(exam_id = %id, staff_id = %staff.sub, "Exam deleted");
    Ok(StatusCode::NO_CONTENT)
}
