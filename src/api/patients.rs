//! Patient record endpoints.

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
    normalize, CreatePatientRequest, DeletePatientResponse, Exam, Patient, PatientListQuery,
    PatientWithExams, PatientWithLatestExam, UpdatePatientRequest,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::session::Authenticated;
use super::validation::{
    validate_birth_date, validate_document, validate_name, validate_phone, validate_text,
    validate_uuid, MAX_LONG_TEXT_LEN,
};

fn validate_create_request(req: &CreatePatientRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&req.name))
        .check("national_id", validate_document(&req.national_id, "National ID"))
        .check("secondary_id", validate_document(&req.secondary_id, "Secondary ID"))
        .check("phone", validate_phone(&req.phone))
        .check("address", validate_text(&req.address, "Address", MAX_LONG_TEXT_LEN))
        .check(
            "health_system_number",
            validate_document(&req.health_system_number, "Health system number"),
        )
        .check(
            "birth_date",
            validate_birth_date(req.birth_date, Utc::now().date_naive()),
        );
    errors.finish()
}

fn validate_update_request(req: &UpdatePatientRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_name(name));
    }
    errors
        .check("national_id", validate_document(&req.national_id, "National ID"))
        .check("secondary_id", validate_document(&req.secondary_id, "Secondary ID"))
        .check("phone", validate_phone(&req.phone))
        .check("address", validate_text(&req.address, "Address", MAX_LONG_TEXT_LEN))
        .check(
            "health_system_number",
            validate_document(&req.health_system_number, "Health system number"),
        )
        .check(
            "birth_date",
            validate_birth_date(req.birth_date, Utc::now().date_naive()),
        );
    errors.finish()
}

pub(super) fn validate_patient_id(id: &str) -> Result<(), ApiError> {
    validate_uuid(id, "patient_id").map_err(|e| ApiError::validation_field("patient_id", e))
}

/// Reject a national ID already registered to a different patient
async fn ensure_national_id_free(
    state: &AppState,
    national_id: &Option<String>,
    current_id: Option<&str>,
) -> Result<(), ApiError> {
    let Some(national_id) = normalize(national_id) else {
        return Ok(());
    };
    match Patient::find_by_national_id(&state.db, &national_id).await? {
        Some(existing) if Some(existing.id.as_str()) != current_id => Err(ApiError::conflict(
            "A patient with this national ID already exists",
        )),
        _ => Ok(()),
    }
}

/// List patients with their latest exam
pub async fn list_patients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PatientListQuery>,
) -> Result<Json<Vec<PatientWithLatestExam>>, ApiError> {
    let patients = Patient::list(&state.db, query.search.as_deref()).await?;

    let mut results = Vec::with_capacity(patients.len());
    for patient in patients {
        let latest_exam = Exam::latest_for_patient(&state.db, &patient.id).await?;
        results.push(PatientWithLatestExam {
            patient,
            latest_exam,
        });
    }

    Ok(Json(results))
}

/// Get a patient with their full exam history
pub async fn get_patient(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PatientWithExams>, ApiError> {
    validate_patient_id(&id)?;

    let patient = Patient::find(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;
    let exams = Exam::list_for_patient(&state.db, &id).await?;

    Ok(Json(PatientWithExams { patient, exams }))
}

/// Register a new patient
pub async fn create_patient(
    State(state): State<Arc<AppState>>,
    Authenticated(staff): Authenticated<StaffClaims>,
    Json(req): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    validate_create_request(&req)?;
    ensure_national_id_free(&state, &req.national_id, None).await?;

    let patient = Patient::create(&state.db, &req).await?;

    info!(patient_id = %patient.id, staff_id = %staff.sub, "Patient created");
    Ok((StatusCode::CREATED, Json(patient)))
}

/// Update a patient's details
pub async fn update_patient(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<Patient>, ApiError> {
    validate_patient_id(&id)?;
    validate_update_request(&req)?;
    ensure_national_id_free(&state, &req.national_id, Some(&id)).await?;

    let patient = Patient::update(&state.db, &id, &req)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    Ok(Json(patient))
}

/// Delete a patient and all of their exams
pub async fn delete_patient(
    State(state): State<Arc<AppState>>,
    Authenticated(staff): Authenticated<StaffClaims>,
    Path(id): Path<String>,
) -> Result<Json<DeletePatientResponse>, ApiError> {
    validate_patient_id(&id)?;

    let exams_deleted = Patient::delete_with_exams(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    info!(patient_id = %id, exams_deleted, staff_id = %staff.sub, "Patient deleted");
    Ok(Json(DeletePatientResponse {
        deleted: true,
        exams_deleted,
    }))
}
