//! Patient portal: patients sign in with their national ID and secondary ID
//! and can read their own exams.

use axum::{extract::State, Json};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::auth::{PatientClaims, PatientPrincipal, PrincipalKind};
use crate::db::{Exam, LoginResponse, Patient};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::session::{cleared_cookie, session_cookie, Authenticated};

#[derive(Debug, Default, Deserialize)]
pub struct PatientLoginRequest {
    #[serde(default)]
    pub national_id: String,
    #[serde(default)]
    pub secondary_id: String,
}

/// Compare secrets without leaking where they differ
fn secret_matches(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    expected.len() == provided.len() && expected.ct_eq(provided).into()
}

/// Patient login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<PatientLoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse<PatientPrincipal>>), ApiError> {
    let national_id = req.national_id.trim();
    let secondary_id = req.secondary_id.trim();

    let mut errors = ValidationErrorBuilder::new();
    if national_id.is_empty() {
        errors.add("national_id", "National ID is required");
    }
    if secondary_id.is_empty() {
        errors.add("secondary_id", "Secondary ID is required");
    }
    errors.finish()?;

    let patient = Patient::find_by_national_id(&state.db, national_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    let expected = patient.secondary_id.as_deref().unwrap_or_default();
    if expected.is_empty() || !secret_matches(expected, secondary_id) {
        warn!(patient_id = %patient.id, "Failed portal login");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = state
        .tokens
        .issue_patient_token(&patient.id, &patient.name)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let cookie = session_cookie(
        &state.config.auth,
        PrincipalKind::Patient,
        token.clone(),
        state.tokens.ttl(),
    );

    info!(patient_id = %patient.id, "Portal login");
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token,
            principal: PatientPrincipal {
                id: patient.id,
                name: patient.name,
            },
        }),
    ))
}

/// Patient logout endpoint
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    (
        jar.add(cleared_cookie(&state.config.auth, PrincipalKind::Patient)),
        Json(serde_json::json!({ "message": "Logged out" })),
    )
}

/// Current patient principal
pub async fn me(Authenticated(claims): Authenticated<PatientClaims>) -> Json<PatientPrincipal> {
    Json(PatientPrincipal::from(&claims))
}

/// The authenticated patient's exams, newest first
pub async fn my_exams(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated<PatientClaims>,
) -> Result<Json<Vec<Exam>>, ApiError> {
    let exams = Exam::list_for_patient(&state.db, &claims.sub).await?;
    Ok(Json(exams))
}
