pub mod auth;
pub mod error;
mod exams;
mod patients;
mod portal;
mod reports;
pub mod session;
mod stats;
mod validation;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{PatientClaims, StaffClaims};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout));

    // Portal routes (public)
    let portal_public = Router::new()
        .route("/login", post(portal::login))
        .route("/logout", post(portal::logout));

    // Portal routes for the signed-in patient
    let portal_routes = Router::new()
        .route("/me", get(portal::me))
        .route("/exams", get(portal::my_exams))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session::<PatientClaims>,
        ))
        .merge(portal_public);

    // Staff API routes
    let api_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/users", post(auth::create_user))
        // Patients
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/patients/:id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        // Exams
        .route("/exams", get(exams::list_exams).post(exams::create_exam))
        .route(
            "/exams/:id",
            get(exams::get_exam)
                .put(exams::update_exam)
                .delete(exams::delete_exam),
        )
        .route("/exams/:id/status", put(exams::update_exam_status))
        .route("/exams/:id/transitions", get(exams::get_exam_transitions))
        // Reports
        .route("/reports/monthly", get(reports::get_monthly_report))
        .route(
            "/reports/monthly/html",
            get(reports::get_monthly_report_html),
        )
        .route("/stats", get(stats::get_stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session::<StaffClaims>,
        ));

    let request_timeout = state.config.server.request_timeout();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/portal", portal_routes)
        .nest("/api", api_routes)
        .layer(timeout_layer(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Requests running longer than `timeout` are answered with 408
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{test_pool, CreatePatientRequest, Patient};
    use axum::{
        body::Body,
        http::{header, HeaderMap, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.auth.jwt_secret = Some(SECRET.to_string());
        let db = test_pool().await;
        Arc::new(AppState::new(config, db).unwrap())
    }

    fn staff_cookie(state: &AppState) -> String {
        let token = state
            .tokens
            .issue_staff_token("user-1", "ana@lab.test", "Ana Lima")
            .unwrap();
        format!("lab_staff_session={}", token)
    }

    fn patient_cookie(state: &AppState, patient_id: &str) -> String {
        let token = state
            .tokens
            .issue_patient_token(patient_id, "Jane Doe")
            .unwrap();
        format!("lab_patient_session={}", token)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, value)
    }

    async fn jane(state: &AppState) -> Patient {
        Patient::create(
            &state.db,
            &CreatePatientRequest {
                name: "Jane Doe".to_string(),
                national_id: Some("12345678900".to_string()),
                secondary_id: Some("RG-7654321".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let state = test_state().await;
        let app = create_router(state);
        let (status, _, _) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn staff_routes_require_cookie() {
        let state = test_state().await;
        let app = create_router(state);

        let (status, _, body) = send(&app, "GET", "/api/patients", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Not authenticated");
        assert_eq!(body["code"], "unauthorized");

        let (status, _, body) = send(
            &app,
            "GET",
            "/api/patients",
            Some("lab_staff_session=garbage"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn tokens_do_not_cross_domains() {
        let state = test_state().await;
        let app = create_router(state.clone());

        // Patient token presented under the staff cookie name
        let patient_token = state.tokens.issue_patient_token("p-1", "Jane").unwrap();
        let cookie = format!("lab_staff_session={}", patient_token);
        let (status, _, body) = send(&app, "GET", "/api/auth/me", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        // Staff token presented under the patient cookie name
        let staff_token = state
            .tokens
            .issue_staff_token("user-1", "ana@lab.test", "Ana")
            .unwrap();
        let cookie = format!("lab_patient_session={}", staff_token);
        let (status, _, _) = send(&app, "GET", "/api/portal/me", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // A valid staff cookie does not open the portal
        let (status, _, body) = send(
            &app,
            "GET",
            "/api/portal/exams",
            Some(&staff_cookie(&state)),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Not authenticated");
    }

    #[tokio::test]
    async fn slow_requests_time_out() {
        let app: Router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(timeout_layer(Duration::from_millis(20)));

        let (status, _, _) = send(&app, "GET", "/slow", None, None).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn staff_login_sets_cookie() {
        let state = test_state().await;
        let app = create_router(state.clone());
        auth::register_user(
            &state.db,
            &crate::db::CreateUserRequest {
                name: "Ana Lima".to_string(),
                email: "ana@lab.test".to_string(),
                password: "long-enough".to_string(),
            },
        )
        .await
        .unwrap();

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "ana@lab.test", "password": "wrong-pass" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, headers, body) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": "ana@lab.test", "password": "long-enough" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["principal"]["email"], "ana@lab.test");

        let set_cookie = headers
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.starts_with("lab_staff_session="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Max-Age=86400"));

        let cookie = set_cookie.split(';').next().unwrap().to_string();
        let (status, _, body) = send(&app, "GET", "/api/auth/me", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ana Lima");

        let (status, headers, body) = send(&app, "POST", "/api/auth/logout", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged out");
        let cleared = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.starts_with("lab_staff_session="));
        assert!(cleared.contains("Max-Age=0"));

        let (status, headers, _) = send(&app, "POST", "/api/portal/logout", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let cleared = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.starts_with("lab_patient_session="));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn exam_lifecycle_over_http() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);

        let (status, _, patient) = send(
            &app,
            "POST",
            "/api/patients",
            Some(&cookie),
            Some(json!({ "name": "Jane Doe", "national_id": "12345678900" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let patient_id = patient["id"].as_str().unwrap().to_string();

        let (status, _, exam) = send(
            &app,
            "POST",
            "/api/exams",
            Some(&cookie),
            Some(json!({ "patient_id": patient_id, "category": "BETA_HCG" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(exam["status"], "PENDING");
        let exam_uri = format!("/api/exams/{}", exam["id"].as_str().unwrap());

        let (status, _, body) = send(
            &app,
            "GET",
            &format!("{}/transitions", exam_uri),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], json!(["PROCESSING", "CANCELLED"]));

        let status_uri = format!("{}/status", exam_uri);
        let (status, _, body) = send(
            &app,
            "PUT",
            &status_uri,
            Some(&cookie),
            Some(json!({ "status": "PROCESSING" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PROCESSING");

        let (status, _, body) = send(
            &app,
            "PUT",
            &status_uri,
            Some(&cookie),
            Some(json!({ "status": "COMPLETED", "result": "Positive" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "Positive");
        assert!(body["result_at"].is_string());

        let (status, _, body) = send(
            &app,
            "PUT",
            &status_uri,
            Some(&cookie),
            Some(json!({ "status": "PENDING" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_transition");

        let (status, _, body) = send(&app, "GET", &exam_uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["patient_name"], "Jane Doe");
    }

    #[tokio::test]
    async fn other_category_needs_label() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);
        let patient = jane(&state).await;

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/exams",
            Some(&cookie),
            Some(json!({ "patient_id": patient.id, "category": "OTHER" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert!(body["details"]["custom_category"].is_array());

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/exams",
            Some(&cookie),
            Some(json!({
                "patient_id": uuid::Uuid::new_v4().to_string(),
                "category": "DENGUE"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_patient_reports_exam_count() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);
        let patient = jane(&state).await;

        for category in ["COVID", "ZIKA"] {
            let (status, _, _) = send(
                &app,
                "POST",
                "/api/exams",
                Some(&cookie),
                Some(json!({ "patient_id": patient.id, "category": category })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let uri = format!("/api/patients/{}", patient.id);
        let (status, _, body) = send(&app, "DELETE", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "deleted": true, "exams_deleted": 2 }));

        let (status, _, _) = send(&app, "GET", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_national_id_conflicts() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);
        jane(&state).await;

        let (status, _, body) = send(
            &app,
            "POST",
            "/api/patients",
            Some(&cookie),
            Some(json!({ "name": "Other Person", "national_id": "12345678900" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn report_period_validated_before_store() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);
        state.db.close().await;

        for uri in [
            "/api/reports/monthly?month=13&year=2024",
            "/api/reports/monthly?month=1&year=2019",
            "/api/reports/monthly/html?month=0&year=2024",
        ] {
            let (status, _, body) = send(&app, "GET", uri, Some(&cookie), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["code"], "validation_error");
        }

        // A valid period does reach the (closed) store
        let (status, _, body) = send(
            &app,
            "GET",
            "/api/reports/monthly?month=3&year=2024",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "store_unavailable");
    }

    #[tokio::test]
    async fn html_report_is_served_inline() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);

        let (status, headers, _) = send(
            &app,
            "GET",
            "/api/reports/monthly/html?month=3&year=2024",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "inline; filename=\"report-03-2024.html\""
        );
    }

    #[tokio::test]
    async fn stats_surface_store_failures() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let cookie = staff_cookie(&state);

        let (status, _, body) = send(&app, "GET", "/api/stats", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_exams"], 0);

        state.db.close().await;
        let (status, _, body) = send(&app, "GET", "/api/stats", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "store_unavailable");
    }

    #[tokio::test]
    async fn portal_login_and_exams() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let patient = jane(&state).await;
        crate::db::Exam::create(
            &state.db,
            &crate::db::NewExam::new(&patient.id, crate::db::ExamCategory::Chagas),
        )
        .await
        .unwrap();

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/portal/login",
            None,
            Some(json!({ "national_id": "12345678900" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/portal/login",
            None,
            Some(json!({ "national_id": "000", "secondary_id": "RG-7654321" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(
            &app,
            "POST",
            "/api/portal/login",
            None,
            Some(json!({ "national_id": "12345678900", "secondary_id": "RG-0000000" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, headers, body) = send(
            &app,
            "POST",
            "/api/portal/login",
            None,
            Some(json!({ "national_id": " 12345678900 ", "secondary_id": "RG-7654321" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["principal"]["id"], patient.id.as_str());
        let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("lab_patient_session="));

        let cookie = patient_cookie(&state, &patient.id);
        let (status, _, body) = send(&app, "GET", "/api/portal/exams", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["category"], "CHAGAS");

        // Patient tokens never reach staff records
        let (status, _, _) = send(&app, "GET", "/api/patients", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
