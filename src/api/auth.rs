//! Staff authentication and account management.

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ValidationErrorBuilder};
use super::session::{cleared_cookie, session_cookie, Authenticated};
use super::validation::{validate_email, validate_name};
use crate::auth::{
    hash_password, validate_password_strength, verify_password, PrincipalKind, StaffClaims,
    StaffPrincipal,
};
use crate::config::BootstrapAdmin;
use crate::db::{CreateUserRequest, DbPool, LoginRequest, LoginResponse, User, UserResponse};
use crate::AppState;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate and insert a staff account. Shared by the API and the CLI.
pub async fn register_user(db: &DbPool, req: &CreateUserRequest) -> Result<User, ApiError> {
    let email = normalize_email(&req.email);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&req.name));
    errors.check("email", validate_email(&email));
    if let Some(message) = validate_password_strength(&req.password) {
        errors.add("password", message);
    }
    errors.finish()?;

    if User::find_by_email(db, &email).await?.is_some() {
        return Err(ApiError::conflict("A user with this email already exists"));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let user = User::create(db, req.name.trim(), &email, &password_hash).await?;
    info!(user_id = %user.id, email = %user.email, "Created staff user");
    Ok(user)
}

/// Create the configured bootstrap admin when no staff account exists yet
pub async fn ensure_admin_user(db: &DbPool, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    if User::count(db).await? > 0 {
        return Ok(());
    }

    let req = CreateUserRequest {
        name: admin.name.clone(),
        email: admin.email.clone(),
        password: admin.password.clone(),
    };
    register_user(db, &req)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create bootstrap admin: {}", e))?;

    info!(email = %admin.email, "Bootstrap admin account created");
    Ok(())
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse<StaffPrincipal>>), ApiError> {
    let email = normalize_email(&request.email);
    if email.is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let user = User::find_by_email(&state.db, &email)
        .await?
        .filter(|u| u.active)
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.password, &user.password_hash) {
        warn!(email = %email, "Failed staff login");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = state
        .tokens
        .issue_staff_token(&user.id, &user.email, &user.name)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let cookie = session_cookie(
        &state.config.auth,
        PrincipalKind::Staff,
        token.clone(),
        state.tokens.ttl(),
    );

    info!(user_id = %user.id, "Staff login");
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token,
            principal: StaffPrincipal {
                id: user.id,
                email: user.email,
                name: user.name,
            },
        }),
    ))
}

/// Logout endpoint
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    (
        jar.add(cleared_cookie(&state.config.auth, PrincipalKind::Staff)),
        Json(serde_json::json!({ "message": "Logged out" })),
    )
}

/// Current staff principal
pub async fn me(Authenticated(claims): Authenticated<StaffClaims>) -> Json<StaffPrincipal> {
    Json(StaffPrincipal::from(&claims))
}

/// Create a staff account
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated<StaffClaims>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = register_user(&state.db, &req).await?;
    info!(created_by = %claims.sub, user_id = %user.id, "Staff user added");
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db::test_pool;

    fn request(email: &str, password: &str) -> CreateUserRequest {
        CreateUserRequest {
            name: "Ana Lima".to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_user_normalizes_email() {
        let pool = test_pool().await;
        let user = register_user(&pool, &request("  Ana@Lab.Test ", "long-enough"))
            .await
            .unwrap();
        assert_eq!(user.email, "ana@lab.test");
        assert!(verify_password("long-enough", &user.password_hash));
    }

    #[tokio::test]
    async fn test_register_user_rejects_duplicates_and_weak_passwords() {
        let pool = test_pool().await;
        register_user(&pool, &request("ana@lab.test", "long-enough"))
            .await
            .unwrap();

        let err = register_user(&pool, &request("ANA@lab.test", "long-enough"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);

        let err = register_user(&pool, &request("bia@lab.test", "short"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let err = register_user(&pool, &request("not-an-email", "long-enough"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_ensure_admin_user_only_when_empty() {
        let pool = test_pool().await;
        let admin = BootstrapAdmin {
            name: "Admin".to_string(),
            email: "admin@lab.test".to_string(),
            password: "change-me-now".to_string(),
        };

        ensure_admin_user(&pool, &admin).await.unwrap();
        ensure_admin_user(&pool, &admin).await.unwrap();
        assert_eq!(User::count(&pool).await.unwrap(), 1);
    }
}
