//! Cookie sessions shared by the staff API and the patient portal.
//!
//! `require_session::<P>` guards a router for one principal kind: it reads
//! that kind's cookie, verifies the token and stores the claims in the request
//! extensions, where handlers pick them up through `Authenticated<P>`.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use crate::auth::{Principal, PrincipalKind};
use crate::config::AuthConfig;
use crate::AppState;

/// Session cookie carrying `token` for `kind`
pub fn session_cookie(
    config: &AuthConfig,
    kind: PrincipalKind,
    token: String,
    ttl: chrono::Duration,
) -> Cookie<'static> {
    Cookie::build((kind.cookie_name(config).to_string(), token))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(ttl.num_seconds()))
        .build()
}

/// Expired, empty cookie that clears the session for `kind`
pub fn cleared_cookie(config: &AuthConfig, kind: PrincipalKind) -> Cookie<'static> {
    Cookie::build((kind.cookie_name(config).to_string(), String::new()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}

/// Resolve the principal of kind `P` from the request cookies.
pub fn authenticate<P: Principal>(state: &AppState, headers: &HeaderMap) -> Result<P, ApiError> {
    let jar = CookieJar::from_headers(headers);
    let cookie_name = P::KIND.cookie_name(&state.config.auth);

    let token = jar
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    state.tokens.verify::<P>(&token).map_err(|e| {
        debug!(kind = %P::KIND, "Session rejected: {}", e);
        ApiError::unauthorized("Invalid credentials")
    })
}

/// Session middleware for principals of kind `P`
pub async fn require_session<P: Principal>(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = authenticate::<P>(&state, request.headers())?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Extractor for the authenticated principal of kind `P`
#[derive(Debug, Clone)]
pub struct Authenticated<P>(pub P);

#[async_trait]
impl<P: Principal> FromRequestParts<Arc<AppState>> for Authenticated<P> {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<P>() {
            return Ok(Self(principal.clone()));
        }
        authenticate::<P>(state, &parts.headers).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let mut config = AuthConfig::default();
        config.secure_cookies = true;
        let cookie = session_cookie(
            &config,
            PrincipalKind::Patient,
            "token-value".to_string(),
            chrono::Duration::hours(24),
        );

        assert_eq!(cookie.name(), "lab_patient_session");
        assert_eq!(cookie.value(), "token-value");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(24)));
    }

    #[test]
    fn test_cleared_cookie() {
        let config = AuthConfig::default();
        let cookie: Cookie = cleared_cookie(&config, PrincipalKind::Staff);
        assert_eq!(cookie.name(), "lab_staff_session");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.secure(), Some(false));
    }
}
