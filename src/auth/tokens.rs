//! Signed session tokens (HS256).
//!
//! Tokens are valid for the configured TTL (24 hours by default) and are
//! checked with zero leeway, so a token is rejected the second it expires.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::debug;

use super::{PatientClaims, Principal, PrincipalKind, StaffClaims};
use crate::config::Config;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Token for the {found} domain presented to the {expected} domain")]
    WrongDomain {
        expected: PrincipalKind,
        found: PrincipalKind,
    },
}

/// Issues and verifies tokens for both principal kinds.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let secret = config.jwt_secret()?;
        Ok(Self::new(
            secret.as_bytes(),
            Duration::hours(config.auth.token_ttl_hours),
        ))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }

    /// Sign `claims`. The role claim must belong to `P`'s domain.
    pub fn issue<P: Principal>(&self, claims: &P) -> Result<String, TokenError> {
        if claims.role() != P::KIND {
            return Err(TokenError::WrongDomain {
                expected: P::KIND,
                found: claims.role(),
            });
        }
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    /// Check signature, expiry and domain of `token`.
    pub fn verify<P: Principal>(&self, token: &str) -> Result<P, TokenError> {
        let data = decode::<P>(token, &self.decoding, &Self::validation())?;
        let claims = data.claims;
        if claims.role() != P::KIND {
            return Err(TokenError::WrongDomain {
                expected: P::KIND,
                found: claims.role(),
            });
        }
        Ok(claims)
    }

    pub fn issue_staff_token(&self, user_id: &str, email: &str, name: &str) -> Result<String, TokenError> {
        self.issue_staff_token_at(user_id, email, name, Utc::now())
    }

    fn issue_staff_token_at(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        self.issue(&StaffClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            role: PrincipalKind::Staff,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        })
    }

    pub fn issue_patient_token(&self, patient_id: &str, name: &str) -> Result<String, TokenError> {
        self.issue_patient_token_at(patient_id, name, Utc::now())
    }

    fn issue_patient_token_at(
        &self,
        patient_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        self.issue(&PatientClaims {
            sub: patient_id.to_string(),
            name: name.to_string(),
            role: PrincipalKind::Patient,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        })
    }

    pub fn verify_staff_token(&self, token: &str) -> Option<StaffClaims> {
        self.verify::<StaffClaims>(token)
            .map_err(|e| debug!("Rejected staff token: {}", e))
            .ok()
    }

    pub fn verify_patient_token(&self, token: &str) -> Option<PatientClaims> {
        self.verify::<PatientClaims>(token)
            .map_err(|e| debug!("Rejected patient token: {}", e))
            .ok()
    }
}
