//! Principals and their signed session tokens.
//!
//! Staff users and patients authenticate into separate domains. Both token
//! kinds are signed with the same secret, so every token carries a `role`
//! claim and verification rejects a token whose role does not match the
//! domain it is presented to.

mod password;
mod tokens;

pub use password::{hash_password, validate_password_strength, verify_password, MIN_PASSWORD_LEN};
pub use tokens::{TokenError, TokenService};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Staff,
    Patient,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Patient => "patient",
        }
    }

    /// Name of the session cookie carrying this kind's token
    pub fn cookie_name<'a>(&self, config: &'a AuthConfig) -> &'a str {
        match self {
            Self::Staff => &config.staff_cookie,
            Self::Patient => &config.patient_cookie,
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity carried by a session token
pub trait Principal: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: PrincipalKind;

    /// The `role` claim as decoded from the token
    fn role(&self) -> PrincipalKind;

    fn subject(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffClaims {
    /// Staff user ID
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: PrincipalKind,
    pub iat: i64,
    pub exp: i64,
}

impl Principal for StaffClaims {
    const KIND: PrincipalKind = PrincipalKind::Staff;

    fn role(&self) -> PrincipalKind {
        self.role
    }

    fn subject(&self) -> &str {
        &self.sub
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientClaims {
    /// Patient ID
    pub sub: String,
    pub name: String,
    pub role: PrincipalKind,
    pub iat: i64,
    pub exp: i64,
}

impl Principal for PatientClaims {
    const KIND: PrincipalKind = PrincipalKind::Patient;

    fn role(&self) -> PrincipalKind {
        self.role
    }

    fn subject(&self) -> &str {
        &self.sub
    }
}

/// Public view of an authenticated staff user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaffPrincipal {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl From<&StaffClaims> for StaffPrincipal {
    fn from(claims: &StaffClaims) -> Self {
        Self {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
        }
    }
}

/// Public view of an authenticated patient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientPrincipal {
    pub id: String,
    pub name: String,
}

impl From<&PatientClaims> for PatientPrincipal {
    fn from(claims: &PatientClaims) -> Self {
        Self {
            id: claims.sub.clone(),
            name: claims.name.clone(),
        }
    }
}
