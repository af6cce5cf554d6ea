//! Input validation for API requests.
//!
//! Validators return `Err(message)` for the first problem found. Use the
//! `ValidationErrorBuilder` from the `error` module to collect them per field.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

/// Maximum length of names
pub const MAX_NAME_LEN: usize = 200;

/// Maximum length of short free-text fields (phone, identifiers)
pub const MAX_SHORT_TEXT_LEN: usize = 64;

/// Maximum length of long free-text fields (address, notes, results)
pub const MAX_LONG_TEXT_LEN: usize = 4000;

lazy_static! {
    /// Regex for validating email addresses
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)*$"
    ).unwrap();

    /// Regex for identity document numbers: digits with optional separators
    static ref DOCUMENT_REGEX: Regex = Regex::new(
        r"^[0-9A-Za-z][0-9A-Za-z./ -]*$"
    ).unwrap();

    /// Regex for phone numbers
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9 ()-]{6,}$"
    ).unwrap();
}

/// Validate a required person name
pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name is too long (max {} characters)", MAX_NAME_LEN));
    }
    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// Validate an optional identity document number
pub fn validate_document(value: &Option<String>, label: &str) -> Result<(), String> {
    let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    if value.len() > MAX_SHORT_TEXT_LEN {
        return Err(format!(
            "{} is too long (max {} characters)",
            label, MAX_SHORT_TEXT_LEN
        ));
    }
    if !DOCUMENT_REGEX.is_match(value) {
        return Err(format!("{} contains invalid characters", label));
    }
    Ok(())
}

/// Validate an optional phone number
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    let Some(phone) = phone.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    if phone.len() > MAX_SHORT_TEXT_LEN || !PHONE_REGEX.is_match(phone) {
        return Err("Invalid phone number".to_string());
    }
    Ok(())
}

/// Validate the length of an optional free-text field
pub fn validate_text(value: &Option<String>, label: &str, max: usize) -> Result<(), String> {
    match value {
        Some(v) if v.chars().count() > max => {
            Err(format!("{} is too long (max {} characters)", label, max))
        }
        _ => Ok(()),
    }
}

/// Birth dates must not lie in the future
pub fn validate_birth_date(birth_date: Option<NaiveDate>, today: NaiveDate) -> Result<(), String> {
    match birth_date {
        Some(date) if date > today => Err("Birth date cannot be in the future".to_string()),
        _ => Ok(()),
    }
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}
