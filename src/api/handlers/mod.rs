//! API handlers and shared utilities.
//!
//! Every auth route replies with the same envelope shape and validates its
//! role header before touching business logic; the helpers for both live
//! here.

pub mod auth;
pub mod health;
pub mod root;

use axum::http::HeaderMap;
use regex::Regex;

use crate::auth::error::AuthError;
use crate::auth::roles::AppRole;

/// Role selector header sent by the mobile and dashboard clients.
pub const APP_TYPE_HEADER: &str = "x-app-type";

/// Lightweight email sanity check used by auth handlers before persisting data.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Phone numbers must arrive in E.164 form.
pub fn valid_phone(phone: &str) -> bool {
    Regex::new(r"^\+[1-9]\d{7,14}$").is_ok_and(|re| re.is_match(phone))
}

/// Minimal password policy; anything stricter belongs client-side.
pub fn valid_password(password: &str) -> bool {
    password.len() >= 8 && password.len() <= 128
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Resolve the role selector header. A missing or unrecognized value is a
/// validation failure before any business logic runs.
pub fn app_role_from_headers(headers: &HeaderMap) -> Result<AppRole, AuthError> {
    let value = headers
        .get(APP_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AuthError::validation("Missing x-app-type header"))?;
    AppRole::parse(value)
        .ok_or_else(|| AuthError::validation(format!("Unrecognized app type: {value}")))
}

/// Like [`app_role_from_headers`], but the header may be absent. A present
/// yet unrecognized value is still a validation failure.
pub fn optional_app_role_from_headers(headers: &HeaderMap) -> Result<Option<AppRole>, AuthError> {
    let Some(value) = headers
        .get(APP_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return Ok(None);
    };
    AppRole::parse(value)
        .map(Some)
        .ok_or_else(|| AuthError::validation(format!("Unrecognized app type: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn email_validation() {
        assert!(valid_email("rider@example.com"));
        assert!(valid_email("a.b+c@sub.example.co"));
        assert!(!valid_email("rider@example"));
        assert!(!valid_email("rider example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn phone_validation_requires_e164() {
        assert!(valid_phone("+15550000001"));
        assert!(valid_phone("+442071234567"));
        assert!(!valid_phone("15550000001"));
        assert!(!valid_phone("+0123"));
        assert!(!valid_phone("+1 555 000 0001"));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Rider@Example.COM "), "rider@example.com");
    }

    #[test]
    fn app_type_header_is_required_and_validated() {
        let mut headers = HeaderMap::new();
        assert!(app_role_from_headers(&headers).is_err());

        headers.insert(APP_TYPE_HEADER, HeaderValue::from_static("driver"));
        assert_eq!(app_role_from_headers(&headers).unwrap(), AppRole::Driver);

        headers.insert(APP_TYPE_HEADER, HeaderValue::from_static("pilot"));
        assert!(app_role_from_headers(&headers).is_err());
    }

    #[test]
    fn optional_app_type_header_tolerates_absence_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(optional_app_role_from_headers(&headers).unwrap(), None);

        headers.insert(APP_TYPE_HEADER, HeaderValue::from_static("rider"));
        assert_eq!(
            optional_app_role_from_headers(&headers).unwrap(),
            Some(AppRole::Rider)
        );

        headers.insert(APP_TYPE_HEADER, HeaderValue::from_static("pilot"));
        assert!(optional_app_role_from_headers(&headers).is_err());
    }
}
