//! Auth configuration: token lifetimes, OAuth audiences, OTP parameters.

use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

const DEFAULT_ACCESS_TOKEN_TTL: &str = "15m";
const DEFAULT_REFRESH_TOKEN_TTL: &str = "7d";
const DEFAULT_OTP_STEP_SECONDS: u64 = 300;
const DEFAULT_OTP_DIGITS: usize = 4;
const DEFAULT_OTP_SKEW: u8 = 1;
// Secret outlives the current step by one drift window.
const DEFAULT_OTP_SECRET_TTL_SECONDS: i64 = 600;
const DEFAULT_STAGING_BYPASS_CODE: &str = "2299";
const DEFAULT_EMAIL_OTP_TEMPLATE: &str = "email-verification-code";
const DEFAULT_FORGOT_PASSWORD_TEMPLATE: &str = "forgot-password";
const DEFAULT_PHONE_OTP_TEMPLATE: &str = "phone-verification-code";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    access_token_ttl: String,
    refresh_token_ttl: String,
    staging: bool,
    otp_step_seconds: u64,
    otp_digits: usize,
    otp_skew: u8,
    otp_secret_ttl_seconds: i64,
    staging_bypass_code: String,
    google_client_id: String,
    google_client_id_ios: String,
    apple_bundle_id: String,
    email_otp_template: String,
    forgot_password_template: String,
    phone_otp_template: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL.to_string(),
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL.to_string(),
            staging: false,
            otp_step_seconds: DEFAULT_OTP_STEP_SECONDS,
            otp_digits: DEFAULT_OTP_DIGITS,
            otp_skew: DEFAULT_OTP_SKEW,
            otp_secret_ttl_seconds: DEFAULT_OTP_SECRET_TTL_SECONDS,
            staging_bypass_code: DEFAULT_STAGING_BYPASS_CODE.to_string(),
            google_client_id: String::new(),
            google_client_id_ios: String::new(),
            apple_bundle_id: String::new(),
            email_otp_template: DEFAULT_EMAIL_OTP_TEMPLATE.to_string(),
            forgot_password_template: DEFAULT_FORGOT_PASSWORD_TEMPLATE.to_string(),
            phone_otp_template: DEFAULT_PHONE_OTP_TEMPLATE.to_string(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.access_token_ttl = ttl.into();
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.refresh_token_ttl = ttl.into();
        self
    }

    /// Staging mode enables the fixed OTP bypass code for test automation.
    /// Must stay `false` in production configuration.
    #[must_use]
    pub fn with_staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    #[must_use]
    pub fn with_google_client_id(mut self, id: impl Into<String>) -> Self {
        self.google_client_id = id.into();
        self
    }

    #[must_use]
    pub fn with_google_client_id_ios(mut self, id: impl Into<String>) -> Self {
        self.google_client_id_ios = id.into();
        self
    }

    #[must_use]
    pub fn with_apple_bundle_id(mut self, id: impl Into<String>) -> Self {
        self.apple_bundle_id = id.into();
        self
    }

    #[must_use]
    pub fn with_email_otp_template(mut self, id: impl Into<String>) -> Self {
        self.email_otp_template = id.into();
        self
    }

    #[must_use]
    pub fn with_forgot_password_template(mut self, id: impl Into<String>) -> Self {
        self.forgot_password_template = id.into();
        self
    }

    #[must_use]
    pub fn with_phone_otp_template(mut self, id: impl Into<String>) -> Self {
        self.phone_otp_template = id.into();
        self
    }

    pub(crate) fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.expose_secret().as_bytes()
    }

    /// # Errors
    /// Returns an error if the configured duration string is malformed.
    pub fn access_token_ttl(&self) -> Result<Duration> {
        parse_duration(&self.access_token_ttl)
    }

    /// # Errors
    /// Returns an error if the configured duration string is malformed.
    pub fn refresh_token_ttl(&self) -> Result<Duration> {
        parse_duration(&self.refresh_token_ttl)
    }

    #[must_use]
    pub fn staging(&self) -> bool {
        self.staging
    }

    #[must_use]
    pub fn otp_step_seconds(&self) -> u64 {
        self.otp_step_seconds
    }

    #[must_use]
    pub fn otp_digits(&self) -> usize {
        self.otp_digits
    }

    #[must_use]
    pub fn otp_skew(&self) -> u8 {
        self.otp_skew
    }

    #[must_use]
    pub fn otp_secret_ttl_seconds(&self) -> i64 {
        self.otp_secret_ttl_seconds
    }

    #[must_use]
    pub fn staging_bypass_code(&self) -> &str {
        &self.staging_bypass_code
    }

    #[must_use]
    pub fn google_client_id(&self) -> &str {
        &self.google_client_id
    }

    #[must_use]
    pub fn google_client_id_ios(&self) -> &str {
        &self.google_client_id_ios
    }

    #[must_use]
    pub fn apple_bundle_id(&self) -> &str {
        &self.apple_bundle_id
    }

    #[must_use]
    pub fn email_otp_template(&self) -> &str {
        &self.email_otp_template
    }

    #[must_use]
    pub fn forgot_password_template(&self) -> &str {
        &self.forgot_password_template
    }

    #[must_use]
    pub fn phone_otp_template(&self) -> &str {
        &self.phone_otp_template
    }
}

/// Parse duration strings like "15m", "7d", "30s", "1h", "2w".
///
/// # Errors
/// Returns an error when the string is not `<number><s|m|h|d|w>`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .ok_or_else(|| anyhow!("Missing unit in duration: {value}"))?;

    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow!("Invalid duration amount: {value}"))?;
    if amount == 0 {
        return Err(anyhow!("Duration must be greater than zero: {value}"));
    }

    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 60 * 60,
        "d" => amount * 24 * 60 * 60,
        "w" => amount * 7 * 24 * 60 * 60,
        _ => return Err(anyhow!("Unknown duration unit: {value}")),
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("test-secret"))
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").ok(), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m").ok(), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h").ok(), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_duration("7d").ok(),
            Some(Duration::from_secs(7 * 86_400))
        );
        assert_eq!(
            parse_duration("2w").ok(),
            Some(Duration::from_secs(14 * 86_400))
        );
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("7").is_err());
        assert!(parse_duration("d7").is_err());
        assert!(parse_duration("7 days").is_err());
        assert!(parse_duration("0m").is_err());
    }

    #[test]
    fn defaults_match_reference_values() {
        let config = config();
        assert_eq!(config.access_token_ttl().ok(), parse_duration("15m").ok());
        assert_eq!(config.refresh_token_ttl().ok(), parse_duration("7d").ok());
        assert!(!config.staging());
        assert_eq!(config.otp_digits(), 4);
        assert_eq!(config.otp_step_seconds(), 300);
        assert_eq!(config.otp_skew(), 1);
        assert_eq!(config.staging_bypass_code(), "2299");
    }

    #[test]
    fn builder_overrides() {
        let config = config()
            .with_access_token_ttl("5m")
            .with_refresh_token_ttl("1d")
            .with_staging(true)
            .with_google_client_id("web-client")
            .with_google_client_id_ios("ios-client")
            .with_apple_bundle_id("dev.fleetpass.app");

        assert_eq!(config.access_token_ttl().ok(), parse_duration("5m").ok());
        assert_eq!(config.refresh_token_ttl().ok(), parse_duration("1d").ok());
        assert!(config.staging());
        assert_eq!(config.google_client_id(), "web-client");
        assert_eq!(config.google_client_id_ios(), "ios-client");
        assert_eq!(config.apple_bundle_id(), "dev.fleetpass.app");
    }
}
