//! Time-based one-time passwords for phone and email verification.
//!
//! Codes are 4-digit SHA-1 TOTPs over a per-user secret with a 300 second
//! step and one step of skew either side, so a code stays usable for up to
//! ten minutes of clock drift. Staging environments may enable a fixed
//! bypass code for app store review flows.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

#[derive(Clone)]
pub struct OtpEngine {
    digits: usize,
    step: u64,
    skew: u8,
    bypass_code: Option<String>,
}

impl OtpEngine {
    #[must_use]
    pub fn new(digits: usize, step: u64, skew: u8, bypass_code: Option<String>) -> Self {
        Self {
            digits,
            step,
            skew,
            bypass_code,
        }
    }

    /// Fresh random secret, base32-encoded for storage.
    #[must_use]
    pub fn generate_secret(&self) -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    fn totp(&self, secret_base32: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid OTP secret encoding: {e:?}"))?;
        // 4-digit codes fall outside the RFC 6238 minimum, hence unchecked.
        Ok(TOTP::new_unchecked(
            Algorithm::SHA1,
            self.digits,
            self.skew,
            self.step,
            secret_bytes,
        ))
    }

    /// Current code for the secret, for handing to the notifier.
    pub fn current_code(&self, secret_base32: &str) -> Result<String> {
        let totp = self.totp(secret_base32)?;
        totp.generate_current()
            .map_err(|e| anyhow!("system clock error: {e}"))
    }

    /// Check a submitted code. The bypass code, when configured, matches any
    /// secret.
    pub fn verify(&self, secret_base32: &str, code: &str) -> bool {
        if let Some(bypass) = &self.bypass_code {
            if code == bypass {
                return true;
            }
        }
        let Ok(totp) = self.totp(secret_base32) else {
            return false;
        };
        totp.check_current(code).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(bypass: Option<&str>) -> OtpEngine {
        OtpEngine::new(4, 300, 1, bypass.map(String::from))
    }

    #[test]
    fn generated_secret_yields_four_digit_codes() {
        let engine = engine(None);
        let secret = engine.generate_secret();
        let code = engine.current_code(&secret).unwrap();
        assert_eq!(code.len(), 4);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn current_code_verifies_against_its_secret() {
        let engine = engine(None);
        let secret = engine.generate_secret();
        let code = engine.current_code(&secret).unwrap();
        assert!(engine.verify(&secret, &code));
    }

    #[test]
    fn wrong_code_is_rejected() {
        let engine = engine(None);
        let secret = engine.generate_secret();
        let code = engine.current_code(&secret).unwrap();
        let wrong = if code == "0000" { "0001" } else { "0000" };
        assert!(!engine.verify(&secret, wrong));
    }

    #[test]
    fn secrets_are_unique_per_call() {
        let engine = engine(None);
        assert_ne!(engine.generate_secret(), engine.generate_secret());
    }

    #[test]
    fn bypass_code_matches_any_secret() {
        let engine = engine(Some("2299"));
        let secret = engine.generate_secret();
        assert!(engine.verify(&secret, "2299"));
        assert!(engine.verify("JBSWY3DPEHPK3PXP", "2299"));
    }

    #[test]
    fn bypass_disabled_means_no_magic_code() {
        let engine = engine(None);
        let secret = engine.generate_secret();
        let current = engine.current_code(&secret).unwrap();
        if current != "2299" {
            assert!(!engine.verify(&secret, "2299"));
        }
    }

    #[test]
    fn garbage_secret_never_panics() {
        let engine = engine(None);
        assert!(!engine.verify("not base32 !!!", "1234"));
        assert!(engine.current_code("not base32 !!!").is_err());
    }
}
