//! Error taxonomy for a scrape request.
//!
//! | Variant | Disposition |
//! |---|---|
//! | `ClientInput` | rejected before any browser work |
//! | `CredentialsRejected`, `RetriesExhausted` | terminal `failed` |
//! | `ItemExtraction` | logged, item skipped |
//! | `Captcha`, `Unclassified` | surfaced as `error` |
//!
//! A rejected CAPTCHA is not an error at all; it is one of the login
//! outcomes and is retried inside the acquirer.

use captcha_vision::CaptchaError;

/// Errors raised while serving a scrape request.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("account and password are required")]
    ClientInput,

    #[error("login rejected: {0}")]
    CredentialsRejected(String),

    #[error("captcha could not be recognised after {0} attempts")]
    RetriesExhausted(u32),

    #[error("item extraction failed: {0}")]
    ItemExtraction(String),

    #[error("captcha error: {0}")]
    Captcha(#[from] CaptchaError),

    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl ScrapeError {
    /// Whether this is a classified authentication rejection.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            ScrapeError::CredentialsRejected(_) | ScrapeError::RetriesExhausted(_)
        )
    }
}

/// Remove every occurrence of `secret` from a message bound for a client or
/// a log line.
pub fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        return message.to_string();
    }
    message.replace(secret, "***")
}
