//! CAPTCHA-gated login.
//!
//! [`SessionAcquirer`] drives a browser context through the login form until
//! the portal either accepts the session, rejects the credentials, or the
//! attempt budget runs out. The only way to obtain an [`AuthenticatedSession`]
//! is a successful acquisition, and the bridge requires one.

pub mod acquirer;
pub mod response;

pub use acquirer::SessionAcquirer;
pub use response::{classify_submission, SubmitOutcome};

use std::fmt;

/// Login identifier and secret for one request. Never persisted or logged.
#[derive(Clone)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl Credentials {
    pub fn new(identifier: &str, secret: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Strip the secret out of a message before it leaves the process.
    pub fn scrub(&self, message: &str) -> String {
        crate::error::redact(message, &self.secret)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One pass through the login form: the captured glyph and the code the
/// classifier read from it.
#[derive(Debug, Clone)]
pub struct CaptchaAttempt {
    pub image: Vec<u8>,
    pub code: String,
    /// 1-based attempt number.
    pub index: u32,
}

/// Proof of a logged-in browser context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    attempts: u32,
    implicit: bool,
}

impl AuthenticatedSession {
    pub(crate) fn new(attempts: u32, implicit: bool) -> Self {
        Self { attempts, implicit }
    }

    /// Attempts used, including the successful one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` when success was inferred from the absence of a dialog.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}

/// Result of a login run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(AuthenticatedSession),
    /// The portal rejected the credentials; carries its dialog text.
    RejectedCredentials(String),
    /// Every attempt ended on a CAPTCHA mismatch or an unreadable CAPTCHA.
    ExhaustedRetries { attempts: u32 },
}
