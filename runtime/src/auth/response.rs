//! Classification of the portal's reply to a login submission.

use crate::portal::markers;

/// What a single login submission resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The portal confirmed the login in a dialog.
    Success,
    /// No dialog appeared within the wait. Treated as success.
    ImplicitSuccess,
    /// The CAPTCHA code was wrong; retry with a fresh image.
    CaptchaRejected,
    /// Any other dialog. Terminal.
    CredentialsRejected(String),
}

/// Classify the dialog (if any) raised after submitting the login form.
///
/// The CAPTCHA marker is checked first: a dialog mentioning both phrases is a
/// mismatch, not a login. The portal itself only raises the CAPTCHA and
/// rejection dialogs; a success dialog is recognised so it is never counted
/// as a rejection.
pub fn classify_submission(dialog: Option<&str>) -> SubmitOutcome {
    match dialog {
        None => SubmitOutcome::ImplicitSuccess,
        Some(text) if text.contains(markers::CAPTCHA_ERROR) => SubmitOutcome::CaptchaRejected,
        Some(text) if text.contains(markers::LOGIN_SUCCESS) => SubmitOutcome::Success,
        Some(text) => SubmitOutcome::CredentialsRejected(text.trim().to_string()),
    }
}
