//! Login state machine.
//!
//! ```text
//! Init -> CaptchaCaptured -> Submitted -> Resolved(outcome)
//!  ^                                          |
//!  +------------- CaptchaRejected ------------+
//! ```
//!
//! Every pass through `Init` navigates to the login page again, so a
//! rendered CAPTCHA is never reused.

use std::sync::Arc;

use captcha_vision::{CaptchaError, CaptchaSolver};

use super::response::{classify_submission, SubmitOutcome};
use super::{AuthOutcome, AuthenticatedSession, CaptchaAttempt, Credentials};
use crate::config::PortalConfig;
use crate::error::ScrapeError;
use crate::portal::{login, pages};
use crate::renderer::{Frame, RenderContext};

/// Where the login run currently stands.
#[derive(Debug)]
pub enum LoginState {
    Init,
    CaptchaCaptured(CaptchaAttempt),
    Submitted,
    Resolved(SubmitOutcome),
}

/// Acquires an authenticated browser session.
pub struct SessionAcquirer {
    solver: Arc<dyn CaptchaSolver>,
    config: PortalConfig,
}

impl SessionAcquirer {
    pub fn new(solver: Arc<dyn CaptchaSolver>, config: PortalConfig) -> Self {
        Self { solver, config }
    }

    /// Run the login loop to a terminal outcome.
    ///
    /// Only faults outside the login protocol (navigation failure, a broken
    /// classifier, a dead browser) surface as `Err`.
    pub async fn acquire(
        &self,
        ctx: &mut dyn RenderContext,
        creds: &Credentials,
    ) -> Result<AuthOutcome, ScrapeError> {
        let max_attempts = self.config.max_attempts;
        let mut attempts = 0u32;
        let mut state = LoginState::Init;

        loop {
            state = match state {
                LoginState::Init => {
                    if attempts >= max_attempts {
                        tracing::warn!(attempts, "login attempts exhausted");
                        return Ok(AuthOutcome::ExhaustedRetries { attempts });
                    }
                    attempts += 1;
                    match self.capture(ctx, attempts).await? {
                        Some(attempt) => LoginState::CaptchaCaptured(attempt),
                        None => LoginState::Init,
                    }
                }
                LoginState::CaptchaCaptured(attempt) => {
                    self.submit(ctx, creds, &attempt).await?;
                    LoginState::Submitted
                }
                LoginState::Submitted => {
                    let dialog = ctx.wait_for_dialog(self.config.timeouts.dialog_ms).await?;
                    LoginState::Resolved(classify_submission(dialog.as_deref()))
                }
                LoginState::Resolved(outcome) => match outcome {
                    SubmitOutcome::Success => {
                        tracing::info!(attempts, "login confirmed");
                        return Ok(AuthOutcome::Authenticated(AuthenticatedSession::new(
                            attempts, false,
                        )));
                    }
                    SubmitOutcome::ImplicitSuccess => {
                        tracing::warn!(
                            attempts,
                            "no dialog after login submit, assuming the session is authenticated"
                        );
                        return Ok(AuthOutcome::Authenticated(AuthenticatedSession::new(
                            attempts, true,
                        )));
                    }
                    SubmitOutcome::CaptchaRejected => {
                        tracing::info!(attempt = attempts, "captcha rejected by portal");
                        LoginState::Init
                    }
                    SubmitOutcome::CredentialsRejected(message) => {
                        tracing::info!(attempt = attempts, "credentials rejected by portal");
                        return Ok(AuthOutcome::RejectedCredentials(creds.scrub(&message)));
                    }
                },
            };
        }
    }

    /// Load a fresh login page and read its CAPTCHA. `None` consumes the
    /// attempt without submitting anything.
    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        index: u32,
    ) -> Result<Option<CaptchaAttempt>, ScrapeError> {
        let url = self.config.page_url(pages::LOGIN)?;
        ctx.navigate(url.as_str(), self.config.timeouts.navigation_ms)
            .await?;

        let top = Frame::top();
        if !ctx
            .wait_for_element(&top, login::CAPTCHA_IMAGE, self.config.timeouts.element_ms)
            .await?
        {
            tracing::warn!(attempt = index, "captcha image did not appear");
            return Ok(None);
        }

        let image = ctx.screenshot_element(&top, login::CAPTCHA_IMAGE).await?;
        let solver = Arc::clone(&self.solver);
        let bytes = image.clone();
        let solved = tokio::task::spawn_blocking(move || solver.solve(&bytes))
            .await
            .map_err(|e| anyhow::anyhow!("captcha classification task failed: {e}"))?;

        match solved {
            Ok(code) => {
                tracing::debug!(attempt = index, len = code.len(), "captcha classified");
                Ok(Some(CaptchaAttempt { image, code, index }))
            }
            Err(CaptchaError::Decode(reason)) => {
                tracing::warn!(attempt = index, %reason, "captcha image could not be decoded");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fill and submit the login form once.
    async fn submit(
        &self,
        ctx: &mut dyn RenderContext,
        creds: &Credentials,
        attempt: &CaptchaAttempt,
    ) -> Result<(), ScrapeError> {
        let top = Frame::top();
        ctx.fill(&top, login::IDENTIFIER, creds.identifier()).await?;
        ctx.fill(&top, login::SECRET, creds.secret()).await?;
        ctx.fill(&top, login::CODE, &attempt.code).await?;
        ctx.click(&top, login::SUBMIT).await?;
        tracing::debug!(attempt = attempt.index, "login form submitted");
        Ok(())
    }
}
