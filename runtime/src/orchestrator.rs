//! Request orchestration: login, bridge, extract, release.
//!
//! [`execute`] owns the browser context for the whole request and closes it
//! exactly once after the flow finishes, whether the flow succeeded, failed,
//! errored or panicked.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;

use captcha_vision::CaptchaSolver;

use crate::auth::{AuthOutcome, Credentials, SessionAcquirer};
use crate::bridge::bridge;
use crate::config::PortalConfig;
use crate::error::ScrapeError;
use crate::extraction::{ExtractionTask, PortalExtractor};
use crate::protocol::{ScrapeRequest, ScrapeResponse, ScrapeResults};
use crate::renderer::{RenderContext, Renderer};

/// Process-wide handles, built once at startup and shared by every request.
pub struct AppContext {
    pub config: PortalConfig,
    pub solver: Arc<dyn CaptchaSolver>,
    pub renderer: Arc<dyn Renderer>,
    sessions: Semaphore,
}

impl AppContext {
    pub fn new(
        config: PortalConfig,
        solver: Arc<dyn CaptchaSolver>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let sessions = Semaphore::new(config.max_sessions.max(1));
        Self {
            config,
            solver,
            renderer,
            sessions,
        }
    }

    /// Browser slots not currently in use.
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }
}

/// Serve one scrape request.
///
/// `Err` is returned only for client input errors, before any browser work.
/// Every other outcome is folded into the response.
pub async fn execute(
    app: &AppContext,
    request: &ScrapeRequest,
) -> Result<ScrapeResponse, ScrapeError> {
    let Some(task) = request.task.extraction() else {
        return Ok(ScrapeResponse::ack());
    };
    let creds = request.credentials()?;

    let _permit = match app.sessions.acquire().await {
        Ok(permit) => permit,
        Err(e) => return Ok(ScrapeResponse::error(format!("session limiter closed: {e}"))),
    };

    let mut ctx = match app.renderer.new_context().await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "failed to start browser");
            return Ok(ScrapeResponse::error(creds.scrub(&format!("{e:#}"))));
        }
    };

    let outcome = AssertUnwindSafe(run_flow(app, task, &creds, ctx.as_mut()))
        .catch_unwind()
        .await;

    if let Err(e) = ctx.close().await {
        tracing::warn!(error = %e, "failed to close browser");
    }

    Ok(match outcome {
        Ok(Ok(results)) => ScrapeResponse::success(results),
        Ok(Err(ScrapeError::CredentialsRejected(message))) => {
            ScrapeResponse::failed(creds.scrub(&message))
        }
        Ok(Err(e)) if e.is_auth_rejection() => ScrapeResponse::failed(creds.scrub(&e.to_string())),
        Ok(Err(e)) => {
            let message = creds.scrub(&format!("{e:#}"));
            tracing::error!(error = %message, "scrape failed");
            ScrapeResponse::error(message)
        }
        Err(panic) => {
            let message = creds.scrub(&panic_message(panic.as_ref()));
            tracing::error!(panic = %message, "scrape flow panicked");
            ScrapeResponse::error(format!("internal error: {message}"))
        }
    })
}

/// Acquire, bridge and extract, in that order.
async fn run_flow(
    app: &AppContext,
    task: ExtractionTask,
    creds: &Credentials,
    ctx: &mut dyn RenderContext,
) -> Result<ScrapeResults, ScrapeError> {
    let acquirer = SessionAcquirer::new(Arc::clone(&app.solver), app.config.clone());
    let session = match acquirer.acquire(ctx, creds).await? {
        AuthOutcome::Authenticated(session) => session,
        AuthOutcome::RejectedCredentials(message) => {
            return Err(ScrapeError::CredentialsRejected(message))
        }
        AuthOutcome::ExhaustedRetries { attempts } => {
            return Err(ScrapeError::RetriesExhausted(attempts))
        }
    };
    tracing::info!(
        attempts = session.attempts(),
        implicit = session.is_implicit(),
        "authenticated"
    );

    let http = bridge(&session, &*ctx, &app.config).await?;
    let extractor = PortalExtractor::new(app.config.clone());

    let mut results = ScrapeResults::default();
    if task.includes_score() {
        let entries = extractor.score_detail(ctx, &http).await?;
        tracing::info!(entries = entries.len(), "score detail extracted");
        results.score_task = Some(entries);
    }
    if task.includes_grades() {
        let report = extractor.historical_grades(ctx, &http).await?;
        tracing::info!(
            rows = report.grades.len(),
            terms = report.rank_stats.len(),
            "historical grades extracted"
        );
        results.grades_task = Some(report);
    }
    Ok(results)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
