//! Report extraction from an authenticated portal session.
//!
//! Two procedures, one per report:
//!
//! - **ScoreDetail**: walk the course listing and fetch each course's
//!   breakdown.
//! - **HistoricalGrades**: query every (year, term) pair and collect grade
//!   rows plus the term statistics.
//!
//! Each runs over the bridged HTTP client when configured to, falling back to
//! browser frame navigation when the listing cannot be fetched over HTTP.
//! Failures are isolated per course or per term.

pub mod form;
pub mod grades;
pub mod rank;
pub mod score;
pub mod table;

pub use grades::{GradesReport, RankBlock, TermResult};
pub use rank::{RankStats, RANK_FIELD_DEFAULT};
pub use score::{Course, ScoreEntry};
pub use table::{parse_tables, rows_with_header, HtmlTable};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use futures::future::join_all;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::{Duration, Instant};
use url::Url;

use crate::bridge::http_client::encode_form;
use crate::bridge::{PortalClient, SessionContext};
use crate::config::{ExtractionMode, PortalConfig};
use crate::error::ScrapeError;
use crate::portal::{by_name, controls, course_radio, frames, pages};
use crate::renderer::{Frame, RenderContext};
use form::FormSpec;

/// An ordered field-name to value mapping. Serializes as a JSON object
/// with fields in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRow {
    fields: Vec<(String, String)>,
}

impl ReportRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field. A repeated name replaces the earlier value in place.
    pub fn push(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(field) => field.1 = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for ReportRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Which reports to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTask {
    ScoreDetail,
    HistoricalGrades,
    Both,
}

impl ExtractionTask {
    pub fn includes_score(self) -> bool {
        matches!(self, ExtractionTask::ScoreDetail | ExtractionTask::Both)
    }

    pub fn includes_grades(self) -> bool {
        matches!(self, ExtractionTask::HistoricalGrades | ExtractionTask::Both)
    }
}

/// Longest single wait on the result frame before checking for dialogs.
const DIALOG_CHECK_MS: u64 = 500;

/// A listing frame fetched over HTTP: its URL, the form to replay, the raw
/// document and the charset it was served in.
struct HttpListing {
    url: Url,
    form: FormSpec,
    html: String,
    charset: &'static Encoding,
}

/// Runs the report procedures for one authenticated request.
pub struct PortalExtractor {
    config: PortalConfig,
}

impl PortalExtractor {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    /// Score breakdown of every listed course. Courses that fail are
    /// skipped.
    pub async fn score_detail(
        &self,
        ctx: &mut dyn RenderContext,
        session: &SessionContext,
    ) -> Result<Vec<ScoreEntry>> {
        if self.config.extraction_mode == ExtractionMode::Http {
            match self
                .http_listing(session.client(), pages::SCORE_DETAIL, controls::COURSE)
                .await
            {
                Ok(listing) => return Ok(self.score_detail_http(session.client(), &listing).await),
                Err(e) => tracing::warn!(
                    error = %e,
                    "course listing unavailable over HTTP, using the browser"
                ),
            }
        }
        self.score_detail_browser(ctx).await
    }

    /// Grade rows and term statistics for the most recent terms. Terms that
    /// fail are skipped.
    pub async fn historical_grades(
        &self,
        ctx: &mut dyn RenderContext,
        session: &SessionContext,
    ) -> Result<GradesReport> {
        if self.config.extraction_mode == ExtractionMode::Http {
            match self
                .http_listing(session.client(), pages::HISTORICAL_GRADES, controls::YEAR)
                .await
            {
                Ok(listing) => {
                    return Ok(self.historical_grades_http(session.client(), &listing).await)
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    "term listing unavailable over HTTP, using the browser"
                ),
            }
        }
        self.historical_grades_browser(ctx).await
    }

    /// Fetch a report page, follow it into the listing frame and parse the
    /// form holding `control`.
    async fn http_listing(
        &self,
        client: &PortalClient,
        page: &str,
        control: &str,
    ) -> Result<HttpListing> {
        let page_url = self.config.page_url(page)?;
        let outer = client.get(page_url.as_str()).await?.ensure_success()?;
        let outer_url = Url::parse(&outer.final_url).unwrap_or(page_url);

        let src = form::frame_src(&outer.body, frames::LISTING)
            .with_context(|| format!("no '{}' frame in {page}", frames::LISTING))?;
        let url = outer_url
            .join(&src)
            .with_context(|| format!("bad listing frame src '{src}'"))?;

        let listing = client.get(url.as_str()).await?.ensure_success()?;
        let url = Url::parse(&listing.final_url).unwrap_or(url);
        let form = form::parse_form(&listing.body, &url, control)
            .with_context(|| format!("no form with '{control}' in listing"))?;

        Ok(HttpListing {
            url,
            form,
            html: listing.body,
            charset: listing.charset,
        })
    }

    /// Submit the listing form with `overrides` and return the result body.
    async fn submit_http(
        &self,
        client: &PortalClient,
        listing: &HttpListing,
        overrides: &[(&str, &str)],
    ) -> Result<String> {
        let data = listing.form.encode(overrides, Some(controls::SUBMIT));
        let referer = [("Referer".to_string(), listing.url.to_string())];
        let resp = if listing.form.method == "post" {
            client
                .post_form(listing.form.action.as_str(), &data, listing.charset, &referer)
                .await?
        } else {
            let mut url = listing.form.action.clone();
            let query = encode_form(&data, listing.charset);
            url.set_query((!query.is_empty()).then_some(query.as_str()));
            client.get(url.as_str()).await?
        };
        Ok(resp.ensure_success()?.body)
    }

    async fn score_detail_http(
        &self,
        client: &PortalClient,
        listing: &HttpListing,
    ) -> Vec<ScoreEntry> {
        let courses = score::parse_courses(&listing.html);
        tracing::info!(courses = courses.len(), "fetching score detail over HTTP");

        let mut entries = Vec::with_capacity(courses.len());
        for chunk in courses.chunks(self.config.fetch_concurrency.max(1)) {
            // Built without closures so the request future stays Send.
            let mut fetches = Vec::with_capacity(chunk.len());
            for course in chunk {
                fetches.push(self.course_detail_http(client, listing, course));
            }
            for (course, result) in chunk.iter().zip(join_all(fetches).await) {
                match result {
                    Ok(entry) => entries.push(entry),
                    Err(e) => tracing::warn!(course = %course.code, error = %e, "skipping course"),
                }
            }
        }
        entries
    }

    async fn course_detail_http(
        &self,
        client: &PortalClient,
        listing: &HttpListing,
        course: &Course,
    ) -> Result<ScoreEntry, ScrapeError> {
        let body = self
            .submit_http(client, listing, &[(controls::COURSE, course.code.as_str())])
            .await?;
        Ok(ScoreEntry {
            course: course.name.clone(),
            code: course.code.clone(),
            details: score::parse_detail(&body)?,
        })
    }

    async fn score_detail_browser(&self, ctx: &mut dyn RenderContext) -> Result<Vec<ScoreEntry>> {
        let listing = self
            .open_listing(ctx, pages::SCORE_DETAIL, &by_name("input", controls::COURSE))
            .await?;
        let Some(html) = listing else {
            tracing::info!("no courses listed");
            return Ok(Vec::new());
        };

        let courses = score::parse_courses(&html);
        tracing::info!(courses = courses.len(), "fetching score detail in the browser");

        let listing_frame = Frame::named(frames::LISTING);
        let mut entries = Vec::with_capacity(courses.len());
        for course in &courses {
            let result = async {
                ctx.click(&listing_frame, &course_radio(&course.code)).await?;
                let body = self
                    .submit_browser(ctx, self.config.timeouts.frame_ms)
                    .await?;
                Ok::<_, ScrapeError>(ScoreEntry {
                    course: course.name.clone(),
                    code: course.code.clone(),
                    details: score::parse_detail(&body)?,
                })
            }
            .await;

            match result {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(course = %course.code, error = %e, "skipping course"),
            }
        }
        Ok(entries)
    }

    async fn historical_grades_http(
        &self,
        client: &PortalClient,
        listing: &HttpListing,
    ) -> GradesReport {
        let plan = grades::term_plan(
            &listing.html,
            self.config.max_years,
            self.config.max_terms,
            chrono::Local::now().date_naive(),
        );
        tracing::info!(terms = plan.len(), "fetching historical grades over HTTP");

        let mut report = GradesReport::default();
        for chunk in plan.chunks(self.config.fetch_concurrency.max(1)) {
            let mut fetches = Vec::with_capacity(chunk.len());
            for (year, term) in chunk {
                fetches.push(self.term_http(client, listing, year, term));
            }
            for ((year, term), result) in chunk.iter().zip(join_all(fetches).await) {
                match result {
                    Ok(body) => report.merge(grades::classify_term_response(&body, year, term)),
                    Err(e) => tracing::warn!(%year, %term, error = %e, "skipping term"),
                }
            }
        }
        report
    }

    async fn term_http(
        &self,
        client: &PortalClient,
        listing: &HttpListing,
        year: &str,
        term: &str,
    ) -> Result<String> {
        self.submit_http(
            client,
            listing,
            &[(controls::YEAR, year), (controls::TERM, term)],
        )
        .await
    }

    async fn historical_grades_browser(&self, ctx: &mut dyn RenderContext) -> Result<GradesReport> {
        let listing = self
            .open_listing(ctx, pages::HISTORICAL_GRADES, &by_name("select", controls::YEAR))
            .await?;
        // No year selector: plan over the fallback years.
        let html = listing.unwrap_or_default();
        let plan = grades::term_plan(
            &html,
            self.config.max_years,
            self.config.max_terms,
            chrono::Local::now().date_naive(),
        );
        tracing::info!(terms = plan.len(), "fetching historical grades in the browser");

        let listing_frame = Frame::named(frames::LISTING);
        let mut report = GradesReport::default();
        for (year, term) in &plan {
            let result = async {
                ctx.select_option(&listing_frame, &by_name("select", controls::YEAR), year)
                    .await?;
                ctx.select_option(&listing_frame, &by_name("select", controls::TERM), term)
                    .await?;
                let body = self
                    .submit_browser(ctx, self.config.timeouts.term_frame_ms)
                    .await?;
                Ok::<_, ScrapeError>(body)
            }
            .await;

            match result {
                Ok(body) => report.merge(grades::classify_term_response(&body, year, term)),
                Err(e) => tracing::warn!(%year, %term, error = %e, "skipping term"),
            }
        }
        Ok(report)
    }

    /// Navigate to a report page and wait for `ready` in the listing frame.
    /// `None` when the listing loaded but never showed `ready`.
    async fn open_listing(
        &self,
        ctx: &mut dyn RenderContext,
        page: &str,
        ready: &str,
    ) -> Result<Option<String>> {
        let url = self.config.page_url(page)?;
        ctx.navigate(url.as_str(), self.config.timeouts.navigation_ms)
            .await?;

        let listing = Frame::named(frames::LISTING);
        if !ctx
            .wait_for_element(&listing, ready, self.config.timeouts.element_ms)
            .await?
        {
            return Ok(None);
        }
        Ok(Some(ctx.html(&listing).await?))
    }

    /// Click the listing's submit button and read the reloaded result frame.
    ///
    /// The wait is sliced so that a dialog raised by the result page is
    /// accepted before it can stall the frame.
    async fn submit_browser(
        &self,
        ctx: &mut dyn RenderContext,
        timeout_ms: u64,
    ) -> Result<String, ScrapeError> {
        let listing = Frame::named(frames::LISTING);
        let result = Frame::named(frames::RESULT);

        dismiss_dialogs(ctx).await?;
        ctx.mark_frame_stale(&result).await?;
        ctx.click(&listing, &by_name("input", controls::SUBMIT))
            .await?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            dismiss_dialogs(ctx).await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = (remaining.as_millis() as u64).min(DIALOG_CHECK_MS);
            if ctx.wait_for_frame(&result, slice).await? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::ItemExtraction(format!(
                    "result frame did not reload within {timeout_ms}ms"
                )));
            }
        }
        Ok(ctx.html(&result).await?)
    }
}

/// Accept every dialog already open on the page.
async fn dismiss_dialogs(ctx: &dyn RenderContext) -> Result<()> {
    while let Some(message) = ctx.wait_for_dialog(0).await? {
        tracing::warn!(%message, "dismissed portal dialog");
    }
    Ok(())
}
