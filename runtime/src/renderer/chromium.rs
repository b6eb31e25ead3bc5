//! Chromium-based renderer using chromiumoxide.
//!
//! Each context is a dedicated headless browser process; closing the
//! context shuts the process down. Every DevTools call made here is bounded
//! by a timeout, since an open JavaScript dialog stalls script evaluation.

use super::{BrowserCookie, Frame, NavigationResult, RenderContext, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Interval between polls while waiting on page state.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on a single script evaluation or DevTools command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    // 1. explicit flag / PORTAL_CHROMIUM_PATH
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.clone());
        }
    }
    if let Ok(p) = std::env::var("PORTAL_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Distribution packages
    for candidate in ["/usr/bin/chromium", "/usr/bin/google-chrome"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches one headless Chromium per context.
pub struct ChromiumRenderer {
    chrome_path: PathBuf,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Locate Chromium. The browser itself is started per context.
    pub fn new(explicit: Option<&PathBuf>) -> Result<Self> {
        let chrome_path = find_chromium(explicit)
            .context("Chromium not found. Set PORTAL_CHROMIUM_PATH or install chromium.")?;
        tracing::info!("using Chromium at {}", chrome_path.display());
        Ok(Self {
            chrome_path,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let config = BrowserConfig::builder()
            .chrome_executable(&self.chrome_path)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e).context("failed to create new page");
            }
        };

        let dialogs = match page.event_listener::<EventJavascriptDialogOpening>().await {
            Ok(dialogs) => dialogs,
            Err(e) => {
                handler_task.abort();
                return Err(e).context("failed to subscribe to dialog events");
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("browser context opened");

        Ok(Box::new(ChromiumContext {
            browser,
            handler_task,
            page,
            dialogs: Mutex::new(dialogs),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A dedicated browser process with a single page.
///
/// Dropping the context without [`RenderContext::close`] still releases its
/// slot; chromiumoxide kills the child process when the `Browser` drops.
pub struct ChromiumContext {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    dialogs: Mutex<EventStream<EventJavascriptDialogOpening>>,
    active_count: Arc<AtomicUsize>,
}

impl Drop for ChromiumContext {
    fn drop(&mut self) {
        self.handler_task.abort();
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!("browser context released");
    }
}

/// JSON-encode a string for interpolation into a script.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Expression for the window object of `frame`.
fn window_expr(frame: &Frame) -> String {
    let mut expr = String::from("window.top");
    for name in frame.path() {
        expr.push_str(&format!(".frames[{}]", js_string(name)));
    }
    expr
}

/// Expression for the document of `frame`.
fn document_expr(frame: &Frame) -> String {
    format!("{}.document", window_expr(frame))
}

/// Wrap `body` in an IIFE that yields `fallback` if it throws (e.g. the
/// frame does not exist yet).
fn guarded(body: &str, fallback: &str) -> String {
    format!("(() => {{ try {{ {body} }} catch (e) {{ return {fallback}; }} }})()")
}

impl ChromiumContext {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        self.eval_within(script, COMMAND_TIMEOUT).await
    }

    async fn eval_within<T: DeserializeOwned>(&self, script: String, limit: Duration) -> Result<T> {
        let result = tokio::time::timeout(limit, self.page.evaluate(script))
            .await
            .map_err(|_| anyhow::anyhow!("JS execution timed out after {}ms", limit.as_millis()))?
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    /// Poll a boolean script until it holds or the deadline passes. Each
    /// evaluation only gets the time left before the deadline.
    async fn poll_until(&self, script: String, timeout_ms: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(POLL_INTERVAL);
            if self
                .eval_within::<bool>(script.clone(), remaining)
                .await
                .unwrap_or(false)
            {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();
        let page = &self.page;

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            page.url().await
        })
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(final_url)) => Ok(NavigationResult {
                final_url: final_url.unwrap_or_else(|| url.to_string()),
                load_time_ms,
            }),
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn wait_for_element(
        &self,
        frame: &Frame,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<bool> {
        let body = format!(
            "return !!{}.querySelector({});",
            document_expr(frame),
            js_string(selector)
        );
        self.poll_until(guarded(&body, "false"), timeout_ms).await
    }

    async fn screenshot_element(&self, frame: &Frame, selector: &str) -> Result<Vec<u8>> {
        if !frame.is_top() {
            bail!("element screenshots are only supported in the top-level document");
        }
        let capture = async {
            let element = self
                .page
                .find_element(selector)
                .await
                .with_context(|| format!("element not found: {selector}"))?;
            element
                .screenshot(CaptureScreenshotFormat::Png)
                .await
                .with_context(|| format!("failed to capture {selector}"))
        };
        tokio::time::timeout(COMMAND_TIMEOUT, capture)
            .await
            .with_context(|| format!("capturing {selector} timed out"))?
    }

    async fn fill(&self, frame: &Frame, selector: &str, value: &str) -> Result<()> {
        let body = format!(
            "const el = {}.querySelector({}); if (!el) return false; \
             el.value = {}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true;",
            document_expr(frame),
            js_string(selector),
            js_string(value)
        );
        // The value never goes into the error context.
        if !self.eval::<bool>(guarded(&body, "false")).await? {
            bail!("cannot fill {selector} in frame {frame}");
        }
        Ok(())
    }

    async fn click(&self, frame: &Frame, selector: &str) -> Result<()> {
        let body = format!(
            "const el = {}.querySelector({}); if (!el) return false; \
             setTimeout(() => el.click(), 0); return true;",
            document_expr(frame),
            js_string(selector)
        );
        if !self.eval::<bool>(guarded(&body, "false")).await? {
            bail!("cannot click {selector} in frame {frame}");
        }
        Ok(())
    }

    async fn select_option(&self, frame: &Frame, selector: &str, value: &str) -> Result<()> {
        let body = format!(
            "const el = {}.querySelector({}); if (!el) return false; \
             el.value = {}; el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return el.value === {};",
            document_expr(frame),
            js_string(selector),
            js_string(value),
            js_string(value)
        );
        if !self.eval::<bool>(guarded(&body, "false")).await? {
            bail!("cannot select '{value}' in {selector} (frame {frame})");
        }
        Ok(())
    }

    async fn wait_for_dialog(&self, timeout_ms: u64) -> Result<Option<String>> {
        let mut dialogs = self.dialogs.lock().await;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), dialogs.next()).await {
            Ok(Some(event)) => {
                let message = event.message.clone();
                let accepted = tokio::time::timeout(
                    COMMAND_TIMEOUT,
                    self.page.execute(HandleJavaScriptDialogParams::new(true)),
                )
                .await;
                // The page may have closed the dialog on its own already.
                if !matches!(accepted, Ok(Ok(_))) {
                    tracing::debug!("dialog was gone before it could be accepted");
                }
                Ok(Some(message))
            }
            Ok(None) => bail!("dialog event stream closed"),
            Err(_) => Ok(None),
        }
    }

    async fn mark_frame_stale(&self, frame: &Frame) -> Result<()> {
        let body = format!(
            "const d = {}; if (d) d.__portalStale = true; return true;",
            document_expr(frame)
        );
        // A frame that does not exist yet has nothing to mark.
        let _ = self.eval::<bool>(guarded(&body, "false")).await?;
        Ok(())
    }

    async fn wait_for_frame(&self, frame: &Frame, timeout_ms: u64) -> Result<bool> {
        let body = format!(
            "const d = {}; return !!d && d.__portalStale !== true && d.readyState === 'complete';",
            document_expr(frame)
        );
        self.poll_until(guarded(&body, "false"), timeout_ms).await
    }

    async fn html(&self, frame: &Frame) -> Result<String> {
        let body = format!(
            "const d = {}; return d && d.documentElement ? d.documentElement.outerHTML : null;",
            document_expr(frame)
        );
        let html: Option<String> = self.eval(guarded(&body, "null")).await?;
        html.with_context(|| format!("frame {frame} is not available"))
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = tokio::time::timeout(COMMAND_TIMEOUT, self.page.get_cookies())
            .await
            .context("reading browser cookies timed out")?
            .context("failed to read browser cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn user_agent(&self) -> Result<String> {
        self.eval("navigator.userAgent".to_string()).await
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let _ = tokio::time::timeout(COMMAND_TIMEOUT, self.page.clone().close()).await;
        let closed = tokio::time::timeout(COMMAND_TIMEOUT, self.browser.close()).await;
        let _ = tokio::time::timeout(COMMAND_TIMEOUT, self.browser.wait()).await;
        tracing::debug!("browser context closed");

        // Drop aborts the handler and frees the slot.
        match closed {
            Ok(result) => result.map(|_| ()).context("failed to close browser"),
            Err(_) => bail!("closing the browser timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_expressions() {
        assert_eq!(document_expr(&Frame::top()), "window.top.document");
        assert_eq!(
            document_expr(&Frame::named("mtn_down2")),
            r#"window.top.frames["mtn_down2"].document"#
        );
        assert_eq!(
            window_expr(&Frame::named("a").child("b\"c")),
            r#"window.top.frames["a"].frames["b\"c"]"#
        );
    }

    #[test]
    fn test_guarded_wraps_in_iife() {
        let script = guarded("return 1;", "null");
        assert!(script.starts_with("(() => { try { return 1; }"));
        assert!(script.ends_with("catch (e) { return null; } })()"));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_frames_and_dialogs() {
        let renderer = ChromiumRenderer::new(None).expect("failed to create renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.navigate(
            "data:text/html,<input name=q><button onclick=\"alert('hi')\">go</button>",
            10000,
        )
        .await
        .expect("navigation failed");

        let top = Frame::top();
        assert!(ctx
            .wait_for_element(&top, "input[name=q]", 2000)
            .await
            .unwrap());
        ctx.fill(&top, "input[name=q]", "abc").await.unwrap();
        ctx.click(&top, "button").await.unwrap();
        assert_eq!(
            ctx.wait_for_dialog(2000).await.unwrap().as_deref(),
            Some("hi")
        );
        assert!(ctx.wait_for_dialog(300).await.unwrap().is_none());

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_waits_stay_bounded_under_open_dialog() {
        let renderer = ChromiumRenderer::new(None).expect("failed to create renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");
        ctx.navigate(
            "data:text/html,<button onclick=\"alert('blocked')\">go</button>",
            10000,
        )
        .await
        .expect("navigation failed");

        let top = Frame::top();
        ctx.click(&top, "button").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The alert stalls evaluation; the wait still ends on its own deadline.
        let start = Instant::now();
        assert!(!ctx.wait_for_element(&top, "div.never", 800).await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(3));

        assert_eq!(
            ctx.wait_for_dialog(0).await.unwrap().as_deref(),
            Some("blocked")
        );

        assert_eq!(renderer.active_contexts(), 1);
        drop(ctx);
        assert_eq!(renderer.active_contexts(), 0);
    }
}
