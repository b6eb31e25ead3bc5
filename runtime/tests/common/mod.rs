//! Scripted stand-ins for the browser and the classifier.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use captcha_vision::{CaptchaError, CaptchaResult, CaptchaSolver};
use portal_runtime::portal::{controls, frames, login, markers, pages};
use portal_runtime::renderer::{
    BrowserCookie, Frame, NavigationResult, RenderContext, Renderer,
};

pub const CORRECT_CODE: &str = "4821";
pub const PASSWORD: &str = "s3cret-pw";
pub const REJECTION: &str = "帳號或密碼錯誤";

/// How the fake portal behaves.
#[derive(Clone)]
pub struct PortalScript {
    pub password: String,
    /// Raise the explicit success dialog; otherwise log in silently.
    pub confirm_login: bool,
    pub rejection_dialog: String,
    /// 1-based login navigations on which the CAPTCHA never renders.
    pub captcha_missing_on: Vec<usize>,
    pub cookies: Vec<BrowserCookie>,
    pub user_agent: String,
    /// Listing frame documents by report page.
    pub listings: HashMap<&'static str, String>,
    /// Result frame documents by course code.
    pub details: HashMap<String, String>,
    /// Result frame documents by (year, term).
    pub terms: HashMap<(String, String), String>,
    /// Panic when navigating to a URL containing this.
    pub panic_on: Option<String>,
    /// Every navigation takes this long.
    pub navigate_delay_ms: u64,
    /// Dialog raised by each query result page. The result frame stays
    /// blocked until the dialog is accepted.
    pub result_dialog: Option<String>,
}

impl Default for PortalScript {
    fn default() -> Self {
        Self {
            password: PASSWORD.to_string(),
            confirm_login: true,
            rejection_dialog: REJECTION.to_string(),
            captcha_missing_on: Vec::new(),
            cookies: vec![
                cookie("ASPSESSIONIDCQTQ", "KFHNPLDBDEJ"),
                cookie("SID", "B1234"),
            ],
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) HeadlessChrome/131.0".to_string(),
            listings: HashMap::new(),
            details: HashMap::new(),
            terms: HashMap::new(),
            panic_on: None,
            navigate_delay_ms: 0,
            result_dialog: None,
        }
    }
}

pub fn cookie(name: &str, value: &str) -> BrowserCookie {
    BrowserCookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: "portal.test".to_string(),
        path: "/".to_string(),
    }
}

/// What the fake portal observed, shared across contexts.
#[derive(Debug, Default)]
pub struct Recorder {
    pub navigations: Vec<String>,
    pub login_navigations: usize,
    /// CAPTCHA codes submitted, in order.
    pub submissions: Vec<String>,
    pub contexts_opened: usize,
    pub closed: usize,
    /// Dialog texts accepted through `wait_for_dialog`, in order.
    pub dialogs: Vec<String>,
}

#[derive(Default)]
struct PageState {
    page: String,
    fills: HashMap<String, String>,
    pending_dialog: Option<String>,
    course: Option<String>,
    year: Option<String>,
    term: Option<String>,
    result: Option<String>,
    stale: bool,
}

/// A scripted browser context.
pub struct FakePortal {
    script: Arc<PortalScript>,
    recorder: Arc<Mutex<Recorder>>,
    state: Mutex<PageState>,
    /// Live-context counter of the renderer that opened this context.
    active: Option<Arc<AtomicUsize>>,
}

impl Drop for FakePortal {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl FakePortal {
    pub fn new(script: PortalScript) -> (Self, Arc<Mutex<Recorder>>) {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        (
            Self::with_recorder(Arc::new(script), Arc::clone(&recorder), None),
            recorder,
        )
    }

    fn with_recorder(
        script: Arc<PortalScript>,
        recorder: Arc<Mutex<Recorder>>,
        active: Option<Arc<AtomicUsize>>,
    ) -> Self {
        Self {
            script,
            recorder,
            state: Mutex::new(PageState::default()),
            active,
        }
    }

    fn listing_html(&self, page: &str) -> Option<&String> {
        self.script
            .listings
            .iter()
            .find(|(p, _)| page.ends_with(**p))
            .map(|(_, html)| html)
    }

    fn on_login_submit(&self, state: &mut PageState) {
        let code = state.fills.get(login::CODE).cloned().unwrap_or_default();
        self.recorder.lock().unwrap().submissions.push(code.clone());

        let password = state.fills.get(login::SECRET).cloned().unwrap_or_default();
        state.pending_dialog = if code != CORRECT_CODE {
            Some(format!("{}，請重新輸入", markers::CAPTCHA_ERROR))
        } else if password != self.script.password {
            Some(self.script.rejection_dialog.clone())
        } else if self.script.confirm_login {
            Some(markers::LOGIN_SUCCESS.to_string())
        } else {
            None
        };
    }

    fn on_query_submit(&self, state: &mut PageState) {
        let html = if state.page.ends_with(pages::SCORE_DETAIL) {
            state
                .course
                .as_ref()
                .and_then(|c| self.script.details.get(c))
        } else {
            match (&state.year, &state.term) {
                (Some(y), Some(t)) => self.script.terms.get(&(y.clone(), t.clone())),
                _ => None,
            }
        };
        if let Some(html) = html {
            state.result = Some(html.clone());
            state.stale = false;
            state.pending_dialog = self.script.result_dialog.clone();
        }
    }
}

/// `name="..."` / `value="..."` attribute value from a selector.
fn attr_in_selector<'a>(selector: &'a str, attr: &str) -> Option<&'a str> {
    let marker = format!("{attr}=\"");
    let start = selector.find(&marker)? + marker.len();
    let len = selector[start..].find('"')?;
    Some(&selector[start..start + len])
}

#[async_trait]
impl RenderContext for FakePortal {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        if self.script.navigate_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.navigate_delay_ms)).await;
        }
        if let Some(trigger) = &self.script.panic_on {
            if url.contains(trigger.as_str()) {
                panic!("scripted panic while loading {url}");
            }
        }
        {
            let mut rec = self.recorder.lock().unwrap();
            rec.navigations.push(url.to_string());
            if url.ends_with(pages::LOGIN) {
                rec.login_navigations += 1;
            }
        }
        *self.state.lock().unwrap() = PageState {
            page: url.to_string(),
            ..PageState::default()
        };
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn wait_for_element(&self, frame: &Frame, selector: &str, _timeout_ms: u64) -> Result<bool> {
        let page = self.state.lock().unwrap().page.clone();
        if frame.is_top() {
            if selector == login::CAPTCHA_IMAGE {
                let nav = self.recorder.lock().unwrap().login_navigations;
                return Ok(page.ends_with(pages::LOGIN)
                    && !self.script.captcha_missing_on.contains(&nav));
            }
            return Ok(page.ends_with(pages::LOGIN));
        }
        if frame == &Frame::named(frames::LISTING) {
            let Some(html) = self.listing_html(&page) else {
                return Ok(false);
            };
            let name = attr_in_selector(selector, "name").unwrap_or_default();
            return Ok(html.contains(&format!("name=\"{name}\"")));
        }
        Ok(false)
    }

    async fn screenshot_element(&self, frame: &Frame, _selector: &str) -> Result<Vec<u8>> {
        if !frame.is_top() {
            bail!("top frame only");
        }
        Ok(b"\x89PNG fake captcha".to_vec())
    }

    async fn fill(&self, _frame: &Frame, selector: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .fills
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, frame: &Frame, selector: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if frame.is_top() && selector == login::SUBMIT {
            self.on_login_submit(&mut state);
        } else if attr_in_selector(selector, "name") == Some(controls::COURSE) {
            let Some(code) = attr_in_selector(selector, "value") else {
                bail!("no course in {selector}");
            };
            state.course = Some(code.to_string());
        } else if attr_in_selector(selector, "name") == Some(controls::SUBMIT) {
            self.on_query_submit(&mut state);
        } else {
            bail!("nothing to click at {selector}");
        }
        Ok(())
    }

    async fn select_option(&self, _frame: &Frame, selector: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match attr_in_selector(selector, "name") {
            Some(controls::YEAR) => state.year = Some(value.to_string()),
            Some(controls::TERM) => state.term = Some(value.to_string()),
            _ => bail!("no selector {selector}"),
        }
        Ok(())
    }

    async fn wait_for_dialog(&self, _timeout_ms: u64) -> Result<Option<String>> {
        let dialog = self.state.lock().unwrap().pending_dialog.take();
        if let Some(text) = &dialog {
            self.recorder.lock().unwrap().dialogs.push(text.clone());
        }
        Ok(dialog)
    }

    async fn mark_frame_stale(&self, _frame: &Frame) -> Result<()> {
        self.state.lock().unwrap().stale = true;
        Ok(())
    }

    async fn wait_for_frame(&self, _frame: &Frame, timeout_ms: u64) -> Result<bool> {
        let ready = {
            let state = self.state.lock().unwrap();
            !state.stale && state.result.is_some() && state.pending_dialog.is_none()
        };
        if !ready {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
        }
        Ok(ready)
    }

    async fn html(&self, frame: &Frame) -> Result<String> {
        let state = self.state.lock().unwrap();
        if frame == &Frame::named(frames::LISTING) {
            if let Some(html) = self.listing_html(&state.page) {
                return Ok(html.clone());
            }
        }
        if frame == &Frame::named(frames::RESULT) {
            if let Some(html) = &state.result {
                return Ok(html.clone());
            }
        }
        bail!("frame {frame} is not available")
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.script.cookies.clone())
    }

    async fn user_agent(&self) -> Result<String> {
        Ok(self.script.user_agent.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.recorder.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Hands out [`FakePortal`] contexts sharing one recorder.
pub struct FakeRenderer {
    script: Arc<PortalScript>,
    pub recorder: Arc<Mutex<Recorder>>,
    active: Arc<AtomicUsize>,
}

impl FakeRenderer {
    pub fn new(script: PortalScript) -> Self {
        Self {
            script: Arc::new(script),
            recorder: Arc::new(Mutex::new(Recorder::default())),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.recorder.lock().unwrap().contexts_opened += 1;
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePortal::with_recorder(
            Arc::clone(&self.script),
            Arc::clone(&self.recorder),
            Some(Arc::clone(&self.active)),
        )))
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Returns scripted answers in order, then keeps answering `fallback`.
pub struct ScriptedSolver {
    answers: Mutex<VecDeque<CaptchaResult<String>>>,
    fallback: String,
    pub calls: AtomicUsize,
}

impl ScriptedSolver {
    pub fn new(answers: Vec<CaptchaResult<String>>, fallback: &str) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            fallback: fallback.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Wrong on the first `wrong` calls, right afterwards.
    pub fn wrong_then_right(wrong: usize) -> Self {
        Self::new(
            (0..wrong).map(|_| Ok("0000".to_string())).collect(),
            CORRECT_CODE,
        )
    }

    pub fn always_wrong() -> Self {
        Self::new(Vec::new(), "0000")
    }

    pub fn undecodable() -> CaptchaResult<String> {
        Err(CaptchaError::Decode("unsupported image format".to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CaptchaSolver for ScriptedSolver {
    fn solve(&self, _image: &[u8]) -> CaptchaResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
