//! Renderer abstraction for browser-driven portal flows.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). Every element
//! operation names the [`Frame`] it targets; there is no "current frame".

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;

/// Result of navigating to a URL.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Path from the top-level document to a (possibly nested) named frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    path: Vec<String>,
}

impl Frame {
    /// The top-level document.
    pub fn top() -> Self {
        Self::default()
    }

    /// A frame directly below the top-level document.
    pub fn named(name: &str) -> Self {
        Self {
            path: vec![name.to_string()],
        }
    }

    /// A frame nested inside this one.
    pub fn child(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self { path }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn is_top(&self) -> bool {
        self.path.is_empty()
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str("top")
        } else {
            f.write_str(&self.path.join("/"))
        }
    }
}

/// A cookie as held by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// A browser engine that hands out isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new, exclusively owned browser context.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) driven through the portal.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate the top-level document to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Wait until `selector` matches inside `frame`. `false` on timeout.
    async fn wait_for_element(&self, frame: &Frame, selector: &str, timeout_ms: u64)
        -> Result<bool>;
    /// PNG screenshot of the first element matching `selector`.
    async fn screenshot_element(&self, frame: &Frame, selector: &str) -> Result<Vec<u8>>;
    /// Replace the value of an input.
    async fn fill(&self, frame: &Frame, selector: &str, value: &str) -> Result<()>;
    /// Click an element. The click is dispatched after the call returns, so a
    /// dialog raised by the click cannot block it.
    async fn click(&self, frame: &Frame, selector: &str) -> Result<()>;
    /// Select the option with the given value in a `<select>`.
    async fn select_option(&self, frame: &Frame, selector: &str, value: &str) -> Result<()>;
    /// Wait for a JavaScript dialog, accept it and return its text.
    /// `None` when no dialog opened within the timeout.
    async fn wait_for_dialog(&self, timeout_ms: u64) -> Result<Option<String>>;
    /// Tag the frame's current document so a reload can be detected.
    async fn mark_frame_stale(&self, frame: &Frame) -> Result<()>;
    /// Wait until the frame holds a fully loaded, untagged document.
    /// `false` on timeout.
    async fn wait_for_frame(&self, frame: &Frame, timeout_ms: u64) -> Result<bool>;
    /// Serialized HTML of the frame's document.
    async fn html(&self, frame: &Frame) -> Result<String>;
    /// All cookies visible to this context.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;
    /// The browser's `User-Agent` string.
    async fn user_agent(&self) -> Result<String>;
    /// Close this context and release the browser behind it.
    async fn close(self: Box<Self>) -> Result<()>;
}
