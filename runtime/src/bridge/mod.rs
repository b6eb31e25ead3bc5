//! Browser-to-HTTP session hand-off.
//!
//! After login the browser holds the portal's session cookies. [`bridge`]
//! copies them, together with the browser's `User-Agent`, into a reqwest
//! client so reports can be fetched without driving the browser.

pub mod http_client;

pub use http_client::{HttpResponse, PortalClient};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use reqwest::cookie::{CookieStore, Jar};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::AuthenticatedSession;
use crate::config::PortalConfig;
use crate::renderer::{BrowserCookie, RenderContext};

/// Portal cookies and client identity, usable by a plain HTTP client.
pub struct SessionContext {
    jar: Arc<Jar>,
    origin: Url,
    user_agent: String,
    client: PortalClient,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("origin", &self.origin.as_str())
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Copy the authenticated browser session into an HTTP client.
///
/// Requires proof of login. Reads cookies over DevTools; sends nothing to
/// the portal.
pub async fn bridge(
    _session: &AuthenticatedSession,
    ctx: &dyn RenderContext,
    config: &PortalConfig,
) -> Result<SessionContext> {
    let cookies = ctx.cookies().await?;
    let user_agent = ctx.user_agent().await?;
    let session = SessionContext::from_cookies(&cookies, &user_agent, config)?;
    tracing::debug!(cookies = cookies.len(), "session bridged to HTTP client");
    Ok(session)
}

impl SessionContext {
    /// Build a session from raw browser cookies.
    ///
    /// Cookies are scoped to the portal origin with `Path=/`, so two browser
    /// cookies sharing a name collapse into the last one read. Each collapsed
    /// name is logged.
    pub fn from_cookies(
        cookies: &[BrowserCookie],
        user_agent: &str,
        config: &PortalConfig,
    ) -> Result<Self> {
        let origin = config.base()?;
        let charset = Encoding::for_label(config.default_charset.as_bytes())
            .with_context(|| format!("unknown charset '{}'", config.default_charset))?;

        for name in repeated_names(cookies) {
            tracing::warn!(
                cookie = name,
                "browser holds several cookies with this name, only the last is bridged"
            );
        }

        let jar = Arc::new(Jar::default());
        for cookie in cookies {
            jar.add_cookie_str(&format!("{}={}; Path=/", cookie.name, cookie.value), &origin);
        }

        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(user_agent)
            .timeout(Duration::from_millis(config.timeouts.http_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("failed to build bridged HTTP client")?;

        Ok(Self {
            jar,
            origin,
            user_agent: user_agent.to_string(),
            client: PortalClient::new(client, config.timeouts.http_ms, charset),
        })
    }

    /// Name/value pairs the jar will send to the portal, sorted by name.
    pub fn cookie_pairs(&self) -> Vec<(String, String)> {
        let Some(header) = self.jar.cookies(&self.origin) else {
            return Vec::new();
        };
        let Ok(header) = header.to_str() else {
            return Vec::new();
        };

        let mut pairs: Vec<(String, String)> = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        pairs.sort();
        pairs
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Cloneable client handle carrying the session.
    pub fn client(&self) -> &PortalClient {
        &self.client
    }
}

/// Cookie names that occur more than once, in first-repeat order.
fn repeated_names(cookies: &[BrowserCookie]) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut repeated = Vec::new();
    for cookie in cookies {
        if !seen.insert(cookie.name.as_str()) && !repeated.contains(&cookie.name.as_str()) {
            repeated.push(cookie.name.as_str());
        }
    }
    repeated
}
