//! Runtime configuration.
//!
//! Every setting resolves in the same order: explicit CLI flag, then
//! environment variable, then built-in default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

use crate::portal::DEFAULT_BASE_URL;

/// Login attempts before giving up on the CAPTCHA.
pub const MAX_ATTEMPTS: u32 = 5;

/// How reports are pulled once the session is authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// POST forms through the bridged HTTP client; fall back to the browser
    /// when the listing cannot be fetched.
    Http,
    /// Drive the browser through the frames for every item.
    Browser,
}

impl FromStr for ExtractionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "browser" => Ok(Self::Browser),
            other => bail!("unknown extraction mode '{other}' (expected http or browser)"),
        }
    }
}

/// Bounded waits, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub navigation_ms: u64,
    pub element_ms: u64,
    /// How long to wait for a post-submit dialog before assuming success.
    pub dialog_ms: u64,
    /// Result frame reload after a course query.
    pub frame_ms: u64,
    /// Result frame reload after a term query.
    pub term_frame_ms: u64,
    pub http_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 15_000,
            element_ms: 5_000,
            dialog_ms: 2_000,
            frame_ms: 5_000,
            term_frame_ms: 3_000,
            http_ms: 10_000,
        }
    }
}

/// Portal runtime configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub model_path: Option<PathBuf>,
    pub chromium_path: Option<PathBuf>,
    pub extraction_mode: ExtractionMode,
    /// Concurrent HTTP fetches per report. 1 keeps requests strictly sequential.
    pub fetch_concurrency: usize,
    /// Browsers allowed to run at once across all requests.
    pub max_sessions: usize,
    pub max_attempts: u32,
    /// Academic years taken from the year selector.
    pub max_years: usize,
    /// Terms taken from the term selector.
    pub max_terms: usize,
    /// Charset assumed for HTTP responses that do not declare one.
    pub default_charset: String,
    pub timeouts: Timeouts,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model_path: None,
            chromium_path: None,
            extraction_mode: ExtractionMode::Http,
            fetch_concurrency: 1,
            max_sessions: 2,
            max_attempts: MAX_ATTEMPTS,
            max_years: 3,
            max_terms: 2,
            default_charset: "big5".to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl PortalConfig {
    /// Build a configuration from `PORTAL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PORTAL_BASE_URL") {
            config.base_url = url;
        }
        config.model_path = resolve_model_path(None);
        if let Ok(p) = std::env::var("PORTAL_CHROMIUM_PATH") {
            config.chromium_path = Some(PathBuf::from(p));
        }
        if let Ok(mode) = std::env::var("PORTAL_EXTRACTION_MODE") {
            config.extraction_mode = mode.parse()?;
        }
        if let Ok(n) = std::env::var("PORTAL_FETCH_CONCURRENCY") {
            config.fetch_concurrency = parse_positive("PORTAL_FETCH_CONCURRENCY", &n)?;
        }
        if let Ok(n) = std::env::var("PORTAL_MAX_SESSIONS") {
            config.max_sessions = parse_positive("PORTAL_MAX_SESSIONS", &n)?;
        }
        if let Ok(charset) = std::env::var("PORTAL_CHARSET") {
            config.default_charset = charset;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a request unable to run.
    pub fn validate(&self) -> Result<()> {
        self.base()?;
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.fetch_concurrency == 0 || self.max_sessions == 0 {
            bail!("concurrency limits must be at least 1");
        }
        if encoding_rs::Encoding::for_label(self.default_charset.as_bytes()).is_none() {
            bail!("unknown charset '{}'", self.default_charset);
        }
        Ok(())
    }

    /// Portal root as a URL, always ending in `/` so pages join beneath it.
    pub fn base(&self) -> Result<Url> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).with_context(|| format!("invalid portal base URL '{}'", self.base_url))
    }

    /// Absolute URL of a portal page.
    pub fn page_url(&self, page: &str) -> Result<Url> {
        self.base()?
            .join(page)
            .with_context(|| format!("cannot resolve portal page '{page}'"))
    }
}

/// Resolve the classifier model path.
pub fn resolve_model_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var("PORTAL_MODEL") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_model = PathBuf::from(captcha_vision::MODEL_FILENAME);
    if cwd_model.exists() {
        return Some(cwd_model);
    }

    dirs::home_dir().map(|home| {
        home.join(".portal")
            .join("models")
            .join(captcha_vision::MODEL_FILENAME)
    })
}

/// Port for the HTTP service: explicit flag, then `PORT`, then 10000.
pub fn resolve_port(explicit: Option<u16>) -> u16 {
    explicit
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(10_000)
}

fn parse_positive(name: &str, raw: &str) -> Result<usize> {
    let n: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a positive integer"))?;
    if n == 0 {
        bail!("{name} must be at least 1");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_urls_join_under_base() {
        let config = PortalConfig {
            base_url: "https://portal.example.edu/scoreqry".to_string(),
            ..PortalConfig::default()
        };
        assert_eq!(
            config.page_url("sco_query_login.asp").unwrap().as_str(),
            "https://portal.example.edu/scoreqry/sco_query_login.asp"
        );
        assert_eq!(
            config
                .page_url(crate::portal::pages::SCORE_DETAIL)
                .unwrap()
                .as_str(),
            "https://portal.example.edu/scoreqry/sco_query.asp?action=700&KIND=1&LANGS=cht"
        );
    }

    #[test]
    fn test_extraction_mode_parse() {
        assert_eq!("HTTP".parse::<ExtractionMode>().unwrap(), ExtractionMode::Http);
        assert_eq!(
            " browser ".parse::<ExtractionMode>().unwrap(),
            ExtractionMode::Browser
        );
        assert!("selenium".parse::<ExtractionMode>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(PortalConfig::default().validate().is_ok());

        let bad_url = PortalConfig {
            base_url: "not a url".to_string(),
            ..PortalConfig::default()
        };
        assert!(bad_url.validate().is_err());

        let no_attempts = PortalConfig {
            max_attempts: 0,
            ..PortalConfig::default()
        };
        assert!(no_attempts.validate().is_err());

        let bad_charset = PortalConfig {
            default_charset: "not-a-charset".to_string(),
            ..PortalConfig::default()
        };
        assert!(bad_charset.validate().is_err());
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("X", " 4 ").unwrap(), 4);
        assert!(parse_positive("X", "0").is_err());
        assert!(parse_positive("X", "-1").is_err());
    }

    #[test]
    fn test_explicit_model_path_wins() {
        assert_eq!(
            resolve_model_path(Some("/opt/model.onnx")),
            Some(PathBuf::from("/opt/model.onnx"))
        );
    }

    #[test]
    fn test_resolved_path_to_absent_model_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(captcha_vision::MODEL_FILENAME);
        let resolved = resolve_model_path(missing.to_str()).unwrap();
        assert_eq!(resolved, missing);

        let classifier = captcha_vision::CaptchaClassifier::new(Some(&resolved)).unwrap();
        assert!(!classifier.has_model());
        assert_eq!(classifier.model_path(), missing.as_path());
    }
}
