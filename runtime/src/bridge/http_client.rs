//! Async HTTP client for the bridged portal session.
//!
//! Not a browser, just HTTP requests carrying the browser's cookies and
//! identity. Retries on 5xx, backs off on 429, and decodes bodies with the
//! declared charset or the portal's default. Form data goes back out in the
//! charset of the page that held the form.

use anyhow::{bail, Result};
use encoding_rs::Encoding;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::form_urlencoded;

/// Response from a portal request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Decoded response body.
    pub body: String,
    /// Charset the body was decoded with.
    pub charset: &'static Encoding,
}

impl HttpResponse {
    /// Fail on a non-2xx status.
    pub fn ensure_success(self) -> Result<Self> {
        if !(200..300).contains(&self.status) {
            bail!("{} returned HTTP {}", self.url, self.status);
        }
        Ok(self)
    }
}

/// HTTP client sharing a cookie jar with the session it was bridged from.
#[derive(Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    timeout_ms: u64,
    default_charset: &'static Encoding,
}

impl PortalClient {
    pub(crate) fn new(
        client: reqwest::Client,
        timeout_ms: u64,
        default_charset: &'static Encoding,
    ) -> Self {
        Self {
            client,
            timeout_ms,
            default_charset,
        }
    }

    /// Perform a GET request with retry on 5xx and backoff on 429.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        let mut retries = 0u32;
        let max_retries = 2;

        loop {
            let resp = self
                .client
                .get(url)
                .timeout(Duration::from_millis(self.timeout_ms))
                .send()
                .await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();

                    // Retry on 5xx
                    if status >= 500 && retries < max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        let delay = Duration::from_secs(retry_after.min(10));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return self.read(url, r).await;
                }
                Err(e) => {
                    if retries < max_retries && !e.is_timeout() {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// POST url-encoded form data once, encoded in `charset`. Form posts are
    /// not retried: the portal keys its result frame on the last submission.
    pub async fn post_form(
        &self,
        url: &str,
        form_fields: &[(String, String)],
        charset: &'static Encoding,
        extra_headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");

        for (name, value) in extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let r = builder
            .body(encode_form(form_fields, charset))
            .send()
            .await?;
        self.read(url, r).await
    }

    async fn read(&self, url: &str, r: reqwest::Response) -> Result<HttpResponse> {
        let status = r.status().as_u16();
        let final_url = r.url().to_string();
        let charset = r
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(declared_charset)
            .unwrap_or(self.default_charset);
        let bytes = r.bytes().await?;
        let (body, _, malformed) = charset.decode(&bytes);
        if malformed {
            tracing::debug!(%url, charset = charset.name(), "body had undecodable bytes");
        }

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            body: body.into_owned(),
            charset,
        })
    }
}

/// The charset named by a `Content-Type` header, if it is one we know.
fn declared_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches('"').as_bytes())
    })
}

/// `application/x-www-form-urlencoded` serialization with names and values
/// encoded in `charset`, as a browser submits a form from a page in that
/// charset. Characters the charset cannot represent become numeric
/// character references.
pub fn encode_form(fields: &[(String, String)], charset: &'static Encoding) -> String {
    let encode = |text: &str| -> String {
        let (bytes, _, _) = charset.encode(text);
        form_urlencoded::byte_serialize(&bytes).collect()
    };
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", encode(name), encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_success() {
        let ok = HttpResponse {
            url: "https://portal.test/a".to_string(),
            final_url: "https://portal.test/a".to_string(),
            status: 200,
            body: String::new(),
            charset: encoding_rs::UTF_8,
        };
        assert!(ok.clone().ensure_success().is_ok());

        let missing = HttpResponse { status: 404, ..ok };
        let err = missing.ensure_success().unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_form_is_encoded_in_page_charset() {
        let data = fields(&[("NAME", "王小明"), ("CRSNO", "A101"), ("B1", "查詢")]);
        assert_eq!(
            encode_form(&data, encoding_rs::BIG5),
            "NAME=%A4%FD%A4p%A9%FA&CRSNO=A101&B1=%ACd%B8%DF"
        );
        assert_eq!(
            encode_form(&data, encoding_rs::UTF_8),
            "NAME=%E7%8E%8B%E5%B0%8F%E6%98%8E&CRSNO=A101&B1=%E6%9F%A5%E8%A9%A2"
        );
    }

    #[test]
    fn test_form_encoding_escapes_reserved_bytes() {
        let data = fields(&[("q", "a b&c=d"), ("empty", "")]);
        assert_eq!(
            encode_form(&data, encoding_rs::BIG5),
            "q=a+b%26c%3Dd&empty="
        );
    }

    #[test]
    fn test_declared_charset() {
        assert_eq!(
            declared_charset("text/html; charset=big5"),
            Some(encoding_rs::BIG5)
        );
        assert_eq!(
            declared_charset(r#"text/html;Charset="UTF-8""#),
            Some(encoding_rs::UTF_8)
        );
        assert_eq!(declared_charset("text/html"), None);
        assert_eq!(declared_charset("text/html; charset=nonsense"), None);
    }
}
