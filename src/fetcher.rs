//! File fetcher seam and the HTTP drive adapter
//!
//! [`FileFetcher`] turns a [`Locator`] into a byte stream. [`HttpDriveFetcher`]
//! implements it against a direct-download endpoint and classifies every
//! failure as transient or permanent so the downloader knows whether to retry.

use crate::config::FetcherConfig;
use crate::error::{Error, FetchFailure, Result};
use crate::types::Locator;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use regex::Regex;
use reqwest::StatusCode;

/// Stream of body chunks; a chunk error ends the stream
pub type ByteStream = BoxStream<'static, std::result::Result<Vec<u8>, FetchFailure>>;

/// A resolved file, ready to be read
pub struct FetchedFile {
    /// File name announced by the host, if any
    pub file_name: Option<String>,
    /// Announced content length, if any
    pub content_length: Option<u64>,
    /// File content
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedFile")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Capability to retrieve a part's bytes from the cloud drive
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Resolve `locator` into a byte stream
    async fn resolve(&self, locator: &Locator) -> std::result::Result<FetchedFile, FetchFailure>;
}

/// [`FileFetcher`] for drive direct-download links over HTTP
pub struct HttpDriveFetcher {
    client: reqwest::Client,
    endpoint: url::Url,
    content_disposition: Regex,
}

impl HttpDriveFetcher {
    /// Build a fetcher from configuration
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let endpoint = url::Url::parse(&config.download_endpoint).map_err(|e| Error::Config {
            message: format!("invalid download endpoint: {}", e),
            key: Some("fetcher.download_endpoint".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        let content_disposition = Regex::new(
            r#"(?i)filename\*\s*=\s*[\w-]*'[\w-]*'(?P<encoded>[^;]+)|filename\s*=\s*"?(?P<plain>[^";]+)"?"#,
        )
        .map_err(|e| Error::Other(format!("invalid content-disposition pattern: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            content_disposition,
        })
    }

    /// Direct-download URL for a file id
    pub fn download_url(&self, locator: &Locator) -> url::Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("export", "download")
            .append_pair("id", &locator.file_id);
        url
    }

    /// File name from a `Content-Disposition` header value
    ///
    /// The RFC 5987 `filename*` form wins over plain `filename`.
    fn file_name_from_disposition(&self, value: &str) -> Option<String> {
        let mut plain = None;
        for caps in self.content_disposition.captures_iter(value) {
            if let Some(encoded) = caps.name("encoded") {
                let decoded = url::form_urlencoded::parse(encoded.as_str().trim().as_bytes())
                    .next()
                    .map(|(name, _)| name.into_owned());
                if let Some(name) = decoded.filter(|n| !n.is_empty()) {
                    return Some(name);
                }
            } else if plain.is_none()
                && let Some(name) = caps.name("plain")
            {
                plain = Some(name.as_str().trim().to_string());
            }
        }
        plain.filter(|n| !n.is_empty())
    }
}

#[async_trait]
impl FileFetcher for HttpDriveFetcher {
    async fn resolve(&self, locator: &Locator) -> std::result::Result<FetchedFile, FetchFailure> {
        let url = self.download_url(locator);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &locator.file_id));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("text/html"));
        if is_html {
            // Drive serves an HTML page for quota, virus-scan and permission interstitials
            return Err(FetchFailure::Permanent(format!(
                "file {} returned an HTML page instead of content",
                locator.file_id
            )));
        }

        let file_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| self.file_name_from_disposition(v));
        let content_length = response.content_length();

        tracing::debug!(
            file_id = %locator.file_id,
            file_name = ?file_name,
            content_length = ?content_length,
            "Resolved drive file"
        );

        let body = futures::stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk.to_vec()), Some(response))),
                Ok(None) => None,
                Err(e) => Some((
                    Err(FetchFailure::Transient(format!("body read failed: {}", e))),
                    None,
                )),
            }
        })
        .boxed();

        Ok(FetchedFile {
            file_name,
            content_length,
            body,
        })
    }
}

fn classify_request_error(e: &reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Transient(format!("request timed out: {}", e))
    } else if e.is_connect() || e.is_request() {
        FetchFailure::Transient(format!("connection failed: {}", e))
    } else {
        FetchFailure::Permanent(format!("request failed: {}", e))
    }
}

fn classify_status(status: StatusCode, file_id: &str) -> FetchFailure {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            FetchFailure::Transient(format!("HTTP {} for file {}", status, file_id))
        }
        s if s.is_server_error() => {
            FetchFailure::Transient(format!("HTTP {} for file {}", status, file_id))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchFailure::Permanent(format!("access denied to file {} (HTTP {})", file_id, status))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchFailure::Permanent(format!(
            "file {} not found or link expired (HTTP {})",
            file_id, status
        )),
        _ => FetchFailure::Permanent(format!("HTTP {} for file {}", status, file_id)),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn locator(id: &str) -> Locator {
        Locator {
            file_id: id.to_string(),
            url: format!("https://drive.google.com/file/d/{id}/view"),
        }
    }

    fn fetcher_for(server: &MockServer) -> HttpDriveFetcher {
        HttpDriveFetcher::new(&FetcherConfig {
            download_endpoint: format!("{}/uc", server.uri()),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    async fn serve(status: u16, template: impl FnOnce(ResponseTemplate) -> ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uc"))
            .and(query_param("export", "download"))
            .and(query_param("id", "abc"))
            .respond_with(template(ResponseTemplate::new(status)))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_resolve_streams_body_and_reads_metadata() {
        let server = serve(200, |t| {
            t.insert_header(
                "Content-Disposition",
                "attachment; filename=\"GameX.part1.rar\"",
            )
            .set_body_bytes(b"hello drive".to_vec())
        })
        .await;

        let file = fetcher_for(&server).resolve(&locator("abc")).await.unwrap();
        assert_eq!(file.file_name.as_deref(), Some("GameX.part1.rar"));
        assert_eq!(file.content_length, Some(11));

        let chunks: Vec<Vec<u8>> = file.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello drive");
    }

    #[tokio::test]
    async fn test_rfc5987_file_name_wins() {
        let server = serve(200, |t| {
            t.insert_header(
                "Content-Disposition",
                "attachment; filename=\"fallback.bin\"; filename*=UTF-8''Game%20X.7z.001",
            )
            .set_body_bytes(b"x".to_vec())
        })
        .await;

        let file = fetcher_for(&server).resolve(&locator("abc")).await.unwrap();
        assert_eq!(file.file_name.as_deref(), Some("Game X.7z.001"));
    }

    #[tokio::test]
    async fn test_missing_file_is_permanent() {
        let server = serve(404, |t| t).await;
        let err = fetcher_for(&server).resolve(&locator("abc")).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Permanent(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_access_denied_is_permanent() {
        let server = serve(403, |t| t).await;
        let err = fetcher_for(&server).resolve(&locator("abc")).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Permanent(_)));
        assert!(err.reason().contains("access denied"));
    }

    #[tokio::test]
    async fn test_rate_limit_and_server_errors_are_transient() {
        for status in [429, 503, 500, 408] {
            let server = serve(status, |t| t).await;
            let err = fetcher_for(&server).resolve(&locator("abc")).await.unwrap_err();
            assert!(
                matches!(err, FetchFailure::Transient(_)),
                "HTTP {status} should be transient, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_html_interstitial_is_permanent() {
        let server = serve(200, |t| {
            t.set_body_raw("<html>quota exceeded</html>", "text/html; charset=utf-8")
        })
        .await;

        let err = fetcher_for(&server).resolve(&locator("abc")).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let fetcher = HttpDriveFetcher::new(&FetcherConfig {
            download_endpoint: "http://127.0.0.1:1/uc".to_string(),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let err = fetcher.resolve(&locator("abc")).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Transient(_)), "got {err:?}");
    }

    #[test]
    fn test_download_url() {
        let fetcher = HttpDriveFetcher::new(&FetcherConfig::default()).unwrap();
        let url = fetcher.download_url(&locator("1AbC"));
        assert_eq!(
            url.as_str(),
            "https://drive.google.com/uc?export=download&id=1AbC"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let result = HttpDriveFetcher::new(&FetcherConfig {
            download_endpoint: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
