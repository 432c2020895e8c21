use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ScraperConfig;

/// Case-insensitive substrings that mark a response as an anti-bot challenge
/// rather than real content.
const BLOCK_INDICATORS: &[&str] = &[
    "captcha",
    "cloudflare",
    "access denied",
    "blocked",
    "rate limit",
    "bot detected",
    "unusual traffic",
    "robot check",
];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("blocked by anti-bot protection: {url}")]
    Blocked { url: String },

    #[error("empty response body from {url}")]
    EmptyBody { url: String },
}

impl FetchError {
    /// Transient failures worth another attempt. A detected block is not
    /// transient and is never retried within the same call.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Blocked { .. } | FetchError::EmptyBody { .. } => false,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, FetchError::Blocked { .. })
    }
}

/// Per-request retry state, passed down the call chain instead of living in a
/// shared map keyed by URL.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryContext {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Records a failed attempt. Returns the backoff to sleep before the next
    /// one (`2^attempt * base`), or `None` when attempts are exhausted.
    pub fn backoff(&mut self, base_delay_ms: u64) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }
        Some(Duration::from_millis(
            2u64.saturating_pow(self.attempt) * base_delay_ms,
        ))
    }
}

/// Issues one logical "fetch a product page" with browser-mimicking headers,
/// bounded redirects and exponential-backoff retries.
pub struct PageFetcher {
    client: reqwest::Client,
    retry_attempts: u32,
    retry_base_delay_ms: u64,
}

impl PageFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .redirect(Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            retry_attempts: config.retry_attempts,
            retry_base_delay_ms: config.retry_base_delay_ms,
        })
    }

    /// Fetch a page body, retrying transient failures with exponential
    /// backoff. Non-retryable failures propagate immediately.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut retry = RetryContext::new(self.retry_attempts);

        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    if retry.attempt > 0 {
                        debug!(url, attempts = retry.attempt + 1, "fetch recovered after retry");
                    }
                    return Ok(body);
                }
                Err(err) if err.is_retryable() => match retry.backoff(self.retry_base_delay_ms) {
                    Some(delay) => {
                        warn!(
                            url,
                            attempt = retry.attempt,
                            max = retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying fetch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();

        if status >= 400 {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        let lowered = body.to_lowercase();
        if BLOCK_INDICATORS
            .iter()
            .any(|indicator| lowered.contains(indicator))
        {
            return Err(FetchError::Blocked {
                url: url.to_string(),
            });
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(retry_attempts: u32) -> ScraperConfig {
        ScraperConfig {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) TestAgent/1.0".to_string(),
            request_timeout_secs: 5,
            max_redirects: 5,
            retry_attempts,
            retry_base_delay_ms: 1,
            batch_size: 3,
            batch_delay_ms: 10,
        }
    }

    #[test]
    fn test_retry_context_backoff_progression() {
        let mut retry = RetryContext::new(4);

        assert_eq!(retry.backoff(1000), Some(Duration::from_millis(2000)));
        assert_eq!(retry.backoff(1000), Some(Duration::from_millis(4000)));
        assert_eq!(retry.backoff(1000), Some(Duration::from_millis(8000)));
        // Fourth failure exhausts the budget
        assert_eq!(retry.backoff(1000), None);
    }

    #[test]
    fn test_retry_context_minimum_one_attempt() {
        let mut retry = RetryContext::new(0);
        assert_eq!(retry.backoff(1000), None);
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/produto"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>R$ 10,00</html>"))
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&test_config(3)).unwrap();
        let body = fetcher.fetch(&format!("{}/produto", server.uri())).await;

        tokio_test::assert_ok!(&body);
        assert!(body.unwrap().contains("R$ 10,00"));
    }

    #[tokio::test]
    async fn test_fetch_4xx_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&test_config(3)).unwrap();
        let result = fetcher.fetch(&format!("{}/gone", server.uri())).await;

        match result {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_5xx_retries_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&test_config(3)).unwrap();
        let result = fetcher.fetch(&format!("{}/flaky", server.uri())).await;

        match result {
            Err(err) => assert!(err.is_retryable()),
            Ok(_) => panic!("expected failure after retries"),
        }
    }

    #[tokio::test]
    async fn test_fetch_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recovers"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recovers"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&test_config(3)).unwrap();
        let result = fetcher.fetch(&format!("{}/recovers", server.uri())).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_block_detection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/challenge"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>Please complete the CAPTCHA to continue</html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&test_config(3)).unwrap();
        let result = fetcher.fetch(&format!("{}/challenge", server.uri())).await;

        match result {
            Err(err) => {
                assert!(err.is_blocked());
                assert!(!err.is_retryable());
            }
            Ok(_) => panic!("expected blocked error"),
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&test_config(1)).unwrap();
        let result = fetcher.fetch(&format!("{}/empty", server.uri())).await;

        assert!(matches!(result, Err(FetchError::EmptyBody { .. })));
    }
}
