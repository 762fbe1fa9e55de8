use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::retry::RetryConfig;

/// HTTP methods used by fetchers and webhook channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// HTTP request envelope used by transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// JSON POST with `content-type: application/json`.
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Other,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, HttpErrorKind::Timeout)
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Async transport contract shared by fetchers and notification channels.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production HTTP client backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("finbrief/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            builder = builder.timeout(Duration::from_millis(request.timeout_ms));

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::connect(format!("connection failed: {e}"))
                } else {
                    HttpError::other(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("response body timeout: {e}"))
                } else {
                    HttpError::other(format!("failed to read response body: {e}"))
                }
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Execute `request`, retrying transient failures according to `retry`.
///
/// Retryable statuses and transport errors are retried up to
/// `retry.max_retries` times. After the last attempt the final response (even
/// a non-2xx one) or transport error is returned to the caller.
pub async fn execute_with_retry(
    client: &dyn HttpClient,
    request: HttpRequest,
    retry: &RetryConfig,
) -> Result<HttpResponse, HttpError> {
    let max_retries = if retry.enabled { retry.max_retries } else { 0 };
    let mut attempt = 0_u32;

    loop {
        let outcome = client.execute(request.clone()).await;
        let transient = match &outcome {
            Ok(response) => retry.should_retry_status(response.status),
            Err(error) => retry.should_retry_error(error),
        };

        if !transient || attempt >= max_retries {
            return outcome;
        }

        let delay = retry.delay_for_attempt(attempt);
        tracing::debug!(
            url = %request.url,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying transient http failure"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("calls mutex should not be poisoned")
        }
    }

    impl HttpClient for ScriptedClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            *self.calls.lock().expect("calls mutex should not be poisoned") += 1;
            let reply = self
                .replies
                .lock()
                .expect("replies mutex should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::ok("{}")));
            Box::pin(async move { reply })
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig::fixed(Duration::from_millis(1), max_retries)
    }

    #[test]
    fn post_json_sets_content_type() {
        let request = HttpRequest::post_json("https://hooks.example/send", "{}");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let client = ScriptedClient::new(vec![
            Ok(HttpResponse::new(503, "busy")),
            Err(HttpError::timeout("slow")),
            Ok(HttpResponse::ok("done")),
        ]);

        let response = execute_with_retry(&client, HttpRequest::get("https://x.test"), &fast_retry(3))
            .await
            .expect("third attempt succeeds");

        assert_eq!(response.body, "done");
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse::new(404, "missing"))]);

        let response = execute_with_retry(&client, HttpRequest::get("https://x.test"), &fast_retry(3))
            .await
            .expect("response is returned as-is");

        assert_eq!(response.status, 404);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn retry_budget_bounds_total_attempts() {
        let client = ScriptedClient::new(vec![
            Ok(HttpResponse::new(500, "")),
            Ok(HttpResponse::new(500, "")),
            Ok(HttpResponse::new(500, "")),
        ]);

        let response = execute_with_retry(&client, HttpRequest::get("https://x.test"), &fast_retry(2))
            .await
            .expect("final response is returned");

        assert_eq!(response.status, 500);
        assert_eq!(client.calls(), 3);
    }
}
