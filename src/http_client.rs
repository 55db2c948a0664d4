use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Request, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Config, DebugMode};
use crate::error::{BsnError, NetworkErrorKind, Result};
use crate::request::{decode_body, RequestSpec};
use crate::utils::{redact_headers, truncate_for_log};

/// Upper bound for a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bodies longer than this are truncated in debug output
const MAX_LOGGED_BODY: usize = 8 * 1024;

const USER_AGENT: &str = concat!("bsn-client/", env!("CARGO_PKG_VERSION"));

/// Raw outcome of one attempt that reached the server
struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// HTTP transport with retry, classification and envelope unwrapping
pub struct HttpTransport {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base for relative request paths
    api_base_url: Url,

    /// Additional attempts after the first one
    retry_count: u32,

    /// Base delay for exponential backoff
    base_delay: Duration,

    debug_mode: DebugMode,
}

impl HttpTransport {
    /// Create a transport from the client configuration
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.http_max_connections)
            .connect_timeout(config.http_connect_timeout)
            .timeout(config.http_request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BsnError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            retry_count: config.retry_count,
            base_delay: config.retry_base_delay,
            debug_mode: config.debug_mode,
        })
    }

    /// Resolve a spec path against the API base URL
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        let path = path.trim();
        if path.is_empty() {
            return Err(BsnError::Validation("request path must not be empty".to_string()));
        }

        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .map_err(|e| BsnError::Validation(format!("invalid request URL {:?}: {}", path, e)));
        }

        let joined = format!(
            "{}/{}",
            self.api_base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| BsnError::Validation(format!("invalid request path {:?}: {}", path, e)))
    }

    /// Execute a request spec with retry logic and decode the result
    ///
    /// Retries 429, 5xx and transport failures up to the configured count.
    /// Requests that are not idempotent are only retried when the server
    /// cannot have acted on them (429 or a failed connect).
    pub async fn execute<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let url = self.resolve_url(&spec.path)?;
        let request_id = Uuid::new_v4().to_string();
        let method = spec.method.clone();
        let max_retries = self.retry_count;
        let mut attempt: u32 = 0;

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(BsnError::Cancelled);
            }

            let request = self.build_request(spec, &url, bearer, &request_id)?;
            let logged_headers = match self.debug_mode {
                DebugMode::Off => None,
                _ => Some(redact_headers(request.headers())),
            };
            if self.debug_mode == DebugMode::All {
                self.log_request(spec, &request_id, attempt, logged_headers.as_deref());
            }

            tracing::debug!(
                request_id = %request_id,
                attempt = attempt + 1,
                max_attempts = max_retries + 1,
                "Executing request attempt"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(request_id = %request_id, "Request cancelled in flight");
                    return Err(BsnError::Cancelled);
                }
                result = self.send(request) => result,
            };

            let mut retry_after = None;
            let error = match outcome {
                Ok(raw) if raw.status.is_success() => {
                    tracing::debug!(
                        request_id = %request_id,
                        status = %raw.status,
                        "Request successful"
                    );
                    if self.debug_mode == DebugMode::All {
                        self.log_response(&request_id, &raw);
                    }
                    return decode_body(raw.status.as_u16(), &raw.body, spec.unwrap);
                }
                Ok(raw) => {
                    if self.debug_mode == DebugMode::Errors {
                        self.log_request(spec, &request_id, attempt, logged_headers.as_deref());
                    }
                    if self.debug_mode != DebugMode::Off {
                        self.log_response(&request_id, &raw);
                    }

                    if matches!(
                        raw.status,
                        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
                    ) {
                        retry_after = parse_retry_after(&raw.headers);
                    }

                    tracing::warn!(
                        request_id = %request_id,
                        status = %raw.status,
                        "Received error response"
                    );
                    classify_status(raw.status, &String::from_utf8_lossy(&raw.body))
                }
                Err(e) => {
                    let kind = NetworkErrorKind::from_reqwest(&e);
                    tracing::warn!(
                        request_id = %request_id,
                        error_kind = %kind,
                        error = %e,
                        url = %url,
                        attempt = attempt + 1,
                        "HTTP request error"
                    );
                    BsnError::network(&e)
                }
            };

            if attempt < max_retries && should_retry(&error, spec.idempotent) {
                let delay = retry_after
                    .unwrap_or_else(|| self.calculate_backoff_delay(attempt))
                    .min(MAX_BACKOFF);
                tracing::warn!(
                    request_id = %request_id,
                    "Request failed: {}, retrying after {}ms (attempt {}/{})",
                    error,
                    delay.as_millis(),
                    attempt + 1,
                    max_retries + 1
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(BsnError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                continue;
            }

            tracing::error!(
                request_id = %request_id,
                method = %method,
                url = %url,
                total_attempts = attempt + 1,
                error = %error,
                "HTTP request failed"
            );
            return Err(error);
        }
    }

    fn build_request(
        &self,
        spec: &RequestSpec,
        url: &Url,
        bearer: Option<&str>,
        request_id: &str,
    ) -> Result<Request> {
        let mut builder = self
            .client
            .request(spec.method.clone(), url.clone())
            .header(ACCEPT, "application/json")
            .header("X-Request-Id", request_id);

        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        if let Some(ref body) = spec.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .build()
            .map_err(|e| BsnError::Validation(format!("invalid request: {}", e)))
    }

    async fn send(&self, request: Request) -> std::result::Result<RawResponse, reqwest::Error> {
        let response = self.client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn log_request(
        &self,
        spec: &RequestSpec,
        request_id: &str,
        attempt: u32,
        headers: Option<&[(String, String)]>,
    ) {
        let body = spec
            .body
            .as_deref()
            .map(|b| truncate_for_log(&String::from_utf8_lossy(b), MAX_LOGGED_BODY))
            .unwrap_or_default();
        tracing::info!(
            request_id = %request_id,
            attempt = attempt + 1,
            method = %spec.method,
            path = %spec.path,
            headers = ?headers.unwrap_or_default(),
            body = %body,
            "[debug] request"
        );
    }

    fn log_response(&self, request_id: &str, raw: &RawResponse) {
        let body = truncate_for_log(&String::from_utf8_lossy(&raw.body), MAX_LOGGED_BODY);
        tracing::info!(
            request_id = %request_id,
            status = %raw.status,
            headers = ?redact_headers(&raw.headers),
            body = %body,
            "[debug] response"
        );
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        // Exponential backoff: base_delay * 2^attempt
        // With jitter to avoid thundering herd
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.min(16)));
        let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
        (delay + jitter).min(MAX_BACKOFF)
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn debug_mode(&self) -> DebugMode {
        self.debug_mode
    }
}

/// Map a non-success status and body onto the error taxonomy
fn classify_status(status: StatusCode, body: &str) -> BsnError {
    let error = BsnError::from_response(status.as_u16(), body);
    if status == StatusCode::UNAUTHORIZED {
        let message = match &error {
            BsnError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        };
        return BsnError::Authentication(format!("HTTP 401: {}", message));
    }
    error
}

fn should_retry(error: &BsnError, idempotent: bool) -> bool {
    match error {
        // Neither a rate-limit rejection nor a failed connect reached the handler
        BsnError::Api { status: 429, .. } => true,
        BsnError::Network {
            kind: NetworkErrorKind::Connect,
            ..
        } => true,
        _ => idempotent && error.is_retryable(),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
