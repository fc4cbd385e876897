//! HTTP utilities for GCP REST API calls

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Error returned by the GCP REST layer.
///
/// `status` is the HTTP status code, or `0` when the request never produced a
/// response (connection reset, DNS failure, unreadable body).
#[derive(Debug, Clone, thiserror::Error)]
#[error("API request failed: {status} - {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    /// The canonical status string (`FAILED_PRECONDITION`, `NOT_FOUND`, ...)
    pub api_status: Option<String>,
    /// `error.errors[].reason` values from the response body
    pub reasons: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            api_status: None,
            reasons: Vec::new(),
        }
    }

    /// Error for a request that never got an HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    /// Build an error from a non-success response, reading the Google error
    /// envelope when the body carries one.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => Self {
                status: status.as_u16(),
                message: envelope.error.message,
                api_status: envelope.error.status,
                reasons: envelope
                    .error
                    .errors
                    .into_iter()
                    .map(|e| e.reason)
                    .filter(|r| !r.is_empty())
                    .collect(),
            },
            Err(_) => Self::new(
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown status"),
            ),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reasons.push(reason.to_string());
        self
    }

    pub fn with_api_status(mut self, api_status: &str) -> Self {
        self.api_status = Some(api_status.to_string());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// GKE answers 400 `failedPrecondition` while the parent cluster is
    /// running another operation.
    pub fn is_failed_precondition(&self) -> bool {
        if self.status == 412 {
            return true;
        }
        self.status == 400
            && (self.reasons.iter().any(|r| r == "failedPrecondition")
                || self.api_status.as_deref() == Some("FAILED_PRECONDITION"))
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409 || self.status == 412
    }

    pub fn is_retryable(&self) -> bool {
        self.is_failed_precondition()
            || self.is_conflict()
            || self.status == 0
            || self.status == 429
            || (500..=599).contains(&self.status)
    }
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .user_agent(concat!("gkepool/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, url, token, None).await
    }

    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.send(Method::POST, url, token, body).await
    }

    pub async fn put(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.send(Method::PUT, url, token, body).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value, ApiError> {
        self.send(Method::DELETE, url, token, None).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to send request: {e}")))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            // 404 is an expected answer for existence checks
            if status == StatusCode::NOT_FOUND {
                tracing::debug!("API not found: {}", url);
            } else {
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            }
            return Err(ApiError::from_response(status, &response_body));
        }

        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body)
            .map_err(|e| ApiError::new(status.as_u16(), format!("Failed to parse response JSON: {e}")))
    }
}

/// Format an error for display
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
        match api.status {
            401 => {
                return "Authentication failed. Run 'gcloud auth application-default login'."
                    .to_string()
            }
            403 => return "Permission denied. Check your GCP IAM permissions.".to_string(),
            404 => return "Resource not found.".to_string(),
            409 => {
                return "Resource conflict. The resource may already exist or be in use."
                    .to_string()
            }
            429 => return "Rate limit exceeded. Please try again later.".to_string(),
            500 | 503 => {
                return "GCP service temporarily unavailable. Please try again.".to_string()
            }
            0 => {
                return "Request failed. Check your network connection and try again.".to_string()
            }
            _ => {}
        }
    }

    let error_str = error.to_string();
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(160)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
