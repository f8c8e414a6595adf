//! Proxy error surface with per-format wire encodings.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::messages::{anthropic, gemini};

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors the proxy can surface to a client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Request body is not valid JSON in the declared format or misses
    /// required fields.
    #[error("Invalid request: {0}")]
    MalformedRequest(String),

    /// Missing or unknown client credential.
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// No configured upstream advertises the model and no wildcard exists.
    #[error("Model '{0}' is not available")]
    ModelUnavailable(String),

    /// An upstream rejected the request on client-error grounds. Terminal:
    /// retrying elsewhere would fail the same way.
    #[error("Upstream rejected the request ({status}): {message}")]
    UpstreamRefused { status: u16, message: String },

    /// An upstream returned 429. Retriable on the next candidate.
    #[error("Upstream rate limit: {message}")]
    RateLimited { message: String },

    /// An upstream returned a 5xx. Retriable on the next candidate.
    #[error("Upstream error ({status}): {message}")]
    UpstreamApiError { status: u16, message: String },

    /// Network-level failure reaching an upstream. Retriable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every candidate failed with a retriable error.
    #[error("All upstream candidates failed; last error: {last}")]
    UpstreamExhausted { last: String },

    /// The total request deadline elapsed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Internal failure. `Some` carries an upstream-provided message that
    /// is safe to show; `None` means proxy internals stay hidden.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl LlmError {
    /// Whether the router should try the next candidate.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::UpstreamApiError { .. } | LlmError::Connection(_)
        )
    }

    /// Classify an upstream HTTP failure status.
    pub fn from_upstream_status(status: u16, message: String) -> Self {
        match status {
            429 => LlmError::RateLimited { message },
            500..=599 => LlmError::UpstreamApiError { status, message },
            _ => LlmError::UpstreamRefused { status, message },
        }
    }

    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            LlmError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            LlmError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            LlmError::ModelUnavailable(_) => StatusCode::NOT_FOUND,
            LlmError::UpstreamRefused { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            LlmError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            LlmError::UpstreamApiError { .. }
            | LlmError::Connection(_)
            | LlmError::UpstreamExhausted { .. } => StatusCode::BAD_GATEWAY,
            LlmError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            LlmError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            LlmError::Internal(Some(upstream_message)) => upstream_message.clone(),
            LlmError::Internal(None) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// The OpenAI error body as a JSON string, for mid-stream frames.
    pub(crate) fn openai_error_json(&self) -> String {
        let body = OpenAiErrorBody {
            error: OpenAiErrorDetails {
                message: self.client_message(),
                r#type: self.openai_error_type().to_string(),
                code: self.status_code().as_u16(),
            },
        };

        serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":{"message":"serialization failed","type":"internal_error","code":500}}"#.to_string()
        })
    }

    fn openai_error_type(&self) -> &'static str {
        match self {
            LlmError::MalformedRequest(_) => "invalid_request_error",
            LlmError::Unauthorized(_) => "authentication_error",
            LlmError::ModelUnavailable(_) => "not_found_error",
            LlmError::RateLimited { .. } => "rate_limit_error",
            LlmError::UpstreamRefused { .. }
            | LlmError::UpstreamApiError { .. }
            | LlmError::Connection(_)
            | LlmError::UpstreamExhausted { .. }
            | LlmError::DeadlineExceeded => "api_error",
            LlmError::Internal(_) => "internal_error",
        }
    }

    fn anthropic_error_type(&self) -> &'static str {
        match self.status_code().as_u16() {
            400 => "invalid_request_error",
            401 => "authentication_error",
            403 => "permission_error",
            404 => "not_found_error",
            429 => "rate_limit_error",
            504 => "timeout_error",
            _ => "api_error",
        }
    }

    fn gemini_status(&self) -> &'static str {
        match self.status_code().as_u16() {
            400 => "INVALID_ARGUMENT",
            401 => "UNAUTHENTICATED",
            403 => "PERMISSION_DENIED",
            404 => "NOT_FOUND",
            429 => "RESOURCE_EXHAUSTED",
            504 => "DEADLINE_EXCEEDED",
            500 => "INTERNAL",
            _ => "UNAVAILABLE",
        }
    }
}

/// OpenAI-format error body.
#[derive(Debug, Serialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetails,
}

#[derive(Debug, Serialize)]
struct OpenAiErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = OpenAiErrorBody {
            error: OpenAiErrorDetails {
                message: self.client_message(),
                r#type: self.openai_error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// [`LlmError`] rendered as an Anthropic wire error.
pub struct AnthropicError(pub LlmError);

pub type AnthropicResult<T> = std::result::Result<T, AnthropicError>;

impl From<LlmError> for AnthropicError {
    fn from(error: LlmError) -> Self {
        Self(error)
    }
}

impl AnthropicError {
    /// The wire payload, also used for mid-stream error events.
    pub(crate) fn payload(&self) -> anthropic::ErrorPayload {
        anthropic::ErrorPayload {
            error_type: self.0.anthropic_error_type().to_string(),
            message: self.0.client_message(),
        }
    }
}

impl IntoResponse for AnthropicError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = anthropic::ErrorResponse::new(self.0.anthropic_error_type(), self.0.client_message());

        (status, Json(body)).into_response()
    }
}

/// [`LlmError`] rendered as a Gemini wire error.
pub struct GeminiError(pub LlmError);

pub type GeminiResult<T> = std::result::Result<T, GeminiError>;

impl From<LlmError> for GeminiError {
    fn from(error: LlmError) -> Self {
        Self(error)
    }
}

impl GeminiError {
    /// The wire payload, also used for mid-stream error frames.
    pub(crate) fn payload(&self) -> gemini::ErrorResponse {
        gemini::ErrorResponse::new(
            self.0.status_code().as_u16(),
            self.0.gemini_status(),
            self.0.client_message(),
        )
    }
}

impl IntoResponse for GeminiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        (status, Json(self.payload())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_4xx_statuses_pass_through_verbatim() {
        let error = LlmError::from_upstream_status(403, "no access".into());
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
        assert!(!error.is_retriable());
    }

    #[test]
    fn retriable_classification_matches_the_failover_policy() {
        assert!(LlmError::from_upstream_status(429, String::new()).is_retriable());
        assert!(LlmError::from_upstream_status(500, String::new()).is_retriable());
        assert!(LlmError::from_upstream_status(503, String::new()).is_retriable());
        assert!(LlmError::Connection("refused".into()).is_retriable());

        assert!(!LlmError::from_upstream_status(400, String::new()).is_retriable());
        assert!(!LlmError::from_upstream_status(401, String::new()).is_retriable());
        assert!(!LlmError::from_upstream_status(404, String::new()).is_retriable());
    }

    #[test]
    fn internal_errors_hide_proxy_details() {
        assert_eq!(LlmError::Internal(None).client_message(), "Internal server error");
        assert_eq!(
            LlmError::Internal(Some("upstream said so".into())).client_message(),
            "upstream said so"
        );
    }
}
