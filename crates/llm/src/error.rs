use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Body is not valid JSON in the declared format or misses required fields.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Missing or unknown client API key.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No configured upstream advertises the model and no wildcard exists.
    #[error("Model '{0}' is not available on any configured upstream")]
    ModelUnavailable(String),

    /// An upstream rejected the request on client-error grounds. Terminal:
    /// the same request would fail on every other upstream too.
    #[error("Upstream rejected the request ({status}): {message}")]
    UpstreamRefused {
        /// Upstream HTTP status (400, 401, 403 or 404).
        status: u16,
        /// Upstream error body.
        message: String,
    },

    /// Upstream returned 429. Retriable: the router moves to the next candidate.
    #[error("Upstream rate limited: {message}")]
    RateLimited {
        /// Upstream error body.
        message: String,
    },

    /// Upstream returned a server error. Retriable.
    #[error("Upstream API error ({status}): {message}")]
    UpstreamApi {
        /// Upstream HTTP status in [500, 599].
        status: u16,
        /// Upstream error body.
        message: String,
    },

    /// Network-level failure talking to the upstream. Retriable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// All candidates were tried; all failed with retriable errors.
    #[error("All upstream candidates failed; last error: {message}")]
    UpstreamExhausted {
        /// Description of the most recent failure.
        message: String,
    },

    /// The total request deadline elapsed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Internal error. `Some` messages come from an upstream and can be
    /// shown; `None` must not leak details.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl ProxyError {
    /// Whether the router should move on to the next candidate.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::UpstreamApi { .. } | Self::Connection(_)
        )
    }

    /// Classify an upstream HTTP status into the matching error.
    pub fn from_upstream_status(status: u16, message: String) -> Self {
        match status {
            429 => Self::RateLimited { message },
            400 | 401 | 403 | 404 => Self::UpstreamRefused { status, message },
            500..=599 => Self::UpstreamApi { status, message },
            _ => Self::UpstreamRefused { status, message },
        }
    }

    /// The HTTP status returned to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ModelUnavailable(_) => StatusCode::NOT_FOUND,
            Self::UpstreamRefused { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamApi { .. } | Self::Connection(_) | Self::UpstreamExhausted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error type string used in response bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "invalid_request_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::ModelUnavailable(_) => "not_found_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::UpstreamRefused { .. }
            | Self::UpstreamApi { .. }
            | Self::Connection(_)
            | Self::UpstreamExhausted { .. } => "api_error",
            Self::DeadlineExceeded => "timeout_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(upstream_msg)) => upstream_msg.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// [`ProxyError`] rendered in the Anthropic wire format.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: crate::protocol::anthropic::ErrorResponse,
}

impl From<ProxyError> for AnthropicErrorResponse {
    fn from(error: ProxyError) -> Self {
        let status = error.status_code();
        let body = crate::protocol::anthropic::ErrorResponse::from(error);

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;

/// [`ProxyError`] rendered in the Gemini wire format.
pub struct GeminiErrorResponse {
    status: StatusCode,
    body: crate::protocol::gemini::ErrorResponse,
}

impl From<ProxyError> for GeminiErrorResponse {
    fn from(error: ProxyError) -> Self {
        let status = error.status_code();
        let body = crate::protocol::gemini::ErrorResponse::from(error);

        Self { status, body }
    }
}

impl IntoResponse for GeminiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type GeminiResult<T> = std::result::Result<T, GeminiErrorResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classes() {
        assert!(ProxyError::from_upstream_status(429, String::new()).is_retriable());
        assert!(ProxyError::from_upstream_status(500, String::new()).is_retriable());
        assert!(ProxyError::from_upstream_status(503, String::new()).is_retriable());
        assert!(ProxyError::Connection("reset".into()).is_retriable());

        assert!(!ProxyError::from_upstream_status(400, String::new()).is_retriable());
        assert!(!ProxyError::from_upstream_status(401, String::new()).is_retriable());
        assert!(!ProxyError::from_upstream_status(403, String::new()).is_retriable());
        assert!(!ProxyError::from_upstream_status(404, String::new()).is_retriable());
    }

    #[test]
    fn refused_status_is_passed_through() {
        let error = ProxyError::from_upstream_status(401, "bad key".into());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);

        let error = ProxyError::from_upstream_status(404, "no model".into());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn exhausted_maps_to_bad_gateway() {
        let error = ProxyError::UpstreamExhausted {
            message: "429 from last candidate".into(),
        };

        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(error.error_type(), "api_error");
    }
}
