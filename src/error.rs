use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::providers::UpstreamError;
use crate::relay::RelayError;

/// HTTP-boundary error, rendered as an [`ErrorEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// JSON error body shared by every failing route and by in-stream error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>, code: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl From<&UpstreamError> for ErrorEnvelope {
    fn from(err: &UpstreamError) -> Self {
        let title = match err {
            UpstreamError::PermissionDenied(_) => "Permission denied",
            UpstreamError::Validation(_) => "Validation error",
            UpstreamError::Unavailable(_) => "Model unavailable",
            UpstreamError::Unknown { .. } => "Upstream error",
        };
        Self::new(title, err.code(), Some(err.message().to_string()))
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Unauthorized(msg) => {
                ErrorEnvelope::new("Unauthorized", "unauthorized", Some(msg.clone()))
            }
            Self::BadRequest(msg) => {
                ErrorEnvelope::new("Invalid request", "invalid_request", Some(msg.clone()))
            }
            Self::Upstream(err) => ErrorEnvelope::from(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, axum::Json(self.envelope())).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {err}"))
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidRequest(msg) => Self::BadRequest(msg),
            RelayError::Upstream(err) => Self::Upstream(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let (status, json) = render(AppError::BadRequest("missing messages".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid request");
        assert_eq!(json["code"], "invalid_request");
        assert_eq!(json["details"], "missing messages");
        let ts = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn test_upstream_error_statuses() {
        let (status, json) =
            render(AppError::from(UpstreamError::PermissionDenied("no model access".into()))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "permission_denied");
        assert_eq!(json["details"], "no model access");

        let (status, _) = render(AppError::from(UpstreamError::Unavailable("slow".into()))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, json) = render(AppError::from(UpstreamError::unknown("boom"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["code"], "upstream_error");
    }

    #[tokio::test]
    async fn test_upstream_server_error_keeps_its_status() {
        let (status, json) = render(AppError::from(UpstreamError::from_status(500, "overloaded"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "upstream_error");
        assert_eq!(json["details"], "overloaded");
    }

    #[tokio::test]
    async fn test_unauthorized_is_401() {
        let (status, json) = render(AppError::Unauthorized("no session".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "unauthorized");
    }

    #[test]
    fn test_relay_error_conversion() {
        let err = AppError::from(RelayError::InvalidRequest("empty".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = AppError::from(RelayError::Upstream(UpstreamError::Validation("bad".into())));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.envelope().code, "validation_error");
    }

    #[test]
    fn test_json_error_is_bad_request() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(AppError::from(parse_err), AppError::BadRequest(_)));
    }
}
