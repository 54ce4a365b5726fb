//! HTTP error shaping for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use common::{ExportError, PoolErrorKind};

pub type ApiResult<T> = Result<T, ApiError>;

/// Gateway-level error, one variant per response class.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or missing input (400).
    BadRequest(String),

    /// Missing or wrong admin token (401).
    Unauthorized(String),

    /// The renderer took too long (408).
    Timeout(String),

    /// Rate limit or pool backpressure (429).
    TooManyRequests(String),

    /// Unexpected fault (500).
    Internal(String),

    /// Client went away; the caller must not write a response.
    Cancelled,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Timeout(msg)
            | Self::TooManyRequests(msg)
            | Self::Internal(msg) => msg,
            Self::Cancelled => "export cancelled",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The canonical §-error to status mapping: validation is the client's
/// fault, cache faults are ours, acquire timeouts mean "too busy", and
/// renderer messages come back sanitised on a 4xx.
impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Validation(msg) => Self::BadRequest(msg),
            ExportError::Cache { message, .. } => {
                Self::Internal(format!("chart library cache failure: {message}"))
            }
            ExportError::Pool { kind, message } => match kind {
                PoolErrorKind::AcquireTimeout => Self::TooManyRequests(
                    "The server is too busy to handle the request right now, try again later"
                        .to_string(),
                ),
                _ => Self::Internal(message),
            },
            ExportError::Render(message) => {
                Self::BadRequest(format!("Rendering failed: {}", sanitize(&message)))
            }
            ExportError::RasterizationTimeout => Self::Timeout(
                "The rendering of the chart exceeded the rasterization timeout".to_string(),
            ),
            ExportError::Cancelled => Self::Cancelled,
            ExportError::Internal(message) => Self::Internal(message),
        }
    }
}

/// Strip control characters and cap the renderer message before it reaches
/// a client.
fn sanitize(message: &str) -> String {
    message
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .take(512)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(ExportError::Validation("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ExportError::RasterizationTimeout).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            ApiError::from(ExportError::Pool {
                kind: PoolErrorKind::AcquireTimeout,
                message: "t".into()
            })
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(ExportError::Pool {
                kind: PoolErrorKind::Drained,
                message: "d".into()
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize("a\x1b[31mb\nc"), "a[31mbc");
    }
}
