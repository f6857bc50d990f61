//! The JSON error envelope and the mapping from engine errors to HTTP.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::domain::errors::{EngineError, EngineResult};

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error_code: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            success: false,
            error_code: self.code,
            error_message: self.message,
            error_details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InsufficientStock { failures } => Self {
                status: StatusCode::CONFLICT,
                code: "insufficient_stock".into(),
                message: "one or more lines exceed available stock".into(),
                details: serde_json::to_value(&failures).ok(),
            },
            EngineError::LockTimeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "lock_timeout",
                "the system is busy, please retry",
            ),
            EngineError::GatewayTimeout => Self::new(
                StatusCode::BAD_GATEWAY,
                "gateway_timeout",
                "payment gateway timed out",
            ),
            EngineError::GatewayUnreachable { reason } => Self::new(
                StatusCode::BAD_GATEWAY,
                "gateway_unreachable",
                format!("payment gateway unreachable: {}", reason),
            ),
            EngineError::GatewayRejected { message, details } => Self {
                status: StatusCode::BAD_REQUEST,
                code: "gateway_rejected".into(),
                message,
                details: Some(serde_json::json!(details)),
            },
            EngineError::StateGuard {
                event,
                order_status,
                payment_status,
            } => Self {
                status: StatusCode::CONFLICT,
                code: "state_guard".into(),
                message: format!(
                    "{} is not applicable while the order is ({}, {})",
                    event, order_status, payment_status
                ),
                details: None,
            },
            EngineError::Integrity { constraint } => {
                // A fired CHECK constraint is a programming defect, not a
                // user error.
                error!("Integrity violation reached the API: {}", constraint);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "integrity_violation",
                    "internal integrity error",
                )
            }
            EngineError::NotFound { entity, id } => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} {} not found", entity, id),
            ),
            EngineError::Validation { reason } => {
                Self::new(StatusCode::BAD_REQUEST, "validation_error", reason)
            }
            EngineError::Conversion { reason } => Self::new(
                StatusCode::BAD_GATEWAY,
                "conversion_failed",
                format!("currency conversion failed: {}", reason),
            ),
            EngineError::Database(e) => {
                error!("Database error reached the API: {}", e);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "internal database error",
                )
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run an engine call, retrying exactly once on a lock timeout before the
/// error surfaces as 503.
pub async fn retry_lock_timeout<T, F, Fut>(f: F) -> EngineResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    match f().await {
        Err(EngineError::LockTimeout) => f().await,
        other => other,
    }
}
