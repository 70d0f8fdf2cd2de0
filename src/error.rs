use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::providers::ProviderError;

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Errors returned by the inference client contract.
///
/// Quota rejection is not listed here; it is an
/// [`InvokeOutcome::Rejected`](crate::client::InvokeOutcome) value.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Content blocked by guardrail: {0}")]
    GuardrailBlocked(String),

    #[error("Guardrail unavailable: {0}")]
    GuardrailUnavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Gateway error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status this error maps to at the gateway boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::GuardrailBlocked(_) | Self::InvalidRequest(_) => 400,
            Self::ModelNotFound(_) | Self::UserNotFound(_) => 404,
            Self::Provider(err) => err.status_code(),
            Self::Remote { status, .. } => *status,
            Self::GuardrailUnavailable(_) | Self::Transport(_) => 502,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::Database(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// HTTP-facing error for the standalone gateway routes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Quota exhausted. Displayed verbatim so remote callers see the same
    /// message the in-process admission check produces.
    #[error("{0}")]
    BudgetExceeded(String),

    #[error("{0}")]
    ContentPolicy(String),

    #[error("Provider error ({status}): {message}")]
    ProviderWithStatus { status: u16, message: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error body shared by every non-2xx gateway response: `{ "error": "..." }`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::ContentPolicy(_) => StatusCode::BAD_REQUEST,
            Self::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderWithStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Provider(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::NotFound(_) => "not_found_error",
            Self::BadRequest(_) => "invalid_request_error",
            Self::BudgetExceeded(_) => "rate_limit_error",
            Self::ContentPolicy(_) => "content_policy_error",
            Self::Provider(_) | Self::ProviderWithStatus { .. } => "api_error",
            Self::Database(_) | Self::Internal(_) => "server_error",
        }
    }

    fn error_code(&self) -> Option<&str> {
        match self {
            Self::BudgetExceeded(_) => Some("budget_exceeded"),
            Self::ContentPolicy(_) => Some("guardrail_blocked"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            r#type: self.error_type().to_string(),
            code: self.error_code().map(String::from),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {err}"))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::GuardrailBlocked(_) => Self::ContentPolicy(err.to_string()),
            GatewayError::ModelNotFound(_) | GatewayError::UserNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            GatewayError::InvalidRequest(msg) => Self::BadRequest(msg),
            GatewayError::Provider(ref provider) => match provider.status() {
                Some(status) => Self::ProviderWithStatus {
                    status,
                    message: provider.to_string(),
                },
                None => Self::Provider(provider.to_string()),
            },
            GatewayError::Remote { status, message } => {
                Self::ProviderWithStatus { status, message }
            }
            GatewayError::GuardrailUnavailable(_) | GatewayError::Transport(_) => {
                Self::ProviderWithStatus {
                    status: 502,
                    message: err.to_string(),
                }
            }
            GatewayError::Database(msg) => Self::Database(msg),
            GatewayError::Internal(msg) => Self::Internal(msg),
        }
    }
}
