use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{
    repository::StoreError,
    services::{
        allocation::AllocationError, documents::DocumentError, gateway::GatewayError,
        settlement::SettlementError,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            // Internal details stay in the logs.
            Self::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<SettlementError> for AppError {
    fn from(error: SettlementError) -> Self {
        match error {
            SettlementError::Validation(message) => Self::UnprocessableEntity(message),
            SettlementError::Allocation(AllocationError::NegativeAmount(_)) => {
                Self::UnprocessableEntity(error.to_string())
            }
            SettlementError::Allocation(other) => Self::Internal(other.to_string()),
            SettlementError::LeaseNotFound(_)
            | SettlementError::LedgerNotFound(_)
            | SettlementError::UnknownReference(_) => Self::NotFound(error.to_string()),
            SettlementError::Unauthorized(message) => Self::Forbidden(message),
            SettlementError::InvalidTransition { .. } | SettlementError::DuplicateReference(_) => {
                Self::Conflict(error.to_string())
            }
            SettlementError::ReferenceHeld { .. } => Self::Internal(error.to_string()),
            SettlementError::Store(store) => store.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Timeout => Self::ServiceUnavailable(
                "Payment gateway did not respond in time. Please retry.".to_string(),
            ),
            GatewayError::NotConfigured => Self::ServiceUnavailable(error.to_string()),
            other => Self::Dependency(other.to_string()),
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(error: DocumentError) -> Self {
        match error {
            DocumentError::Empty => Self::BadRequest(error.to_string()),
            DocumentError::TooLarge { .. } => Self::PayloadTooLarge(error.to_string()),
            DocumentError::UnsupportedType(_) => Self::UnsupportedMediaType(error.to_string()),
            DocumentError::Io(_) => Self::Internal(error.to_string()),
        }
    }
}
