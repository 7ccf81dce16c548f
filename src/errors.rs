use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<crate::services::booking::BookingError> for AppError {
    fn from(e: crate::services::booking::BookingError) -> Self {
        use crate::services::booking::BookingError as E;
        match e {
            E::Validation(_) | E::GuestCapacityExceeded { .. } => AppError::Validation(e.to_string()),
            E::InsufficientAvailability { .. }
            | E::InvalidTransition { .. }
            | E::AlreadyCancelled
            | E::NotCancellable => AppError::Conflict(e.to_string()),
            E::NotFound => AppError::NotFound("booking".into()),
            E::Forbidden => AppError::Forbidden,
            E::Db(e) => AppError::Internal(e),
        }
    }
}

impl From<crate::services::settlement::SettlementError> for AppError {
    fn from(e: crate::services::settlement::SettlementError) -> Self {
        use crate::services::settlement::SettlementError as E;
        match e {
            E::BookingNotFound => AppError::NotFound("booking".into()),
            E::AlreadyPaid | E::NotPaid | E::NoRefundAvailable | E::NotCancellable => {
                AppError::Conflict(e.to_string())
            }
            E::PaymentRecordMissing | E::AmountOutOfRange { .. } => {
                AppError::Internal(anyhow::anyhow!(e))
            }
            E::Gateway(g) => AppError::Gateway(g.to_string()),
            E::Db(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) | AppError::Conflict(_) | AppError::Gateway(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
        };

        // Internal details stay in the logs, not in the response body.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("database error: {e}");
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({ "success": false, "message": message });
        (status, axum::Json(body)).into_response()
    }
}
