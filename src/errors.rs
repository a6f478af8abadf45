use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error body returned to API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart is empty.")]
    EmptyCart,

    #[error("No valid products found in cart.")]
    NoValidItems,

    #[error("{0}")]
    NotConfigured(String),

    #[error("Unsupported payment method selected.")]
    UnsupportedMethod,

    #[error("{0}")]
    ProductUnavailable(String),

    #[error("{0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ValidationError(_)
            | ServiceError::EmptyCart
            | ServiceError::NoValidItems
            | ServiceError::NotConfigured(_)
            | ServiceError::UnsupportedMethod => StatusCode::BAD_REQUEST,
            ServiceError::ProductUnavailable(_)
            | ServiceError::InsufficientStock(_)
            | ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidSignature | ServiceError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show an unauthenticated caller. Internal and database
    /// failures are collapsed to a generic line so they never leak details.
    fn public_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "Internal server error".to_string()
            }
            ServiceError::ExternalService(_) => "Upstream service unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = Json(ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.public_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        if let ServiceError::RateLimited { retry_after_secs } = self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_errors_map_to_conflict() {
        let err = ServiceError::InsufficientStock("Widget has only 1 item(s) left".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let err = ServiceError::ProductUnavailable("gone".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::InternalError("order number space exhausted".into());
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = ServiceError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
