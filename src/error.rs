use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

/// Error taxonomy for the billing engine.
///
/// `BadRequest` covers malformed/out-of-range input and is never retried.
/// `Conflict` covers invalid state transitions (invoice already paid, payment
/// not pending). `Dependency` is the transient external class (gateway and
/// dispatcher failures) and is the only class that crosses retry boundaries.
/// `Configuration` fails a whole cycle loudly instead of being swallowed.
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
    UnprocessableEntity(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "state_conflict",
            Self::UnprocessableEntity(_) => "unprocessable_entity",
            Self::Configuration(_) => "configuration_error",
            Self::Dependency(_) => "dependency_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message exposed to callers. Internal and configuration failures are
    /// logged with detail but returned generically.
    fn public_message(&self) -> String {
        match self {
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                "An unexpected error occurred.".to_string()
            }
            Self::Configuration(detail) => {
                tracing::error!(detail = %detail, "Configuration error");
                "The service is misconfigured; operators have been notified.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        map_db_error(error)
    }
}

/// Map database failures onto the taxonomy. A unique-constraint violation is
/// a Conflict; the insert-or-ignore paths rely on catching exactly this.
pub fn map_db_error(error: sqlx::Error) -> AppError {
    if let sqlx::Error::RowNotFound = error {
        return AppError::NotFound("Record not found.".to_string());
    }
    let message = error.to_string();
    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    tracing::error!(db_error = %message, "Database query failed");
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Dependency("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let error = AppError::Internal("connection string with password".into());
        assert_eq!(error.public_message(), "An unexpected error occurred.");
        let visible = AppError::Conflict("Payment is already verified.".into());
        assert_eq!(visible.public_message(), "Payment is already verified.");
    }
}
