use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
///
/// Every variant maps to a stable machine-readable `code` (see [`AppError::code`])
/// so callers can branch on the outcome without parsing messages.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Storage failure from a non-SQL backend.
    StorageError(String),
    /// No resolved actor on the request.
    Unauthorized(String),
    /// The actor lacks the role or ownership required for the operation.
    Forbidden(String),
    /// Resource not found error.
    NotFound(String),
    /// The organizer has no document of the requested type.
    DocumentNotFound(String),
    /// Unknown status value or a transition the state table does not allow.
    InvalidStatus(String),
    /// Submission preconditions are not met.
    IncompleteProfile(String),
    /// The organizer has no lead credits left.
    InsufficientCredits(String),
    /// The lead was already unlocked.
    AlreadyUnlocked(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The resource already exists.
    Conflict(String),
    /// Credit balance disagrees with the purchase/unlock histories.
    LedgerInconsistency(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) | AppError::StorageError(_) => "storage_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::DocumentNotFound(_) => "document_not_found",
            AppError::InvalidStatus(_) => "invalid_status",
            AppError::IncompleteProfile(_) => "incomplete_profile",
            AppError::InsufficientCredits(_) => "insufficient_credits",
            AppError::AlreadyUnlocked(_) => "already_unlocked",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::LedgerInconsistency(_) => "ledger_inconsistency",
            AppError::ExternalApiError(_) => "external_api_error",
            AppError::InternalError(_) => "internal_error",
            AppError::WithContext { source, .. } => source.code(),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_)
            | AppError::StorageError(_)
            | AppError::LedgerInconsistency(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStatus(_)
            | AppError::IncompleteProfile(_)
            | AppError::InsufficientCredits(_)
            | AppError::AlreadyUnlocked(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::WithContext { source, .. } => source.status(),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::DocumentNotFound(msg) => write!(f, "Document not found: {}", msg),
            AppError::InvalidStatus(msg) => write!(f, "Invalid status: {}", msg),
            AppError::IncompleteProfile(msg) => write!(f, "Incomplete profile: {}", msg),
            AppError::InsufficientCredits(msg) => write!(f, "Insufficient credits: {}", msg),
            AppError::AlreadyUnlocked(msg) => write!(f, "Already unlocked: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::LedgerInconsistency(msg) => write!(f, "Ledger inconsistency: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Infrastructure failures are logged and replaced by a generic message;
    /// business-rule and validation errors pass their message through.
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                "Storage error".to_string()
            }
            AppError::StorageError(msg) => {
                tracing::error!("Storage error: {}", msg);
                "Storage error".to_string()
            }
            AppError::LedgerInconsistency(msg) => {
                tracing::error!("Ledger inconsistency: {}", msg);
                "Internal consistency error".to_string()
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                "External service error".to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                "Unauthorized".to_string()
            }
            AppError::Forbidden(msg) => {
                tracing::warn!("Forbidden: {}", msg);
                msg.clone()
            }
            AppError::NotFound(msg)
            | AppError::DocumentNotFound(msg)
            | AppError::InvalidStatus(msg)
            | AppError::IncompleteProfile(msg)
            | AppError::InsufficientCredits(msg)
            | AppError::AlreadyUnlocked(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.clone().into_response();
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` becomes a
    /// `StorageError` carrying the rendered message.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(e) => AppError::StorageError(e.to_string()),
            AppError::StorageError(msg) => AppError::StorageError(msg.clone()),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::Forbidden(msg) => AppError::Forbidden(msg.clone()),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::DocumentNotFound(msg) => AppError::DocumentNotFound(msg.clone()),
            AppError::InvalidStatus(msg) => AppError::InvalidStatus(msg.clone()),
            AppError::IncompleteProfile(msg) => AppError::IncompleteProfile(msg.clone()),
            AppError::InsufficientCredits(msg) => AppError::InsufficientCredits(msg.clone()),
            AppError::AlreadyUnlocked(msg) => AppError::AlreadyUnlocked(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::Conflict(msg) => AppError::Conflict(msg.clone()),
            AppError::LedgerInconsistency(msg) => AppError::LedgerInconsistency(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to storage errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_business_outcome() {
        let errors = [
            AppError::Forbidden(String::new()),
            AppError::NotFound(String::new()),
            AppError::InvalidStatus(String::new()),
            AppError::IncompleteProfile(String::new()),
            AppError::InsufficientCredits(String::new()),
            AppError::AlreadyUnlocked(String::new()),
            AppError::StorageError(String::new()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn context_keeps_underlying_code_and_status() {
        let err: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = err.context("locking lead").unwrap_err();
        assert_eq!(err.code(), "storage_error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            err,
            AppError::WithContext { ref source, .. } if matches!(**source, AppError::DatabaseError(_))
        ));
    }

    #[test]
    fn database_error_clones_into_storage_error() {
        let err = AppError::DatabaseError(sqlx::Error::RowNotFound);
        let cloned = err.clone();
        assert_eq!(cloned.code(), "storage_error");
        assert_eq!(cloned.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
