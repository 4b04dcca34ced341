//! Error types and HTTP error response handling.
//!
//! Every governance operation returns [`AppError`]. The variants keep three outcomes apart for
//! the layers above this crate: "nothing there" (not found), "operation rejected" (conflict,
//! invalid request, permission denied) and "transient, will retry" (database/migration).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::error::ErrorKind;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Lookup**: an id or key matched nothing (`NotFound`). Empty lists are never errors.
/// - **Constraint**: duplicate unique key, CHECK failure, restricted delete (`Conflict`)
/// - **Validation**: missing or malformed input, empty batch (`InvalidRequest`)
/// - **Authorization**: requester lacks ownership or an access grant (`PermissionDenied`)
/// - **Storage**: any other sqlx failure; the surrounding transaction was rolled back
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (connection error, query error, busy database).
    ///
    /// Constraint violations are not reported here: see [`AppError::from_constraint`].
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations could not be applied.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Lookup by id or key found nothing. The payload names the entity.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness, CHECK or referential constraint rejected the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request data is invalid. The String contains details about what was invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl AppError {
    /// Convert a sqlx error, turning constraint violations into [`AppError::Conflict`].
    ///
    /// `context` describes what was being written, e.g. "access grant". Errors that are not
    /// constraint violations stay [`AppError::Database`].
    pub fn from_constraint(err: sqlx::Error, context: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    return AppError::Conflict(format!("{context} already exists"));
                }
                ErrorKind::CheckViolation => {
                    return AppError::Conflict(format!(
                        "{context} violates a check constraint: {}",
                        db_err.message()
                    ));
                }
                ErrorKind::ForeignKeyViolation => {
                    return AppError::Conflict(format!(
                        "{context} references a missing or protected record"
                    ));
                }
                _ => {}
            }
        }
        AppError::Database(err)
    }

    /// Whether this error is transient and the operation should simply be retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Migration(_))
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `NotFound` → 404 Not Found
/// - `Conflict` → 409 Conflict
/// - `InvalidRequest` → 400 Bad Request
/// - `PermissionDenied` → 403 Forbidden
/// - `Database` / `Migration` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::PermissionDenied(ref msg) => {
                (StatusCode::FORBIDDEN, "permission_denied", msg.clone())
            }
            AppError::Database(ref err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Migration(ref err) => {
                tracing::error!(error = %err, "migration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_pass_through_from_constraint() {
        let err = AppError::from_constraint(sqlx::Error::RowNotFound, "policy");
        assert!(matches!(err, AppError::Database(sqlx::Error::RowNotFound)));
        assert!(err.is_transient());
    }

    #[test]
    fn status_codes_distinguish_outcomes() {
        assert_eq!(
            AppError::NotFound("API").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("dup".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::PermissionDenied("no".into())
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
        assert!(!AppError::InvalidRequest("x".into()).is_transient());
    }
}
