//! API error handling.
//!
//! Every failure is rendered as `{ "success": false, "message", "code" }`
//! with an HTTP status chosen by the error's layer.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::infrastructure::RepositoryError;
use crate::search::{ReconcileError, SearchError};

// =============================================================================
// API Error
// =============================================================================

/// API error structure for JSON responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Always `false`.
    pub success: bool,
    /// Human-readable error message.
    pub message: String,
    /// Error code for programmatic handling.
    pub code: String,
    /// Optional field-level errors for validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    /// Creates a new API error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Creates a validation error with field-level details.
    #[must_use]
    pub fn validation(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        Self {
            details: Some(details),
            ..Self::new("VALIDATION_ERROR", message)
        }
    }
}

/// Field-level error for validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the field that failed validation.
    pub field: String,
    /// Error message for this field.
    pub message: String,
}

impl FieldError {
    /// Creates a new field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// API Error Response
// =============================================================================

/// API error response containing status code and error details.
#[derive(Debug, Clone)]
pub struct ApiErrorResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Error details.
    pub error: ApiError,
}

impl ApiErrorResponse {
    /// Creates a new API error response.
    #[must_use]
    pub const fn new(status: StatusCode, error: ApiError) -> Self {
        Self { status, error }
    }

    /// Creates a 400 Bad Request response.
    #[must_use]
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ApiError::new(code, message))
    }

    /// Creates a 400 Bad Request response for validation errors.
    #[must_use]
    pub fn validation_error(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ApiError::validation(message, details),
        )
    }

    /// Creates a 401 Unauthorized response.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ApiError::new("UNAUTHENTICATED", message),
        )
    }

    /// Creates a 403 Forbidden response for owner mismatches.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, ApiError::new("UNAUTHORIZED", message))
    }

    /// Creates a 404 Not Found response.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", message))
    }

    /// Creates a 409 Conflict response.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, ApiError::new("CONFLICT", message))
    }

    /// Creates a 503 Service Unavailable response for search outages.
    #[must_use]
    pub fn search_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ApiError::new("SEARCH_UNAVAILABLE", message),
        )
    }

    /// Creates a 500 Internal Server Error response.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::new("INTERNAL_ERROR", message),
        )
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<RepositoryError> for ApiErrorResponse {
    fn from(error: RepositoryError) -> Self {
        tracing::error!(error = %error, "Primary store operation failed");
        Self::internal_error("An internal error occurred")
    }
}

impl From<SearchError> for ApiErrorResponse {
    fn from(error: SearchError) -> Self {
        match error {
            SearchError::InvalidQuery(message) => Self::bad_request("INVALID_QUERY", message),
            SearchError::SearchUnavailable(_) => {
                Self::search_unavailable("Search is temporarily unavailable")
            }
        }
    }
}

impl From<ReconcileError> for ApiErrorResponse {
    fn from(error: ReconcileError) -> Self {
        match error {
            ReconcileError::AlreadyRunning => Self::conflict(error.to_string()),
            ReconcileError::Index(_) | ReconcileError::RepairQueue(_) => {
                tracing::error!(error = %error, "Reconciliation failed");
                Self::search_unavailable("Search index is unavailable")
            }
            ReconcileError::Repository(_) => {
                tracing::error!(error = %error, "Reconciliation failed");
                Self::internal_error("An internal error occurred")
            }
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Validation error type for request validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field-level errors.
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub const fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    /// Creates a validation error with a single field error.
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![FieldError::new(field, message)])
    }
}

impl From<ValidationError> for ApiErrorResponse {
    fn from(error: ValidationError) -> Self {
        Self::validation_error("Validation failed", error.errors)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::IndexError;
    use rstest::rstest;

    #[rstest]
    fn test_api_error_serializes_failure_envelope() {
        let json = serde_json::to_value(ApiError::new("NOT_FOUND", "Task not found.")).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "message": "Task not found.",
                "code": "NOT_FOUND",
            })
        );
    }

    #[rstest]
    fn test_validation_error_includes_details() {
        let response: ApiErrorResponse = ValidationError::single("title", "Title is required").into();

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error.code, "VALIDATION_ERROR");
        assert_eq!(response.error.details.unwrap()[0].field, "title");
    }

    #[rstest]
    #[case(SearchError::InvalidQuery("empty".to_string()), StatusCode::BAD_REQUEST, "INVALID_QUERY")]
    #[case(
        SearchError::SearchUnavailable("down".to_string()),
        StatusCode::SERVICE_UNAVAILABLE,
        "SEARCH_UNAVAILABLE"
    )]
    fn test_search_error_mapping(
        #[case] error: SearchError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        let response = ApiErrorResponse::from(error);

        assert_eq!(response.status, status);
        assert_eq!(response.error.code, code);
    }

    #[rstest]
    fn test_search_unavailable_hides_cause() {
        let response =
            ApiErrorResponse::from(SearchError::from(IndexError::Unavailable("10.0.0.7 refused".to_string())));

        assert!(!response.error.message.contains("10.0.0.7"));
    }

    #[rstest]
    fn test_repository_error_is_internal() {
        let response =
            ApiErrorResponse::from(RepositoryError::DatabaseError("connection reset".to_string()));

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.error.message, "An internal error occurred");
    }

    #[rstest]
    fn test_reconcile_already_running_is_conflict() {
        let response = ApiErrorResponse::from(ReconcileError::AlreadyRunning);

        assert_eq!(response.status, StatusCode::CONFLICT);
    }
}
