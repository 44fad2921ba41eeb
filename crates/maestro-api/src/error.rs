//! API error types and HTTP response mapping.
//!
//! Errors are returned as the standard body:
//!
//! ```json
//! {"errors": [{"id": "bad_request", "status": 400, "title": "Bad Request", "detail": "..."}]}
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// One error entry in the wire body.
#[derive(Debug, Serialize)]
pub struct ApiErrorEntry {
    /// Stable machine-readable identifier.
    pub id: &'static str,
    /// HTTP status code.
    pub status: u16,
    /// Short human-readable title.
    pub title: &'static str,
    /// Request-specific detail.
    pub detail: String,
}

/// The wire error body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// The errors carried by the response.
    pub errors: Vec<ApiErrorEntry>,
}

/// An HTTP API error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    id: &'static str,
    title: &'static str,
    detail: String,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", "Bad Request", detail)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Not Found", detail)
    }

    /// Returns an error response for conflicts with living tasks or
    /// in-progress updates.
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", "Conflict", detail)
    }

    /// Returns an error response for forbidden state transitions.
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", "Forbidden", detail)
    }

    /// Returns an internal error response.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_server_error",
            "Internal Server Error",
            detail,
        )
    }

    fn new(
        status: StatusCode,
        id: &'static str,
        title: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            id,
            title,
            detail: detail.into(),
        }
    }

    /// Returns the HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            errors: vec![ApiErrorEntry {
                id: self.id,
                status: self.status.as_u16(),
                title: self.title,
                detail: self.detail,
            }],
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<maestro_tasks::Error> for ApiError {
    fn from(err: maestro_tasks::Error) -> Self {
        match &err {
            maestro_tasks::Error::AnotherLivingTaskAlreadyExists { .. } => {
                Self::conflict(err.to_string())
            }
            maestro_tasks::Error::TaskNotFound { .. }
            | maestro_tasks::Error::StepNotFound { .. } => Self::not_found(err.to_string()),
            maestro_tasks::Error::InvalidStepTransition { .. } => Self::forbidden(err.to_string()),
            maestro_tasks::Error::InvalidStatusTransition { .. }
            | maestro_tasks::Error::TaskDataNotFound { .. }
            | maestro_tasks::Error::InvalidEnumValue { .. } => Self::bad_request(err.to_string()),
            maestro_tasks::Error::Deployments(inner) if inner.is_not_found() => {
                Self::not_found(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<maestro_deployments::Error> for ApiError {
    fn from(err: maestro_deployments::Error) -> Self {
        if err.is_not_found() {
            Self::not_found(err.to_string())
        } else {
            match err {
                maestro_deployments::Error::InvalidEnumValue { .. }
                | maestro_deployments::Error::MissingRequiredProperty { .. }
                | maestro_deployments::Error::InvalidFunction { .. }
                | maestro_deployments::Error::InvalidStep { .. } => {
                    Self::bad_request(err.to_string())
                }
                other => Self::internal(other.to_string()),
            }
        }
    }
}

impl From<maestro_core::Error> for ApiError {
    fn from(err: maestro_core::Error) -> Self {
        match &err {
            maestro_core::Error::NotFound(_) => Self::not_found(err.to_string()),
            maestro_core::Error::InvalidId { .. } | maestro_core::Error::InvalidInput(_) => {
                Self::bad_request(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn living_task_conflict_maps_to_409() {
        let err: ApiError = maestro_tasks::Error::AnotherLivingTaskAlreadyExists {
            living_task_id: maestro_core::TaskId::generate(),
            living_task_type: "Deploy".into(),
            target_id: "dep-1".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn step_transition_maps_to_403() {
        let err: ApiError = maestro_tasks::Error::InvalidStepTransition {
            from: "done".into(),
            to: "running".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
