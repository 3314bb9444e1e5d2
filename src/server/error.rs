use crate::error::WorkflowError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Unified error type for HTTP responses.
///
/// Workflow routes report failures inside a `WorkflowResponse`; this type
/// covers the routes that answer with a plain status code.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(WorkflowError::invalid_request(msg).into())
    }

    /// Construct a 404 Not Found error for a missing file.
    pub fn not_found(path: impl Into<std::path::PathBuf>) -> Self {
        Self(WorkflowError::missing_artifact(path).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<WorkflowError>() {
            Some(WorkflowError::InvalidRequest(_) | WorkflowError::InvalidUpload(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(WorkflowError::MissingArtifact { .. }) => StatusCode::NOT_FOUND,
            Some(WorkflowError::CollaboratorFailure { .. }) => StatusCode::BAD_GATEWAY,
            Some(WorkflowError::SweepFailure { .. } | WorkflowError::Storage { .. }) | None => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_400() {
        let response = AppError::bad_request("Invalid file name: ../x").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_artifact_maps_to_404() {
        let response = AppError::not_found("data/outputs/gone.pdf").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn collaborator_failure_maps_to_502() {
        let err = AppError::from(WorkflowError::collaborator(
            "report analysis",
            anyhow::anyhow!("exit 1"),
        ));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn storage_failure_maps_to_500() {
        let err = AppError::from(WorkflowError::Storage {
            path: "uploads".into(),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_workflow_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError::not_found("x.pdf").into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
