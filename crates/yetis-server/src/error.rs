//! Maps every library error kind onto an HTTP response (§7 "Propagation"):
//! 400 for validation/resource conflicts, 404 for missing names, 5xx for
//! transient/fatal failures. Grounded on the teacher's `server/src/error.rs`
//! pattern of one `ApiError` per binary, `IntoResponse`-derived.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use yetis_common::ValidationError;
use yetis_forward::ForwardError;
use yetis_restart::RestartError;
use yetis_store::{DeploymentStoreError, ServiceStoreError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<DeploymentStoreError> for ApiError {
    fn from(e: DeploymentStoreError) -> Self {
        match e {
            DeploymentStoreError::AlreadyExists(_) => ApiError::Conflict(e.to_string()),
            DeploymentStoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
        }
    }
}

impl From<ServiceStoreError> for ApiError {
    fn from(e: ServiceStoreError) -> Self {
        match e {
            ServiceStoreError::AlreadyExists(_) => ApiError::Conflict(e.to_string()),
            ServiceStoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
        }
    }
}

impl From<ForwardError> for ApiError {
    fn from(e: ForwardError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<RestartError> for ApiError {
    fn from(e: RestartError) -> Self {
        match e {
            RestartError::Validation(_) => ApiError::BadRequest(e.to_string()),
            RestartError::AlreadyExists(_) => ApiError::Conflict(e.to_string()),
            RestartError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RestartError::FixedPortInUse(_) => ApiError::Conflict(e.to_string()),
            RestartError::IncompatibleApply(_) => ApiError::Conflict(e.to_string()),
            RestartError::Netutil(_)
            | RestartError::Store(_)
            | RestartError::Launch(_)
            | RestartError::Terminate(_)
            | RestartError::Forward(_)
            | RestartError::SuccessorNeverBecameRunning(_) => ApiError::Internal(e.to_string()),
        }
    }
}
