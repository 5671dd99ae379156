use super::actor::ActorError;
use crate::pipeline::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Error type for API handlers
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(msg) => AppError::BadRequest(msg),
            PipelineError::Token(_) => AppError::InternalServerError("failed to get token".to_string()),
            PipelineError::Transport(_) => {
                AppError::InternalServerError("failed to send request upstream".to_string())
            }
            PipelineError::Mirror(_) => {
                AppError::InternalServerError("failed to mirror to local store".to_string())
            }
        }
    }
}

impl From<ActorError> for AppError {
    fn from(e: ActorError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}
