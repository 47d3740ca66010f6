//! # Error Taxonomy
//!
//! Every failure a request can hit is an [`AppError`]. Handlers return
//! `Result<_, AppError>` and the `IntoResponse` impl picks the status code
//! and JSON body, so no error ever escapes the request that caused it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::ErrorResponse;
use thiserror::Error;
use tracing::error;

use crate::domain::validation::FieldErrors;

#[derive(Debug, Error)]
pub enum AppError {
    /// One or more fields violate a constraint (400, field-keyed body)
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    /// The request itself could not be understood (400)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401)
    #[error("authentication credentials were not provided or are invalid")]
    Unauthenticated,

    /// The caller is known but may not perform the operation (403)
    #[error("you do not have permission to perform this action")]
    Forbidden,

    /// No record at the key, or the caller may not know it exists (404)
    #[error("not found")]
    NotFound,

    /// Page number past the last page (404)
    #[error("Invalid page.")]
    InvalidPage,

    /// Store or other infrastructure failure (500)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound | AppError::InvalidPage => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        AppError::Validation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Validation(errors) => (status, Json(errors.into_response_body())).into_response(),
            AppError::BadRequest(message) => {
                (status, Json(ErrorResponse { error: message })).into_response()
            }
            AppError::Internal(err) => {
                error!("Internal error: {:?}", err);
                let body = ErrorResponse {
                    error: "Internal server error".to_string(),
                };
                (status, Json(body)).into_response()
            }
            other => {
                let body = ErrorResponse {
                    error: other.to_string(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
