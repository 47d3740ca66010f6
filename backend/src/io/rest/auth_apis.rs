//! # REST API for Token Exchange

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use shared::{TokenRequest, TokenResponse};
use tracing::info;

use super::auth::Authenticator;
use crate::error::AppError;

/// POST /api/auth-token/
pub async fn obtain_auth_token(
    State(authenticator): State<Authenticator>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    info!("POST /api/auth-token/ - username: {}", request.username);

    let token = authenticator
        .issue_token(&request.username, &request.password)
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse { token })))
}
