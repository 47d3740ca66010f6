//! Token authentication.
//!
//! Clients send `Authorization: Bearer <token>`; the older `Token <token>`
//! scheme is accepted as well. A request without the header is anonymous.
//! A header that is present but malformed, or names an unknown token, is
//! rejected outright even on public endpoints.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::{info, warn};

use crate::domain::password::verify_password;
use crate::domain::{FieldErrors, Principal};
use crate::error::AppError;
use crate::storage::{TokenRepository, UserRepository};

const SCHEMES: [&str; 2] = ["Bearer", "Token"];
const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Clone)]
pub struct Authenticator {
    tokens: TokenRepository,
    users: UserRepository,
}

impl Authenticator {
    pub fn new(tokens: TokenRepository, users: UserRepository) -> Self {
        Self { tokens, users }
    }

    /// Resolve the request's principal, `None` for anonymous requests
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>, AppError> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };

        let key = value
            .to_str()
            .ok()
            .and_then(token_from_header)
            .ok_or_else(|| {
                warn!("Rejecting malformed Authorization header");
                AppError::Unauthenticated
            })?;

        match self.tokens.principal_for(key).await? {
            Some(principal) => Ok(Some(principal)),
            None => {
                warn!("Rejecting unknown token");
                Err(AppError::Unauthenticated)
            }
        }
    }

    /// Exchange credentials for the user's token
    pub async fn issue_token(&self, username: &str, password: &str) -> Result<String, AppError> {
        let credentials = self.users.find_credentials(username).await?;

        let principal = match credentials {
            Some(found)
                if found
                    .password_hash
                    .as_deref()
                    .is_some_and(|hash| verify_password(password, hash)) =>
            {
                found.principal
            }
            _ => {
                warn!("Failed token exchange for '{}'", username);
                return Err(FieldErrors::single(
                    NON_FIELD_ERRORS,
                    "Unable to log in with provided credentials.",
                )
                .into());
            }
        };

        let token = self.tokens.get_or_create(principal.id).await?;
        info!("Issued token for user {}", principal.id);
        Ok(token)
    }
}

fn token_from_header(value: &str) -> Option<&str> {
    let (scheme, key) = value.trim().split_once(' ')?;
    let key = key.trim();
    if !SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)) || key.is_empty() || key.contains(' ') {
        return None;
    }
    Some(key)
}

/// The authenticated principal of a request, if any.
pub struct Caller(pub Option<Principal>);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    Authenticator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = Authenticator::from_ref(state);
        authenticator.authenticate(&parts.headers).await.map(Caller)
    }
}
