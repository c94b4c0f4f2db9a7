use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const DEV_USER_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the calling user from a HS256 bearer token, or from `x-user-id`
/// when dev overrides are on.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<Uuid> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(raw) = headers
            .get(DEV_USER_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            return Uuid::parse_str(raw.trim())
                .map_err(|_| AppError::Unauthorized("Invalid x-user-id header.".to_string()));
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Missing or invalid Authorization header.".to_string())
    })?;
    let secret = state
        .config
        .auth_jwt_secret
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Authentication is not configured.".to_string()))?;

    user_id_from_token(token, secret)
}

fn user_id_from_token(token: &str, secret: &str) -> AppResult<Uuid> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Rejected bearer token");
        AppError::Unauthorized("Invalid or expired token.".to_string())
    })?
    .claims;

    Uuid::parse_str(claims.sub.trim())
        .map_err(|_| AppError::Unauthorized("Token subject is not a user id.".to_string()))
}
