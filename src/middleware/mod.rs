use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::user::User;

/// Staff identity established from Basic auth. Username or email both work
/// as the login.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub security_level: i32,
}

impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing credentials".to_string()))?;

        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or_else(|| ApiError::Unauthorized("Basic auth required".to_string()))?;

        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| ApiError::Unauthorized("Invalid credentials".to_string()))?;
        let credentials = String::from_utf8(decoded)
            .map_err(|_| ApiError::Unauthorized("Invalid credentials".to_string()))?;

        let mut split = credentials.splitn(2, ':');
        let login = split
            .next()
            .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;
        let password = split
            .next()
            .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

        let user = User::find_by_username_or_email(login, &state.db.pool)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Invalid username or password".to_string()))?;

        if !user.verify_password(password) {
            return Err(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }

        Ok(AuthUser {
            id: user.id,
            username: user.username,
            email: user.email,
            security_level: user.security_level,
        })
    }
}

/// Programmatic identity established from the `X-API-Token` header. Expired
/// and mismatched tokens are rejected with the same message.
#[derive(Debug, Clone)]
pub struct ApiUser {
    pub user: User,
}

impl FromRequestParts<Arc<crate::AppState>> for ApiUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("X-API-Token")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("API token is missing".to_string()))?;

        let user = User::find_by_api_token(token, &state.db.pool)
            .await?
            .filter(|u| u.check_api_token(token, chrono::Utc::now()))
            .ok_or_else(|| {
                ApiError::Unauthorized("Invalid or expired API token".to_string())
            })?;

        Ok(ApiUser { user })
    }
}
