//! auth.rs
//!
//! API token lifecycle plus the cross-deployment user sync:
//! - token issue against username/email + password, one active token per
//!   user (a reissue overwrites the previous value);
//! - refresh and revoke under token auth;
//! - admin-only user dump/upsert used to mirror accounts between
//!   deployments.

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::ApiUser;
use crate::models::user::{generate_token_value, SecurityLevel, User};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/token", post(issue_token))
        .route("/token/refresh", post(refresh_token))
        .route("/token/revoke", post(revoke_token))
        .route("/users/sync", get(dump_users))
        .route("/users/update", post(upsert_users))
}

async fn store_token(
    state: &AppState,
    user_id: i32,
) -> Result<(String, chrono::DateTime<Utc>), ApiError> {
    let token = generate_token_value();
    let expires_at = Utc::now() + Duration::days(state.config.auth.token_expiry_days);

    sqlx::query(
        "UPDATE users SET api_token = $1, token_expiry = $2, updated_at = NOW() WHERE id = $3",
    )
    .bind(&token)
    .bind(expires_at)
    .bind(user_id)
    .execute(&state.db.pool)
    .await?;

    Ok((token, expires_at))
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    username: String,
    password: String,
}

// POST /api/token
async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password are required".to_string(),
        ));
    }

    let user = User::find_by_username_or_email(&req.username, &state.db.pool)
        .await?
        .filter(|u| u.verify_password(&req.password))
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    let (token, expires_at) = store_token(&state, user.id).await?;
    tracing::info!("Issued API token for {}", user.username);

    Ok(Json(json!({
        "success": true,
        "token": token,
        "expires_at": expires_at
    })))
}

// POST /api/token/refresh
async fn refresh_token(
    State(state): State<Arc<AppState>>,
    auth: ApiUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (token, expires_at) = store_token(&state, auth.user.id).await?;
    Ok(Json(json!({
        "success": true,
        "token": token,
        "expires_at": expires_at
    })))
}

// POST /api/token/revoke
async fn revoke_token(
    State(state): State<Arc<AppState>>,
    auth: ApiUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    sqlx::query(
        "UPDATE users SET api_token = NULL, token_expiry = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(auth.user.id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Token revoked successfully"
    })))
}

// GET /api/users/sync — full dump for a peer deployment, admin only
async fn dump_users(
    State(state): State<Arc<AppState>>,
    auth: ApiUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !auth.user.has_permission_level(SecurityLevel::Admin) {
        return Err(ApiError::Forbidden("Insufficient permissions".to_string()));
    }

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(&state.db.pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "users": users.iter().map(|u| u.to_sync_record()).collect::<Vec<_>>()
    })))
}

#[derive(Debug, Deserialize)]
struct IncomingUser {
    username: Option<String>,
    email: Option<String>,
    password_hash: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    security_level: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct UpsertUsersRequest {
    users: Vec<IncomingUser>,
}

// POST /api/users/update — upsert users from a peer deployment. Matching is
// by email first; username collisions with a different account are skipped
// rather than clobbered.
async fn upsert_users(
    State(state): State<Arc<AppState>>,
    auth: ApiUser,
    Json(req): Json<UpsertUsersRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !auth.user.has_permission_level(SecurityLevel::Admin) {
        return Err(ApiError::Forbidden("Insufficient permissions".to_string()));
    }

    let mut created = 0u64;
    let mut updated = 0u64;
    let mut skipped = 0u64;
    let mut errors: Vec<String> = Vec::new();

    let mut tx = state.db.pool.begin().await?;

    for incoming in &req.users {
        let (Some(username), Some(email), Some(password_hash)) = (
            incoming.username.as_deref(),
            incoming.email.as_deref(),
            incoming.password_hash.as_deref(),
        ) else {
            skipped += 1;
            errors.push(format!(
                "Missing required fields for user: {}",
                incoming.username.as_deref().unwrap_or("unknown")
            ));
            continue;
        };

        let by_email: Option<(i32,)> =
            sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;
        let by_username: Option<(i32,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&mut *tx)
                .await?;

        match (by_email, by_username) {
            (Some((email_id,)), username_match) => {
                // username moves with the user unless another account
                // already holds it
                let username_conflicts =
                    matches!(username_match, Some((other_id,)) if other_id != email_id);
                if username_conflicts {
                    tracing::warn!(
                        "Username '{}' already belongs to another user; updating {} without it",
                        username,
                        email
                    );
                }

                sqlx::query(
                    "UPDATE users SET \
                       username = CASE WHEN $1 THEN username ELSE $2 END, \
                       password_hash = $3, first_name = $4, last_name = $5, \
                       security_level = $6, updated_at = NOW() \
                     WHERE id = $7",
                )
                .bind(username_conflicts)
                .bind(username)
                .bind(password_hash)
                .bind(&incoming.first_name)
                .bind(&incoming.last_name)
                .bind(incoming.security_level.unwrap_or(SecurityLevel::User.as_i32()))
                .bind(email_id)
                .execute(&mut *tx)
                .await?;

                if username_conflicts {
                    skipped += 1;
                } else {
                    updated += 1;
                }
            }
            (None, Some(_)) => {
                tracing::warn!(
                    "Skipping user creation for {}: username '{}' already exists",
                    email,
                    username
                );
                skipped += 1;
            }
            (None, None) => {
                sqlx::query(
                    "INSERT INTO users \
                       (username, email, password_hash, first_name, last_name, security_level) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(username)
                .bind(email)
                .bind(password_hash)
                .bind(&incoming.first_name)
                .bind(&incoming.last_name)
                .bind(incoming.security_level.unwrap_or(SecurityLevel::User.as_i32()))
                .execute(&mut *tx)
                .await?;
                created += 1;
            }
        }
    }

    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "created": created,
        "updated": updated,
        "skipped": skipped,
        "errors": errors
    })))
}
