use axum::{Json, extract::State, http::HeaderMap};
use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::{ADMIN_ROLE, AccessTokenClaims, ensure_access_token, issue_access_token};
use crate::error::{Result as AppResult, StorefrontError};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub expires_at: String,
    pub user: AuthUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub expires_at: String,
    pub user: AuthUser,
}

fn env_required(name: &'static str) -> Result<String, StorefrontError> {
    std::env::var(name).map_err(|_| StorefrontError::Config(format!("missing env `{}`", name)))
}

fn env_optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn claims_to_user(claims: &AccessTokenClaims) -> AuthUser {
    AuthUser {
        id: claims.sub.clone(),
        email: claims.email.clone(),
        role: claims.role.clone(),
    }
}

/// Admin login against `SF_ADMIN_EMAIL` / `SF_ADMIN_PASSWORD`. Learner
/// tokens are issued elsewhere with the same secret.
pub async fn login(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let expected_email = env_required("SF_ADMIN_EMAIL")?;
    let expected_password = env_required("SF_ADMIN_PASSWORD")?;

    if payload.email != expected_email || payload.password != expected_password {
        tracing::warn!(email = %payload.email, "admin login rejected");
        return Err(StorefrontError::Unauthorized("invalid credentials".into()));
    }

    let secret = app_state
        .config
        .auth
        .secret()
        .ok_or_else(|| StorefrontError::Config("missing jwt secret".into()))?;

    let now = Utc::now();
    let exp = now + Duration::seconds(app_state.config.auth.token_ttl_secs as i64);
    let claims = AccessTokenClaims {
        sub: env_optional("SF_ADMIN_ID").unwrap_or_else(|| "admin".into()),
        email: expected_email,
        role: ADMIN_ROLE.into(),
        exp: exp.timestamp(),
        iat: Some(now.timestamp()),
    };

    let token = issue_access_token(secret, &claims)?;
    tracing::info!(email = %claims.email, "admin logged in");
    Ok(Json(LoginResponse {
        access_token: token,
        expires_at: exp.to_rfc3339(),
        user: claims_to_user(&claims),
    }))
}

pub async fn me(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<MeResponse>> {
    let claims = ensure_access_token(&app_state, &headers)?;
    let exp = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    Ok(Json(MeResponse {
        expires_at: exp.to_rfc3339(),
        user: claims_to_user(&claims),
    }))
}
