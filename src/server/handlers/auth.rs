use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64_URL;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::entitlement::Customer;
use crate::error::StorefrontError;
use crate::server::AppState;
use crate::server::util::bearer_token;

type HmacSha256 = Hmac<Sha256>;

pub const ADMIN_ROLE: &str = "admin";

const TOKEN_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl AccessTokenClaims {
    pub fn customer(&self) -> Customer {
        Customer {
            user_id: self.sub.clone(),
            email: self.email.clone(),
        }
    }
}

fn signer(secret: &str) -> Result<HmacSha256, StorefrontError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| StorefrontError::Config(format!("invalid jwt secret: {}", e)))
}

fn jwt_secret(app_state: &AppState) -> Result<&str, StorefrontError> {
    app_state
        .config
        .auth
        .secret()
        .ok_or_else(|| StorefrontError::Config("missing jwt secret (auth.jwt_secret or SF_JWT_SECRET)".into()))
}

pub fn issue_access_token(secret: &str, claims: &AccessTokenClaims) -> Result<String, StorefrontError> {
    let header = B64_URL.encode(TOKEN_HEADER);
    let payload = B64_URL.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);

    let mut mac = signer(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = B64_URL.encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", signing_input, signature))
}

/// Checks signature and expiry. Every failure maps to `Unauthorized`.
pub fn decode_access_token(secret: &str, token: &str) -> Result<AccessTokenClaims, StorefrontError> {
    let invalid = || StorefrontError::Unauthorized("invalid token".into());

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let header_json = B64_URL.decode(header).map_err(|_| invalid())?;
    let header_value: serde_json::Value = serde_json::from_slice(&header_json).map_err(|_| invalid())?;
    if header_value.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
        return Err(invalid());
    }

    let signature = B64_URL.decode(signature).map_err(|_| invalid())?;
    let mut mac = signer(secret)?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let payload = B64_URL.decode(payload).map_err(|_| invalid())?;
    let claims: AccessTokenClaims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
    if claims.exp <= Utc::now().timestamp() {
        return Err(StorefrontError::Unauthorized("token expired".into()));
    }
    Ok(claims)
}

pub fn ensure_access_token(
    app_state: &AppState,
    headers: &HeaderMap,
) -> Result<AccessTokenClaims, StorefrontError> {
    let Some(token) = bearer_token(headers) else {
        return Err(StorefrontError::Unauthorized("missing bearer token".into()));
    };
    decode_access_token(jwt_secret(app_state)?, &token)
}

/// Storefront entry point for signed-in users. Missing or rejected tokens
/// become a login redirect carrying `return_to`.
pub fn require_user(
    app_state: &AppState,
    headers: &HeaderMap,
    return_to: &str,
) -> Result<Customer, StorefrontError> {
    match ensure_access_token(app_state, headers) {
        Ok(claims) => Ok(claims.customer()),
        Err(StorefrontError::Unauthorized(reason)) => {
            tracing::debug!(return_to, "login required: {}", reason);
            Err(StorefrontError::LoginRequired {
                return_to: return_to.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Anonymous browsing is allowed; a bad token is treated as no token.
pub fn optional_user(app_state: &AppState, headers: &HeaderMap) -> Option<Customer> {
    bearer_token(headers)?;
    match ensure_access_token(app_state, headers) {
        Ok(claims) => Some(claims.customer()),
        Err(e) => {
            tracing::debug!("ignoring bearer token: {}", e);
            None
        }
    }
}

pub fn require_admin(
    app_state: &AppState,
    headers: &HeaderMap,
) -> Result<AccessTokenClaims, StorefrontError> {
    let claims = ensure_access_token(app_state, headers)?;
    if claims.role != ADMIN_ROLE {
        return Err(StorefrontError::Forbidden("permission denied".into()));
    }
    Ok(claims)
}
