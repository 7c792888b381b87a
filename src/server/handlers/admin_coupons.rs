use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::require_admin;
use crate::coupon::{Coupon, CreateCouponPayload, normalize_code};
use crate::error::StorefrontError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    /// Explicit state; omitted flips the current one.
    #[serde(default)]
    pub active: Option<bool>,
}

pub async fn list_coupons(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    require_admin(&app_state, &headers)?;
    let coupons = app_state.stores.coupons.list_coupons().await?;
    Ok(Json(serde_json::json!({ "coupons": coupons })))
}

pub async fn create_coupon(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateCouponPayload>,
) -> Result<Json<Coupon>, StorefrontError> {
    require_admin(&app_state, &headers)?;
    let coupon = app_state.stores.coupons.create_coupon(payload).await?;
    Ok(Json(coupon))
}

pub async fn toggle_coupon(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let claims = require_admin(&app_state, &headers)?;
    let code = normalize_code(&code);
    let current = app_state
        .stores
        .coupons
        .get_coupon(&code)
        .await?
        .ok_or_else(|| StorefrontError::NotFound("coupon not found".into()))?;

    let request: ToggleRequest = if body.is_empty() {
        ToggleRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| StorefrontError::Validation(format!("invalid toggle body: {}", e)))?
    };
    let active = request.active.unwrap_or(!current.active);
    app_state.stores.coupons.set_active(&code, active).await?;
    tracing::info!(code = %code, active, by = %claims.email, "coupon toggled");
    Ok(Json(serde_json::json!({ "code": code, "active": active })))
}

pub async fn delete_coupon(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let claims = require_admin(&app_state, &headers)?;
    let code = normalize_code(&code);
    if !app_state.stores.coupons.delete_coupon(&code).await? {
        return Err(StorefrontError::NotFound("coupon not found".into()));
    }
    tracing::info!(code = %code, by = %claims.email, "coupon deleted");
    Ok(Json(serde_json::json!({ "deleted": code })))
}
