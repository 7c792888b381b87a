use axum::{
    Json,
    extract::{OriginalUri, Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::require_user;
use crate::cart::CartItem;
use crate::coupon::{CouponError, quote_coupon};
use crate::error::StorefrontError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub open: bool,
}

#[derive(Debug, Deserialize)]
pub struct CouponRequest {
    #[serde(default)]
    pub code: String,
}

pub async fn get_cart(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    Ok(Json(serde_json::json!({ "cart": cart.summary() })))
}

pub async fn clear_cart(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let mut cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    cart.clear();
    app_state.stores.carts.save_cart(&customer.user_id, &cart).await?;
    Ok(Json(serde_json::json!({ "cart": cart.summary() })))
}

/// Adding an item already in the cart is a no-op that still opens the cart.
pub async fn add_item(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(payload): Json<AddItemRequest>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let product = app_state
        .stores
        .catalog
        .get_product(&payload.product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| StorefrontError::NotFound("product not found".into()))?;

    let mut cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    let added = cart.add(CartItem::from(&product));
    app_state.stores.carts.save_cart(&customer.user_id, &cart).await?;
    tracing::debug!(user_id = %customer.user_id, product_id = %product.id, added, "cart add");

    Ok(Json(serde_json::json!({
        "added": added,
        "cart": cart.summary(),
    })))
}

pub async fn remove_item(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let mut cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    let removed = cart.remove(&id);
    if removed > 0 {
        app_state.stores.carts.save_cart(&customer.user_id, &cart).await?;
    }
    Ok(Json(serde_json::json!({
        "removed": removed,
        "cart": cart.summary(),
    })))
}

pub async fn set_open(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(payload): Json<OpenRequest>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let mut cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    cart.set_open(payload.open);
    app_state.stores.carts.save_cart(&customer.user_id, &cart).await?;
    Ok(Json(serde_json::json!({ "cart": cart.summary() })))
}

pub async fn apply_coupon(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(payload): Json<CouponRequest>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let mut cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    if cart.coupon().is_some() {
        return Err(CouponError::AlreadyApplied.into());
    }

    let quote = quote_coupon(app_state.stores.coupons.as_ref(), &payload.code, cart.total()).await?;
    let discount = cart.apply_coupon(quote.coupon)?;
    app_state.stores.carts.save_cart(&customer.user_id, &cart).await?;
    tracing::info!(user_id = %customer.user_id, discount, "cart coupon applied");

    Ok(Json(serde_json::json!({
        "discount": discount,
        "cart": cart.summary(),
    })))
}

pub async fn remove_coupon(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let mut cart = app_state.stores.carts.load_cart(&customer.user_id).await?;
    let removed = cart.remove_coupon();
    if removed.is_some() {
        app_state.stores.carts.save_cart(&customer.user_id, &cart).await?;
    }
    Ok(Json(serde_json::json!({
        "removed": removed.map(|c| c.code),
        "cart": cart.summary(),
    })))
}
