use axum::{
    Json,
    extract::{OriginalUri, Path, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;

use super::auth::require_user;
use crate::checkout::CheckoutReceipt;
use crate::error::StorefrontError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCheckoutRequest {
    pub product_id: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCheckoutRequest {
    /// Post-discount total the user saw and confirmed.
    pub confirmed_total: i64,
}

fn log_completed(receipt: &CheckoutReceipt) {
    tracing::info!(
        orders = receipt.orders.len(),
        payable = receipt.payable,
        payment_ref = receipt.payment_ref.as_deref().unwrap_or("-"),
        "checkout completed"
    );
}

// 结账放到独立任务里跑，客户端断开也不会中途取消
async fn run_detached<F>(checkout: F) -> Result<CheckoutReceipt, StorefrontError>
where
    F: Future<Output = Result<CheckoutReceipt, StorefrontError>> + Send + 'static,
{
    tokio::spawn(checkout)
        .await
        .map_err(|e| StorefrontError::Config(format!("checkout task failed: {}", e)))?
}

pub async fn quote(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ProductCheckoutRequest>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let (product, quote) = app_state
        .checkout
        .quote_product(&payload.product_id, payload.coupon_code.as_deref())
        .await?;
    Ok(Json(serde_json::json!({
        "product": product,
        "quote": quote,
    })))
}

pub async fn pay_product(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(payload): Json<ProductCheckoutRequest>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let checkout = app_state.checkout.clone();
    let receipt = run_detached(async move {
        checkout
            .pay_product(
                &customer,
                &payload.product_id,
                payload.coupon_code.as_deref(),
                log_completed,
            )
            .await
    })
    .await?;
    Ok(Json(serde_json::json!({ "receipt": receipt })))
}

pub async fn pay_cart(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(payload): Json<CartCheckoutRequest>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let checkout = app_state.checkout.clone();
    let receipt = run_detached(async move {
        checkout
            .pay_cart(&customer, payload.confirmed_total, log_completed)
            .await
    })
    .await?;
    Ok(Json(serde_json::json!({ "receipt": receipt })))
}

pub async fn retry_order(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let checkout = app_state.checkout.clone();
    let receipt = run_detached(async move {
        checkout
            .retry_order(&customer, &order_id, log_completed)
            .await
    })
    .await?;
    Ok(Json(serde_json::json!({ "receipt": receipt })))
}

pub async fn state(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    Ok(Json(serde_json::json!({
        "phase": app_state.checkout.phase(&customer.user_id),
    })))
}
