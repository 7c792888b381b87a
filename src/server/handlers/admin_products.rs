use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use std::sync::Arc;

use super::auth::require_admin;
use crate::catalog::{CreateProductPayload, Product, UpdateProductPayload};
use crate::error::StorefrontError;
use crate::server::AppState;

// 未知的授权目标只告警，不拒绝
async fn warn_unknown_targets(app_state: &AppState, product: &Product) {
    let index = match app_state.stores.content.get_content_tree().await {
        Ok(record) => record.tree.target_index(),
        Err(e) => {
            tracing::warn!("content tree unavailable: {}", e);
            return;
        }
    };
    if index.is_empty() {
        return;
    }
    for target in product.target_ids.iter().filter(|t| !index.contains_key(*t)) {
        tracing::warn!(product_id = %product.id, target_id = %target, "product unlocks a target missing from the content tree");
    }
}

pub async fn list_products(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    require_admin(&app_state, &headers)?;
    let products = app_state.stores.catalog.list_products().await?;
    Ok(Json(serde_json::json!({ "products": products })))
}

pub async fn create_product(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateProductPayload>,
) -> Result<Json<Product>, StorefrontError> {
    let claims = require_admin(&app_state, &headers)?;
    let product = app_state.stores.catalog.create_product(payload).await?;
    warn_unknown_targets(&app_state, &product).await;
    tracing::info!(product_id = %product.id, by = %claims.email, "product created");
    Ok(Json(product))
}

pub async fn get_product(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Product>, StorefrontError> {
    require_admin(&app_state, &headers)?;
    let product = app_state
        .stores
        .catalog
        .get_product(&id)
        .await?
        .ok_or_else(|| StorefrontError::NotFound("product not found".into()))?;
    Ok(Json(product))
}

pub async fn update_product(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<UpdateProductPayload>,
) -> Result<Json<Product>, StorefrontError> {
    let claims = require_admin(&app_state, &headers)?;
    let product = app_state
        .stores
        .catalog
        .update_product(&id, payload)
        .await?
        .ok_or_else(|| StorefrontError::NotFound("product not found".into()))?;
    warn_unknown_targets(&app_state, &product).await;
    tracing::info!(product_id = %product.id, by = %claims.email, "product updated");
    Ok(Json(product))
}

pub async fn delete_product(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let claims = require_admin(&app_state, &headers)?;
    if !app_state.stores.catalog.delete_product(&id).await? {
        return Err(StorefrontError::NotFound("product not found".into()));
    }
    tracing::info!(product_id = %id, by = %claims.email, "product deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}
