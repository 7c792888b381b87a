use axum::{
    Json,
    extract::{OriginalUri, Query, State},
    http::HeaderMap,
};
use std::sync::Arc;

use super::auth::{require_admin, require_user};
use crate::error::StorefrontError;
use crate::server::AppState;
use crate::server::util::PageQuery;

pub async fn my_orders(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let (limit, offset) = page.clamped();
    let orders = app_state
        .stores
        .orders
        .list_orders_for_user(&customer.user_id, limit, offset)
        .await?;
    Ok(Json(serde_json::json!({
        "orders": orders,
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn list_all(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    require_admin(&app_state, &headers)?;
    let (limit, offset) = page.clamped();
    let orders = app_state.stores.orders.list_orders(limit, offset).await?;
    Ok(Json(serde_json::json!({
        "orders": orders,
        "limit": limit,
        "offset": offset,
    })))
}
