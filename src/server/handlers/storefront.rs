use axum::{
    Json,
    extract::{OriginalUri, Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

use super::auth::{optional_user, require_user};
use crate::catalog::{Product, find_by_target, storefront_view};
use crate::entitlement::{Customer, OwnershipReport};
use crate::error::StorefrontError;
use crate::server::AppState;

fn with_owned(product: &Product, owned: bool) -> Result<serde_json::Value, StorefrontError> {
    let mut value = serde_json::to_value(product)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("owned".into(), serde_json::Value::Bool(owned));
    }
    Ok(value)
}

async fn storefront_ownership(
    app_state: &AppState,
    customer: &Customer,
) -> Result<(Vec<Product>, OwnershipReport), StorefrontError> {
    let products = storefront_view(&app_state.stores.catalog.list_products().await?);
    let report = app_state
        .stores
        .resolver()
        .resolve(customer, &products)
        .await?;
    Ok((products, report))
}

pub async fn list_products(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let (products, report) = match optional_user(&app_state, &headers) {
        Some(customer) => storefront_ownership(&app_state, &customer).await?,
        None => (
            storefront_view(&app_state.stores.catalog.list_products().await?),
            OwnershipReport::default(),
        ),
    };

    let items = products
        .iter()
        .map(|p| with_owned(p, report.is_owned(&p.id)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(serde_json::json!({ "products": items })))
}

/// Upsell for a locked target: the first active product that unlocks it.
pub async fn target_offer(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(target_id): Path<String>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let products = app_state.stores.catalog.list_products().await?;
    let Some(product) = find_by_target(&products, &target_id) else {
        return Err(StorefrontError::NotFound(format!(
            "no product unlocks `{}`",
            target_id
        )));
    };

    let owned = match optional_user(&app_state, &headers) {
        Some(customer) => {
            app_state
                .stores
                .resolver()
                .has_access(&customer, &target_id)
                .await?
        }
        None => false,
    };

    Ok(Json(serde_json::json!({
        "target_id": target_id,
        "owned": owned,
        "product": product,
    })))
}

pub async fn access(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(target_id): Path<String>,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let granted = app_state
        .stores
        .resolver()
        .has_access(&customer, &target_id)
        .await?;
    Ok(Json(serde_json::json!({
        "target_id": target_id,
        "access": granted,
    })))
}

pub async fn ownership(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let (products, report) = storefront_ownership(&app_state, &customer).await?;
    let owned: Vec<&str> = products
        .iter()
        .filter(|p| report.is_owned(&p.id))
        .map(|p| p.id.as_str())
        .collect();
    Ok(Json(serde_json::json!({
        "owned": owned,
        "backfilled": report.backfilled,
    })))
}

/// Pushes recomputed storefront ownership every time this user finishes a
/// checkout.
pub async fn ownership_events(
    State(app_state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StorefrontError> {
    let customer = require_user(&app_state, &headers, uri.path())?;
    let user_id = customer.user_id.clone();
    let receiver = app_state.checkout.subscribe();
    tracing::debug!(user_id = %user_id, "ownership stream opened");

    let stream = BroadcastStream::new(receiver)
        .filter_map(move |msg| {
            let user_id = user_id.clone();
            async move {
                match msg {
                    Ok(completed) if completed.user_id == user_id => Some(completed),
                    Ok(_) => None,
                    Err(e) => {
                        // 落后的订阅者直接丢弃旧事件，下一次完成事件会带上全量所有权
                        tracing::warn!(user_id = %user_id, "ownership stream lagged: {}", e);
                        None
                    }
                }
            }
        })
        .then(move |completed| {
            let app_state = app_state.clone();
            let customer = customer.clone();
            async move {
                let event = match storefront_ownership(&app_state, &customer).await {
                    Ok((products, report)) => {
                        let owned: Vec<&str> = products
                            .iter()
                            .filter(|p| report.is_owned(&p.id))
                            .map(|p| p.id.as_str())
                            .collect();
                        let body = serde_json::json!({
                            "order_ids": completed.order_ids,
                            "owned": owned,
                        });
                        Event::default().event("ownership").data(body.to_string())
                    }
                    Err(e) => {
                        tracing::error!(user_id = %customer.user_id, "ownership refresh failed: {}", e);
                        Event::default().event("error").data(e.to_string())
                    }
                };
                Ok::<_, Infallible>(event)
            }
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
