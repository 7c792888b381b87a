use axum::{Json, extract::State, http::HeaderMap};
use std::sync::Arc;

use super::auth::require_admin;
use crate::content::{ContentTree, ContentTreeRecord};
use crate::error::StorefrontError;
use crate::server::AppState;

pub async fn get_content(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ContentTreeRecord>, StorefrontError> {
    require_admin(&app_state, &headers)?;
    Ok(Json(app_state.stores.content.get_content_tree().await?))
}

pub async fn put_content(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(tree): Json<ContentTree>,
) -> Result<Json<ContentTreeRecord>, StorefrontError> {
    let claims = require_admin(&app_state, &headers)?;
    let record = app_state
        .stores
        .content
        .put_content_tree(tree, Some(claims.email.clone()))
        .await?;
    tracing::info!(
        subjects = record.tree.subjects.len(),
        by = %claims.email,
        "content tree published"
    );
    Ok(Json(record))
}
