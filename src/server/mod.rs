pub mod handlers;
pub(crate) mod util;

use crate::checkout::CheckoutService;
use crate::checkout::gateway::SimulatedGateway;
use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::storage::Database;
use crate::stores::Stores;
use axum::Router;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Settings,
    pub stores: Stores,
    pub checkout: Arc<CheckoutService>,
}

impl AppState {
    pub fn new(config: Settings, stores: Stores) -> Self {
        let gateway = Arc::new(SimulatedGateway::from_config(&config.checkout));
        let checkout = Arc::new(CheckoutService::new(stores.clone(), gateway));
        Self {
            config,
            stores,
            checkout,
        }
    }
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    let db = Arc::new(Database::new(&config.storage.database_path).await?);
    tracing::info!("Using SQLite at {}", config.storage.database_path);

    if config.auth.secret().is_none() {
        tracing::warn!("未配置 auth.jwt_secret / SF_JWT_SECRET，所有需要登录的接口都会返回 500");
    }

    let app_state = AppState::new(config, Stores::sqlite(db));
    Ok(build_router(Arc::new(app_state)))
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let routes = handlers::routes();
    let mut app = Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .with_state(app_state);

    // CORS（开发环境便于前端联调；生产应收敛来源并仅 HTTPS）
    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);
    app = app
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    app
}
