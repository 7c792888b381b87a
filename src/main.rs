mod cart;
mod catalog;
mod checkout;
mod config;
mod content;
mod coupon;
mod enrollment;
mod entitlement;
mod error;
mod orders;
mod server;
mod storage;
mod stores;

use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(storage::time::IstTimer)
        .init();

    let config = config::Settings::load()?;

    // Use configured host/port to bind the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = server::create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Storefront server running on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
