//! DeepSeek-OCR service - document OCR and markdown conversion over HTTP.

mod api;
mod config;
mod model;
mod service;

use api::AppState;
use config::ServiceConfig;
use model::hub::HubModelLoader;
use model::runtime::RuntimeClient;
use service::OcrService;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deepseek_ocr_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    info!("Loaded config: {:?}", config);

    let runtime = RuntimeClient::new(&config.runtime_url, config.runtime_timeout)?;
    let loader = Arc::new(HubModelLoader::new(runtime));
    let service = Arc::new(OcrService::new(loader, config.scratch_dir.clone()));

    if config.preload {
        service.preload();
    }

    let app = api::router(AppState { service });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
