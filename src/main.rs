// src/main.rs
use anyhow::Result;
use dotenv::dotenv;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

use index_forecast::build_service;
use index_forecast::config::AppConfig;
use index_forecast::routes;
use index_forecast::services::clock::SystemClock;
use index_forecast::services::db::DbStore;
use index_forecast::services::instruments::InstrumentRegistry;
use index_forecast::services::predictor::ChatPredictor;
use index_forecast::services::quote::TencentQuoteClient;

async fn open_store(config: &AppConfig) -> Option<Arc<DbStore>> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, running in cache-only mode");
        return None;
    };

    match DbStore::new(url, config.db_max_connections).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("Prediction store unavailable, running in cache-only mode: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();
    info!("Logger initialized. Starting the application...");

    let config = AppConfig::from_env()?;
    let store = open_store(&config).await;

    let quotes = Arc::new(TencentQuoteClient::new(config.quote.clone())?);
    let predictor = Arc::new(ChatPredictor::new(config.llm.clone())?);
    let service = build_service(
        &config,
        InstrumentRegistry::default_indices(),
        quotes,
        predictor,
        store.clone(),
        Arc::new(SystemClock),
    );

    let scheduler = Arc::clone(service.scheduler());
    let scheduler_task = scheduler.start();

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!("Will bind to: {}", addr);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_header("content-type")
        .allow_methods(vec!["GET", "POST", "OPTIONS"]);

    let api = routes::routes(service).with(cors).with(warp::log("index_forecast"));
    info!("Routes configured successfully with CORS.");

    let (bound, server) = warp::serve(api).bind_with_graceful_shutdown(addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    });
    info!("Starting server on {}", bound);
    server.await;

    scheduler.stop();
    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    if let Some(store) = store {
        store.close().await;
    }
    info!("Server stopped");
    Ok(())
}
