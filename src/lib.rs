// src/lib.rs
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::clock::Clock;
use crate::services::daily_cache::DailyPredictionCache;
use crate::services::db::DbStore;
use crate::services::engine::PredictionEngine;
use crate::services::instruments::InstrumentRegistry;
use crate::services::predictions::PredictionService;
use crate::services::predictor::Predictor;
use crate::services::quote::QuoteSource;
use crate::services::scheduler::PredictionScheduler;

/// Wire the engine, daily cache, scheduler and query service together.
pub fn build_service(
    config: &AppConfig,
    registry: InstrumentRegistry,
    quotes: Arc<dyn QuoteSource>,
    predictor: Arc<dyn Predictor>,
    store: Option<Arc<DbStore>>,
    clock: Arc<dyn Clock>,
) -> PredictionService {
    let engine = Arc::new(PredictionEngine::new(
        registry,
        quotes,
        predictor,
        store,
        clock,
        config.engine.clone(),
    ));
    let cache = Arc::new(DailyPredictionCache::new(config.schedule.batch_ttl));
    let scheduler = Arc::new(PredictionScheduler::new(
        Arc::clone(&engine),
        Arc::clone(&cache),
        config.schedule.clone(),
    ));
    PredictionService::new(engine, cache, scheduler)
}
