// src/services/predictions.rs
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{PredictionError, Result};
use crate::models::{CacheStatus, DataSourceStatus, IndexInfo, PriceBar, Prediction, PredictionStats};
use super::daily_cache::DailyPredictionCache;
use super::db::{window_start, DbStore};
use super::engine::PredictionEngine;
use super::scheduler::PredictionScheduler;

pub const DEFAULT_HISTORY_WINDOW_DAYS: i64 = 30;
pub const MAX_HISTORY_WINDOW_DAYS: i64 = 365;

/// Read side of the service: store, then daily cache, then a live computation.
#[derive(Clone)]
pub struct PredictionService {
    engine: Arc<PredictionEngine>,
    cache: Arc<DailyPredictionCache>,
    scheduler: Arc<PredictionScheduler>,
}

impl PredictionService {
    pub fn new(
        engine: Arc<PredictionEngine>,
        cache: Arc<DailyPredictionCache>,
        scheduler: Arc<PredictionScheduler>,
    ) -> Self {
        Self { engine, cache, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<PredictionScheduler> {
        &self.scheduler
    }

    pub fn engine(&self) -> &Arc<PredictionEngine> {
        &self.engine
    }

    fn store(&self) -> Result<&Arc<DbStore>> {
        self.engine.store().ok_or(PredictionError::StoreUnavailable)
    }

    pub async fn get_prediction(&self, code: &str) -> Result<Prediction> {
        self.engine.instrument(code)?;
        let clock = self.engine.clock();
        let today = clock.today();

        if let Some(store) = self.engine.store() {
            match store.get_prediction(code, today).await {
                Ok(Some(prediction)) if prediction.prediction_date == today => {
                    info!("Serving today's stored prediction for {}", code);
                    return Ok(prediction);
                }
                Ok(_) => {}
                Err(e) => warn!("Store lookup for {} failed, falling back: {}", code, e),
            }
        }

        if let Some(prediction) = self.cache.get(code, clock.now()).await {
            info!("Serving cached prediction for {} (generated {})", code, prediction.generated_at);
            return Ok(prediction);
        }

        warn!("No stored or cached prediction for {}, computing live", code);
        let prediction = self.engine.compute(code).await.map_err(|e| match e {
            PredictionError::UnknownInstrument(_) => e,
            other => PredictionError::PredictionUnavailable {
                code: code.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.engine.persist(&prediction).await;
        Ok(prediction)
    }

    /// Never fails. Instruments that cannot be predicted are left out.
    pub async fn get_all_predictions(&self) -> HashMap<String, Prediction> {
        let clock = self.engine.clock();
        let today = clock.today();

        if let Some(store) = self.engine.store() {
            match store.get_predictions_for_date(today).await {
                Ok(rows) if !rows.is_empty() => {
                    info!("Serving {} stored predictions for {}", rows.len(), today);
                    return rows
                        .into_iter()
                        .filter(|(_, p)| p.prediction_date == today)
                        .collect();
                }
                Ok(_) => {}
                Err(e) => warn!("Store lookup for {} failed, falling back: {}", today, e),
            }
        }

        if let Some(batch) = self.cache.valid_batch(clock.now()).await {
            info!("Serving cached batch generated at {}", batch.generated_at);
            return batch.predictions.clone();
        }

        warn!("Store and cache are empty, computing predictions live");
        let mut predictions = HashMap::new();
        let codes: Vec<String> = self.engine.registry().iter().map(|i| i.code.clone()).collect();
        for code in codes {
            match self.engine.compute(&code).await {
                Ok(prediction) => {
                    self.engine.persist(&prediction).await;
                    predictions.insert(code, prediction);
                }
                Err(e) => warn!("Skipping {}: {}", code, e),
            }
        }
        predictions
    }

    pub async fn get_cache_status(&self) -> CacheStatus {
        self.cache.status(self.engine.clock().now()).await
    }

    /// Fire-and-forget manual refresh.
    pub fn trigger_refresh(&self) {
        info!("Manual prediction refresh requested");
        drop(self.scheduler.trigger_refresh());
    }

    pub async fn get_stats(&self) -> Result<PredictionStats> {
        self.store()?.prediction_stats().await
    }

    pub async fn get_prediction_history(&self, code: &str, days: i64) -> Result<Vec<Prediction>> {
        self.engine.instrument(code)?;
        let since = window_start(self.engine.clock().today(), clamp_window(days));
        self.store()?.get_predictions_since(Some(code), since).await
    }

    pub async fn get_all_prediction_history(&self, days: i64) -> Result<HashMap<String, Vec<Prediction>>> {
        let since = window_start(self.engine.clock().today(), clamp_window(days));
        let rows = self.store()?.get_predictions_since(None, since).await?;

        let mut grouped: HashMap<String, Vec<Prediction>> = HashMap::new();
        for prediction in rows {
            grouped.entry(prediction.code.clone()).or_default().push(prediction);
        }
        Ok(grouped)
    }

    pub async fn get_index_info(&self, code: &str) -> Result<IndexInfo> {
        self.engine.index_info(code).await
    }

    /// Quote summaries for every instrument whose quote could be fetched.
    pub async fn get_all_index_info(&self) -> HashMap<String, IndexInfo> {
        let mut infos = HashMap::new();
        let codes: Vec<String> = self.engine.registry().iter().map(|i| i.code.clone()).collect();
        for code in codes {
            match self.engine.index_info(&code).await {
                Ok(info) => {
                    infos.insert(code, info);
                }
                Err(e) => warn!("Skipping index info for {}: {}", code, e),
            }
        }
        infos
    }

    pub async fn get_history(&self, code: &str, period: &str) -> Result<Vec<PriceBar>> {
        self.engine.history_for_period(code, period).await
    }

    /// Reachability of the upstream quote feed and inference endpoint. Never fails.
    pub async fn get_data_source_status(&self) -> DataSourceStatus {
        self.engine.check_sources().await
    }
}

/// Out-of-range windows fall back to the default rather than failing.
pub fn clamp_window(days: i64) -> i64 {
    if (1..=MAX_HISTORY_WINDOW_DAYS).contains(&days) {
        days
    } else {
        DEFAULT_HISTORY_WINDOW_DAYS
    }
}
