// src/services/ttl_cache.rs
use moka::future::Cache;
use std::time::Duration;

use crate::models::PriceBar;
use super::predictor::Forecast;

const MAX_ENTRIES: u64 = 1000;

fn short_lived<V>(ttl: Duration) -> Cache<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder().time_to_live(ttl).max_capacity(MAX_ENTRIES).build()
}

/// The memo caches used by the fetch/predict pipeline, cleared together after each batch.
pub struct MarketMemo {
    /// `quote_<symbol>`
    pub quotes: Cache<String, PriceBar>,
    /// `<symbol>_<days>`
    pub histories: Cache<String, Vec<PriceBar>>,
    /// `forecast_<symbol>_<price>`
    pub forecasts: Cache<String, Forecast>,
}

impl MarketMemo {
    pub fn new(ttl: Duration) -> Self {
        Self {
            quotes: short_lived(ttl),
            histories: short_lived(ttl),
            forecasts: short_lived(ttl),
        }
    }

    pub async fn clear_all(&self) {
        self.quotes.invalidate_all();
        self.histories.invalidate_all();
        self.forecasts.invalidate_all();
        self.quotes.run_pending_tasks().await;
        self.histories.run_pending_tasks().await;
        self.forecasts.run_pending_tasks().await;
    }

    /// Entries still readable. Expired and invalidated ones are not counted.
    pub fn entry_count(&self) -> usize {
        self.quotes.iter().count() + self.histories.iter().count() + self.forecasts.iter().count()
    }
}

pub fn quote_key(symbol: &str) -> String {
    format!("quote_{}", symbol)
}

pub fn history_key(symbol: &str, days: usize) -> String {
    format!("{}_{}", symbol, days)
}

pub fn forecast_key(symbol: &str, current_price: f64) -> String {
    format!("forecast_{}_{:.2}", symbol, current_price)
}
