// src/services/engine.rs
use chrono::Datelike;
use log::{info, warn};
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::errors::{PredictionError, Result};
use crate::models::{
    round2, BarSource, DataSourceStatus, HistorySource, IndexInfo, Instrument, PriceBar, Prediction, SourceState,
    SourceStatus,
};
use super::clock::{is_weekend, Clock};
use super::db::DbStore;
use super::indicators::calculate_snapshot;
use super::instruments::InstrumentRegistry;
use super::predictor::{Forecast, Predictor};
use super::quote::{self, QuoteSource};
use super::ttl_cache::{forecast_key, history_key, quote_key, MarketMemo};

/// Quote → history → indicators → forecast pipeline for one instrument at a time.
pub struct PredictionEngine {
    registry: InstrumentRegistry,
    quotes: Arc<dyn QuoteSource>,
    predictor: Arc<dyn Predictor>,
    store: Option<Arc<DbStore>>,
    memo: MarketMemo,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl PredictionEngine {
    pub fn new(
        registry: InstrumentRegistry,
        quotes: Arc<dyn QuoteSource>,
        predictor: Arc<dyn Predictor>,
        store: Option<Arc<DbStore>>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            quotes,
            predictor,
            store,
            memo: MarketMemo::new(settings.cache_ttl),
            clock,
            settings,
        }
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    pub fn store(&self) -> Option<&Arc<DbStore>> {
        self.store.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn memo(&self) -> &MarketMemo {
        &self.memo
    }

    pub fn instrument(&self, code: &str) -> Result<&Instrument> {
        self.registry
            .get(code)
            .ok_or_else(|| PredictionError::UnknownInstrument(code.to_string()))
    }

    /// Live quote, memoized for the short-lived TTL. A fresh quote dated on a weekday is also written
    /// to `historical_data`.
    pub async fn current_bar(&self, instrument: &Instrument) -> Result<PriceBar> {
        let key = quote_key(&instrument.symbol);
        if let Some(bar) = self.memo.quotes.get(&key).await {
            return Ok(bar);
        }

        let bar = self.quotes.fetch_quote(instrument, self.clock.today()).await?;
        self.memo.quotes.insert(key, bar.clone()).await;

        match &self.store {
            Some(_) if is_weekend(bar.date) => {
                info!("Not storing {} bar for {}: no session on {}", instrument.code, bar.date, bar.date.weekday());
            }
            Some(store) => {
                if let Err(e) = store.upsert_bar(&instrument.code, &bar).await {
                    warn!("Failed to store live bar for {}: {}", instrument.code, e);
                }
            }
            None => {}
        }
        Ok(bar)
    }

    /// `days` bars ending with `live`. Stored bars are used once enough of them exist, otherwise synthetic.
    pub async fn history(&self, instrument: &Instrument, live: &PriceBar, days: usize) -> Vec<PriceBar> {
        let key = history_key(&instrument.symbol, days);
        if let Some(bars) = self.memo.histories.get(&key).await {
            return bars;
        }

        let bars = match self.stored_history(instrument, days).await {
            Some(bars) => bars,
            None => synthetic_history(live, days),
        };
        self.memo.histories.insert(key, bars.clone()).await;
        bars
    }

    async fn stored_history(&self, instrument: &Instrument, days: usize) -> Option<Vec<PriceBar>> {
        let store = self.store.as_ref()?;
        let min = self.settings.min_stored_bars;
        match store.get_recent_bars(&instrument.code, days.max(min)).await {
            Ok(mut bars) if !bars.is_empty() && bars.len() >= min => {
                let skip = bars.len().saturating_sub(days.max(1));
                bars.drain(..skip);
                info!("Using {} stored bars for {}", bars.len(), instrument.code);
                Some(bars)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Could not read stored bars for {}: {}", instrument.code, e);
                None
            }
        }
    }

    async fn forecast(&self, instrument: &Instrument, live: &PriceBar, history: &[PriceBar]) -> Result<Forecast> {
        let key = forecast_key(&instrument.symbol, live.close);
        if let Some(forecast) = self.memo.forecasts.get(&key).await {
            return Ok(forecast);
        }

        let snapshot = calculate_snapshot(history);
        let forecast = self.predictor.predict(live.close, &snapshot, history).await?;
        self.memo.forecasts.insert(key, forecast.clone()).await;
        Ok(forecast)
    }

    /// Run the whole pipeline for one instrument. Nothing is cached at the daily level or persisted here.
    pub async fn compute(&self, code: &str) -> Result<Prediction> {
        let instrument = self.instrument(code)?;
        let live = self.current_bar(instrument).await?;
        let history = self.history(instrument, &live, self.settings.history_days).await;
        let snapshot = calculate_snapshot(&history);
        let forecast = self.forecast(instrument, &live, &history).await?;

        let history_source = match history.first().map(|bar| bar.source) {
            Some(BarSource::Stored) => HistorySource::Stored,
            _ => HistorySource::Synthetic,
        };

        let current = live.close;
        let change = forecast.predicted_price - current;
        let change_percent = if current != 0.0 { change / current * 100.0 } else { 0.0 };

        let prediction = Prediction {
            code: instrument.code.clone(),
            name: instrument.name.clone(),
            prediction_date: self.clock.today(),
            current_price: round2(current),
            predicted_price: round2(forecast.predicted_price),
            predicted_change: round2(change),
            predicted_change_percent: round2(change_percent),
            confidence: round2(forecast.confidence),
            technical_indicators: snapshot,
            history_source,
            generated_at: self.clock.now(),
            actual_change: None,
            created_at: None,
            updated_at: None,
        };

        info!(
            "Prediction for {}: {:.2} -> {:.2} ({:+.2}%), confidence {:.1}, {} history",
            prediction.code,
            prediction.current_price,
            prediction.predicted_price,
            prediction.predicted_change_percent,
            prediction.confidence,
            prediction.history_source.as_str()
        );
        Ok(prediction)
    }

    /// Write a prediction to the store if there is one. Failures are logged, not returned.
    pub async fn persist(&self, prediction: &Prediction) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_prediction(prediction).await {
                warn!("Failed to save prediction for {}: {}", prediction.code, e);
            }
        }
    }

    pub async fn index_info(&self, code: &str) -> Result<IndexInfo> {
        let instrument = self.instrument(code)?;
        let bar = self.current_bar(instrument).await?;
        Ok(quote::index_info(instrument, &bar, self.clock.now()))
    }

    /// Bars for a named period (`1d`, `5d`, `1mo`, `3mo`, `6mo`, `1y`).
    pub async fn history_for_period(&self, code: &str, period: &str) -> Result<Vec<PriceBar>> {
        let instrument = self.instrument(code)?;
        let live = self.current_bar(instrument).await?;
        Ok(self.history(instrument, &live, quote::period_days(period)).await)
    }

    /// Check the quote feed (with the first tracked instrument) and the inference endpoint concurrently.
    pub async fn check_sources(&self) -> DataSourceStatus {
        let test_instrument = self.registry.iter().next();
        let quote_check = async {
            match test_instrument {
                Some(instrument) => self.quotes.check(instrument).await,
                None => SourceStatus::error("no instruments configured"),
            }
        };
        let (quote_feed, predictor) = tokio::join!(quote_check, self.predictor.check());

        let recommendation = recommendation(&quote_feed, &predictor);
        if quote_feed.is_connected() && predictor.is_connected() {
            info!("Data sources reachable");
        } else {
            warn!("Data source check: {}", recommendation);
        }

        DataSourceStatus {
            recommendation,
            test_code: test_instrument.map(|i| i.code.clone()),
            quote_feed,
            predictor,
            checked_at: self.clock.now(),
        }
    }

    pub async fn clear_short_lived(&self) {
        let dropped = self.memo.entry_count();
        self.memo.clear_all().await;
        info!("Cleared {} short-lived cache entries", dropped);
    }
}

fn recommendation(quote_feed: &SourceStatus, predictor: &SourceStatus) -> String {
    let problem = |name: &str, status: &SourceStatus| match status.status {
        SourceState::Connected => None,
        SourceState::RateLimited => Some(format!("{} is rate limiting requests", name)),
        SourceState::Error => Some(format!("{} is unreachable", name)),
    };

    let problems: Vec<String> = [problem("quote feed", quote_feed), problem("inference endpoint", predictor)]
        .into_iter()
        .flatten()
        .collect();
    if problems.is_empty() {
        "Live predictions available".to_string()
    } else {
        format!("{}; serve stored or cached predictions", problems.join(" and "))
    }
}

fn synthetic_history(live: &PriceBar, days: usize) -> Vec<PriceBar> {
    let mut rng = rand::thread_rng();
    quote::synthesize_history(live, days, &mut rng)
}
