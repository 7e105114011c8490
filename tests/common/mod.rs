// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use index_forecast::build_service;
use index_forecast::config::AppConfig;
use index_forecast::errors::{PredictionError, Result};
use index_forecast::models::{BarSource, Instrument, PriceBar, SourceStatus, TechnicalSnapshot};
use index_forecast::services::clock::{Clock, ManualClock};
use index_forecast::services::db::DbStore;
use index_forecast::services::instruments::InstrumentRegistry;
use index_forecast::services::predictions::PredictionService;
use index_forecast::services::predictor::{Forecast, Predictor};
use index_forecast::services::quote::QuoteSource;

/// Friday 2024-05-10 15:10 in Shanghai.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 7, 10, 0).unwrap()
}

pub fn today() -> NaiveDate {
    start_time().date_naive()
}

/// Quote feed that serves fixed prices and can be told to fail per code.
pub struct FakeQuotes {
    prices: HashMap<String, f64>,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    calls: AtomicUsize,
}

impl FakeQuotes {
    pub fn new() -> Self {
        let prices = [("sh000001", 3000.0), ("sz399001", 9500.0), ("sz399006", 1900.0), ("sh000688", 950.0)]
            .into_iter()
            .map(|(code, price)| (code.to_string(), price))
            .collect();
        Self {
            prices,
            failing: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, code: &str) {
        self.failing.lock().unwrap().insert(code.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for FakeQuotes {
    async fn fetch_quote(&self, instrument: &Instrument, today: NaiveDate) -> Result<PriceBar> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&instrument.code) {
            return Err(PredictionError::Upstream(format!("feed down for {}", instrument.code)));
        }
        let close = *self
            .prices
            .get(&instrument.code)
            .ok_or_else(|| PredictionError::Parse(format!("no price for {}", instrument.code)))?;
        Ok(PriceBar {
            date: today,
            open: close * 0.998,
            high: close * 1.005,
            low: close * 0.995,
            close,
            prev_close: close - 10.0,
            volume: 1_000_000,
            source: BarSource::Live,
        })
    }

    async fn check(&self, _instrument: &Instrument) -> SourceStatus {
        if self.fail_all.load(Ordering::SeqCst) {
            SourceStatus::error("connection refused")
        } else {
            SourceStatus::connected()
        }
    }
}

/// Predicts +1% with 70 confidence, or fails when told to.
pub struct FakePredictor {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakePredictor {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for FakePredictor {
    async fn predict(&self, current_price: f64, _indicators: &TechnicalSnapshot, _history: &[PriceBar]) -> Result<Forecast> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PredictionError::Parse("model replied with prose".to_string()));
        }
        Ok(Forecast {
            predicted_price: current_price * 1.01,
            confidence: 70.0,
            reasoning: "steady".to_string(),
        })
    }

    async fn check(&self) -> SourceStatus {
        if self.failing.load(Ordering::SeqCst) {
            SourceStatus::rate_limited("too many requests")
        } else {
            SourceStatus::connected()
        }
    }
}

/// Moves one second forward every time it is read, so every timestamp is distinct.
pub struct TickingClock {
    millis: AtomicI64,
}

impl TickingClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.millis.fetch_add(1_000, Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms).unwrap()
    }
}

/// Wall clock driven by tokio's timer, so paused-time tests move it with `sleep`.
pub struct TokioClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + ChronoDuration::from_std(self.origin.elapsed()).unwrap()
    }
}

pub struct Harness {
    pub service: PredictionService,
    pub quotes: Arc<FakeQuotes>,
    pub predictor: Arc<FakePredictor>,
    pub store: Option<Arc<DbStore>>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.schedule.instrument_delay = Duration::ZERO;
    config.schedule.startup_delay = Duration::ZERO;
    config
}

pub async fn harness_with(with_store: bool, clock: Arc<dyn Clock>, config: AppConfig) -> Harness {
    let quotes = Arc::new(FakeQuotes::new());
    let predictor = Arc::new(FakePredictor::new());
    let store = if with_store {
        Some(Arc::new(DbStore::in_memory().await.unwrap()))
    } else {
        None
    };
    let service = build_service(
        &config,
        InstrumentRegistry::default_indices(),
        quotes.clone(),
        predictor.clone(),
        store.clone(),
        clock,
    );
    Harness { service, quotes, predictor, store }
}

pub async fn harness(with_store: bool) -> (Harness, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let h = harness_with(with_store, clock.clone(), test_config()).await;
    (h, clock)
}

pub fn days_before_today(n: i64) -> NaiveDate {
    today() - ChronoDuration::days(n)
}
