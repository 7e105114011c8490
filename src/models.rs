// src/models.rs
use serde::{Serialize, Deserialize};
use chrono::{DateTime, NaiveDate, Utc};

/// One tracked stock index. Built once from configuration, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub market: String,
}

/// Where a price bar came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarSource {
    /// Parsed from the quote feed.
    Live,
    /// Random-walk filler built from a live quote. Not historical fact.
    Synthetic,
    /// Read back from `historical_data`.
    Stored,
}

impl BarSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarSource::Live => "live",
            BarSource::Synthetic => "synthetic",
            BarSource::Stored => "stored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub prev_close: f64,
    pub volume: i64,
    pub source: BarSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub ma5: f64,
    pub ma20: f64,
    pub rsi: f64,
    pub volatility: f64,
    pub trend: f64,
}

/// Which kind of bars fed the indicators of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistorySource {
    Stored,
    Synthetic,
}

impl HistorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistorySource::Stored => "stored",
            HistorySource::Synthetic => "synthetic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stored" => Some(HistorySource::Stored),
            "synthetic" => Some(HistorySource::Synthetic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub code: String,
    pub name: String,
    pub prediction_date: NaiveDate,
    pub current_price: f64,
    pub predicted_price: f64,
    pub predicted_change: f64,
    pub predicted_change_percent: f64,
    pub confidence: f64,
    pub technical_indicators: TechnicalSnapshot,
    pub history_source: HistorySource,
    pub generated_at: DateTime<Utc>,
    /// Realised next-day change, written later by an external job.
    pub actual_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub market: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub has_cache: bool,
    pub count: usize,
    pub generated_at: Option<DateTime<Utc>>,
    pub age_hours: i64,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionStats {
    pub total_verified: i64,
    pub correct_verified: i64,
    pub success_rate_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Connected,
    RateLimited,
    Error,
}

/// Result of one reachability check against an upstream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub status: SourceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceStatus {
    pub fn connected() -> Self {
        Self { status: SourceState::Connected, error: None }
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self { status: SourceState::RateLimited, error: Some(detail.into()) }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self { status: SourceState::Error, error: Some(detail.into()) }
    }

    pub fn is_connected(&self) -> bool {
        self.status == SourceState::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSourceStatus {
    pub quote_feed: SourceStatus,
    /// Instrument used for the quote feed check.
    pub test_code: Option<String>,
    pub predictor: SourceStatus,
    pub recommendation: String,
    pub checked_at: DateTime<Utc>,
}

/// Round to two decimals, the precision every published figure uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
