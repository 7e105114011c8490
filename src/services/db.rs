// src/services/db.rs
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::{PredictionError, Result};
use crate::models::{round2, BarSource, HistorySource, PredictionStats, PriceBar, Prediction, TechnicalSnapshot};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS predictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        index_code TEXT NOT NULL,
        index_name TEXT NOT NULL,
        prediction_date DATE NOT NULL,
        current_price REAL NOT NULL,
        predicted_price REAL NOT NULL,
        predicted_change REAL NOT NULL,
        predicted_change_percent REAL NOT NULL,
        confidence REAL NOT NULL,
        ma5 REAL NOT NULL,
        ma20 REAL NOT NULL,
        rsi REAL NOT NULL,
        volatility REAL NOT NULL,
        trend REAL NOT NULL,
        history_source TEXT NOT NULL,
        actual_change REAL,
        generated_at TIMESTAMP NOT NULL,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        UNIQUE (index_code, prediction_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS historical_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        index_code TEXT NOT NULL,
        date DATE NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        prev_close REAL NOT NULL,
        volume INTEGER NOT NULL,
        source TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        UNIQUE (index_code, date)
    )
    "#,
];

#[derive(Debug, FromRow)]
struct PredictionRow {
    index_code: String,
    index_name: String,
    prediction_date: NaiveDate,
    current_price: f64,
    predicted_price: f64,
    predicted_change: f64,
    predicted_change_percent: f64,
    confidence: f64,
    ma5: f64,
    ma20: f64,
    rsi: f64,
    volatility: f64,
    trend: f64,
    history_source: String,
    actual_change: Option<f64>,
    generated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PredictionRow> for Prediction {
    fn from(r: PredictionRow) -> Self {
        Prediction {
            code: r.index_code,
            name: r.index_name,
            prediction_date: r.prediction_date,
            current_price: r.current_price,
            predicted_price: r.predicted_price,
            predicted_change: r.predicted_change,
            predicted_change_percent: r.predicted_change_percent,
            confidence: r.confidence,
            technical_indicators: TechnicalSnapshot {
                ma5: r.ma5,
                ma20: r.ma20,
                rsi: r.rsi,
                volatility: r.volatility,
                trend: r.trend,
            },
            history_source: HistorySource::parse(&r.history_source).unwrap_or(HistorySource::Synthetic),
            generated_at: r.generated_at,
            actual_change: r.actual_change,
            created_at: Some(r.created_at),
            updated_at: Some(r.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct BarRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    prev_close: f64,
    volume: i64,
}

const PREDICTION_COLUMNS: &str = "index_code, index_name, prediction_date, current_price, predicted_price, \
    predicted_change, predicted_change_percent, confidence, ma5, ma20, rsi, volatility, trend, \
    history_source, actual_change, generated_at, created_at, updated_at";

pub struct DbStore {
    pub(crate) pool: SqlitePool,
}

impl DbStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("Connected to prediction store at {}", database_url);
        Ok(store)
    }

    /// Private in-memory database. One connection that never idles out, so the data lives as long as the store.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert or update the row for (code, date) in one statement.
    ///
    /// `created_at` survives updates, and a missing `actual_change` never erases a recorded one.
    pub async fn upsert_prediction(&self, p: &Prediction) -> Result<()> {
        let now = Utc::now();

        sqlx::query(&format!(
            r#"
            INSERT INTO predictions ({PREDICTION_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (index_code, prediction_date) DO UPDATE SET
                index_name = excluded.index_name,
                current_price = excluded.current_price,
                predicted_price = excluded.predicted_price,
                predicted_change = excluded.predicted_change,
                predicted_change_percent = excluded.predicted_change_percent,
                confidence = excluded.confidence,
                ma5 = excluded.ma5,
                ma20 = excluded.ma20,
                rsi = excluded.rsi,
                volatility = excluded.volatility,
                trend = excluded.trend,
                history_source = excluded.history_source,
                actual_change = COALESCE(excluded.actual_change, predictions.actual_change),
                generated_at = excluded.generated_at,
                updated_at = excluded.updated_at
            "#
        ))
        .bind(&p.code)
        .bind(&p.name)
        .bind(p.prediction_date)
        .bind(p.current_price)
        .bind(p.predicted_price)
        .bind(p.predicted_change)
        .bind(p.predicted_change_percent)
        .bind(p.confidence)
        .bind(p.technical_indicators.ma5)
        .bind(p.technical_indicators.ma20)
        .bind(p.technical_indicators.rsi)
        .bind(p.technical_indicators.volatility)
        .bind(p.technical_indicators.trend)
        .bind(p.history_source.as_str())
        .bind(p.actual_change)
        .bind(p.generated_at)
        .bind(p.created_at.unwrap_or(now))
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(
            "Saved prediction {} for {} (current={:.2}, predicted={:.2}, confidence={:.1})",
            p.code, p.prediction_date, p.current_price, p.predicted_price, p.confidence
        );
        Ok(())
    }

    pub async fn get_prediction(&self, code: &str, date: NaiveDate) -> Result<Option<Prediction>> {
        let row = sqlx::query_as::<_, PredictionRow>(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE index_code = ? AND prediction_date = ?"
        ))
        .bind(code)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Prediction::from))
    }

    pub async fn get_predictions_for_date(&self, date: NaiveDate) -> Result<HashMap<String, Prediction>> {
        let rows = sqlx::query_as::<_, PredictionRow>(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE prediction_date = ?"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.index_code.clone(), Prediction::from(r)))
            .collect())
    }

    /// Predictions dated on or after `since`, newest first per instrument.
    pub async fn get_predictions_since(&self, code: Option<&str>, since: NaiveDate) -> Result<Vec<Prediction>> {
        let rows = match code {
            Some(code) => {
                sqlx::query_as::<_, PredictionRow>(&format!(
                    "SELECT {PREDICTION_COLUMNS} FROM predictions \
                     WHERE index_code = ? AND prediction_date >= ? \
                     ORDER BY prediction_date DESC"
                ))
                .bind(code)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PredictionRow>(&format!(
                    "SELECT {PREDICTION_COLUMNS} FROM predictions \
                     WHERE prediction_date >= ? \
                     ORDER BY index_code, prediction_date DESC"
                ))
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Prediction::from).collect())
    }

    /// Attach the realised change to an existing prediction, through the regular upsert.
    pub async fn record_outcome(&self, code: &str, date: NaiveDate, actual_change: f64) -> Result<bool> {
        match self.get_prediction(code, date).await? {
            Some(mut prediction) => {
                prediction.actual_change = Some(actual_change);
                self.upsert_prediction(&prediction).await?;
                Ok(true)
            }
            None => {
                warn!("No prediction for {} on {} to record an outcome against", code, date);
                Ok(false)
            }
        }
    }

    /// Direction hit-rate over predictions whose outcome is known.
    pub async fn prediction_stats(&self) -> Result<PredictionStats> {
        let (total, correct): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN (predicted_price - current_price) * actual_change > 0 THEN 1 ELSE 0 END), 0)
            FROM predictions
            WHERE actual_change IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let success_rate = if total > 0 {
            correct as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(PredictionStats {
            total_verified: total,
            correct_verified: correct,
            success_rate_percent: round2(success_rate),
        })
    }

    /// Persist a live bar. Synthetic bars are refused so they never pass as history.
    pub async fn upsert_bar(&self, code: &str, bar: &PriceBar) -> Result<()> {
        if bar.source == BarSource::Synthetic {
            return Err(PredictionError::Parse(format!(
                "refusing to store synthetic bar for {} on {}",
                code, bar.date
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO historical_data (index_code, date, open, high, low, close, prev_close, volume, source, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (index_code, date) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                prev_close = excluded.prev_close,
                volume = excluded.volume,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(code)
        .bind(bar.date)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.prev_close)
        .bind(bar.volume)
        .bind(BarSource::Live.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Up to `limit` most recent stored bars, oldest first.
    pub async fn get_recent_bars(&self, code: &str, limit: usize) -> Result<Vec<PriceBar>> {
        let rows = sqlx::query_as::<_, BarRow>(
            r#"
            SELECT date, open, high, low, close, prev_close, volume
            FROM historical_data
            WHERE index_code = ?
            ORDER BY date DESC
            LIMIT ?
            "#,
        )
        .bind(code)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut bars: Vec<PriceBar> = rows
            .into_iter()
            .map(|r| PriceBar {
                date: r.date,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                prev_close: r.prev_close,
                volume: r.volume,
                source: BarSource::Stored,
            })
            .collect();
        bars.reverse();
        Ok(bars)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// First day included in a "last N days" window ending on `today`.
pub fn window_start(today: NaiveDate, days: i64) -> NaiveDate {
    today - Duration::days(days)
}
