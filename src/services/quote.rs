// src/services/quote.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use log::info;
use rand::Rng;
use reqwest::Client;

use crate::config::QuoteConfig;
use crate::errors::{PredictionError, Result};
use crate::models::{round2, BarSource, IndexInfo, Instrument, PriceBar, SourceStatus};
use super::http::{check_endpoint, send_with_retry};

/// Synthetic history never goes further back than this.
pub const MAX_HISTORY_DAYS: usize = 250;

const MIN_FIELDS: usize = 35;
const TRADE_TIME_FIELD: usize = 30;
const FALLBACK_VOLUME_LOTS: i64 = 1_000_000;
const SHARES_PER_LOT: i64 = 100;

/// Anything that can produce the current quote for an instrument.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, instrument: &Instrument, today: NaiveDate) -> Result<PriceBar>;

    /// Whether the feed answers at all, without parsing or retrying.
    async fn check(&self, instrument: &Instrument) -> SourceStatus;
}

pub struct TencentQuoteClient {
    client: Client,
    config: QuoteConfig,
}

impl TencentQuoteClient {
    pub fn new(config: QuoteConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn quote_url(&self, instrument: &Instrument) -> String {
        format!("{}/q={}", self.config.base_url.trim_end_matches('/'), instrument.code)
    }
}

#[async_trait]
impl QuoteSource for TencentQuoteClient {
    async fn fetch_quote(&self, instrument: &Instrument, today: NaiveDate) -> Result<PriceBar> {
        let url = self.quote_url(instrument);
        info!("Fetching quote for {} from {}", instrument.code, url);

        let request = self.client.get(&url).header("Referer", "http://gu.qq.com");
        let resp = send_with_retry(request, self.config.max_attempts).await?;
        if !resp.status().is_success() {
            return Err(PredictionError::Upstream(format!(
                "quote feed returned HTTP {} for {}",
                resp.status(),
                instrument.code
            )));
        }

        let body = resp.text().await?;
        let bar = parse_quote_payload(&body, &instrument.code, today)?;
        info!(
            "Quote {}: current={:.2}, prev_close={:.2}, open={:.2}",
            instrument.code, bar.close, bar.prev_close, bar.open
        );
        Ok(bar)
    }

    async fn check(&self, instrument: &Instrument) -> SourceStatus {
        let request = self.client.get(self.quote_url(instrument)).header("Referer", "http://gu.qq.com");
        check_endpoint(request, "Quote feed").await
    }
}

/// Parse `v_<code>="f0~f1~...";` into a live bar.
///
/// The bar is dated by the feed's trade timestamp, so a quote read on a weekend or before the open
/// carries the last session's date. `today` is used only when the timestamp is missing or malformed.
pub fn parse_quote_payload(body: &str, feed_code: &str, today: NaiveDate) -> Result<PriceBar> {
    let marker = format!("v_{}=\"", feed_code);
    let start = body
        .find(&marker)
        .map(|idx| idx + marker.len())
        .ok_or_else(|| PredictionError::Parse(format!("no quote line for {}", feed_code)))?;
    let len = body[start..]
        .find('"')
        .ok_or_else(|| PredictionError::Parse(format!("unterminated quote line for {}", feed_code)))?;

    let fields: Vec<&str> = body[start..start + len].split('~').collect();
    if fields.len() < MIN_FIELDS {
        return Err(PredictionError::Parse(format!(
            "quote line for {} has {} fields, expected at least {}",
            feed_code,
            fields.len(),
            MIN_FIELDS
        )));
    }

    let required = |idx: usize, label: &str| {
        parse_number(fields[idx]).ok_or_else(|| {
            PredictionError::Parse(format!("{} for {} is not a number: {:?}", label, feed_code, fields[idx]))
        })
    };

    let current = required(3, "current price")?;
    let prev_close = required(4, "previous close")?;
    let open = required(5, "open")?;
    let high = fields.get(33).and_then(|f| parse_number(f)).unwrap_or(current);
    let low = fields.get(34).and_then(|f| parse_number(f)).unwrap_or(current);
    let lots = fields
        .get(36)
        .and_then(|f| f.trim().parse::<i64>().ok())
        .unwrap_or(FALLBACK_VOLUME_LOTS);

    let date = fields
        .get(TRADE_TIME_FIELD)
        .and_then(|f| NaiveDateTime::parse_from_str(f.trim(), "%Y%m%d%H%M%S").ok())
        .map(|t| t.date())
        .unwrap_or(today);

    Ok(PriceBar {
        date,
        open,
        high,
        low,
        close: current,
        prev_close,
        volume: lots.saturating_mul(SHARES_PER_LOT),
        source: BarSource::Live,
    })
}

fn parse_number(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field == "-" {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Build `days` bars ending with `live`, walking backward with ±2% daily noise
/// and a pull toward the live price. Every bar except the last is tagged synthetic.
pub fn synthesize_history<R: Rng + ?Sized>(live: &PriceBar, days: usize, rng: &mut R) -> Vec<PriceBar> {
    let days = days.clamp(1, MAX_HISTORY_DAYS);
    let current = live.close;
    let mut history = Vec::with_capacity(days);

    for i in 0..days - 1 {
        let days_back = (days - i - 1) as i64;
        let daily_change = (rng.gen::<f64>() - 0.5) * 0.04;
        let trend_factor = 1.0 - days_back as f64 * 0.001;
        let price = current * trend_factor * (1.0 + daily_change);

        let open = price * (0.995 + rng.gen::<f64>() * 0.01);
        let high = open.max(price) * (1.0 + rng.gen::<f64>() * 0.02);
        let low = open.min(price) * (0.98 + rng.gen::<f64>() * 0.02);
        let volume = (live.volume as f64 * (0.5 + rng.gen::<f64>())).round() as i64;

        history.push(PriceBar {
            date: live.date - Duration::days(days_back),
            open: round2(open),
            high: round2(high),
            low: round2(low),
            close: round2(price),
            prev_close: round2(price * 0.995),
            volume,
            source: BarSource::Synthetic,
        });
    }

    history.push(live.clone());
    history
}

/// Day count for the history periods the API accepts. Unknown periods mean one month.
pub fn period_days(period: &str) -> usize {
    match period {
        "1d" => 1,
        "5d" => 5,
        "1mo" => 30,
        "3mo" => 90,
        "6mo" => 180,
        "1y" => 365,
        _ => 30,
    }
    .min(MAX_HISTORY_DAYS)
}

/// Quote summary with the day's change measured against the previous close.
pub fn index_info(instrument: &Instrument, quote: &PriceBar, at: DateTime<Utc>) -> IndexInfo {
    let change = quote.close - quote.prev_close;
    let change_percent = if quote.prev_close != 0.0 {
        change / quote.prev_close * 100.0
    } else {
        0.0
    };

    IndexInfo {
        code: instrument.code.clone(),
        name: instrument.name.clone(),
        symbol: instrument.symbol.clone(),
        market: instrument.market.clone(),
        price: round2(quote.close),
        change: round2(change),
        change_percent: round2(change_percent),
        volume: quote.volume,
        timestamp: at,
    }
}
