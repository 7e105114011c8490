// src/services/indicators.rs
use crate::models::{round2, PriceBar, TechnicalSnapshot};

const RSI_PERIOD: usize = 14;
const RSI_NEUTRAL: f64 = 50.0;

/// Indicators over a history ordered oldest → newest.
pub fn calculate_snapshot(history: &[PriceBar]) -> TechnicalSnapshot {
    if history.is_empty() {
        return TechnicalSnapshot::default();
    }

    let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();

    TechnicalSnapshot {
        ma5: round2(moving_average(&closes, 5)),
        ma20: round2(moving_average(&closes, 20)),
        rsi: round2(rsi(&closes, RSI_PERIOD)),
        volatility: round2(volatility(&closes)),
        trend: round2(trend(&closes)),
    }
}

/// Mean of the last `min(period, len)` closes.
pub fn moving_average(closes: &[f64], period: usize) -> f64 {
    let window = period.min(closes.len());
    if window == 0 {
        return 0.0;
    }
    calculate_average(&closes[closes.len() - window..])
}

pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return RSI_NEUTRAL;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in closes[closes.len() - period - 1..].windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += delta.abs();
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }

    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Population standard deviation of daily returns, in percent.
pub fn volatility(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();
    let mean = calculate_average(&returns);
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;

    variance.sqrt() * 100.0
}

/// Percent change from the first to the last close.
pub fn trend(closes: &[f64]) -> f64 {
    match (closes.first(), closes.last()) {
        (Some(first), Some(last)) if closes.len() >= 2 && *first != 0.0 => (last - first) / first * 100.0,
        _ => 0.0,
    }
}

fn calculate_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
