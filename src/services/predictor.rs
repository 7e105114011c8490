// src/services/predictor.rs
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::LlmConfig;
use crate::errors::{PredictionError, Result};
use crate::models::{PriceBar, SourceStatus, TechnicalSnapshot};
use super::http::{check_endpoint, send_with_retry};

/// Bars quoted in the prompt.
pub const PROMPT_HISTORY_LEN: usize = 10;

const SYSTEM_PROMPT: &str = "You are a professional equity analyst and quantitative trader with deep \
experience of the Chinese stock market. Based on the technical indicators and market data provided, \
give a next-day price forecast. Reply with a JSON object containing the predicted price and a confidence score.";

/// Model output after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub predicted_price: f64,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Forecast {
    fn validated(self) -> Option<Self> {
        let in_range = self.predicted_price.is_finite()
            && self.predicted_price > 0.0
            && self.confidence.is_finite()
            && (0.0..=100.0).contains(&self.confidence);
        in_range.then_some(self)
    }
}

#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, current_price: f64, indicators: &TechnicalSnapshot, history: &[PriceBar]) -> Result<Forecast>;

    /// Whether the inference endpoint accepts our credentials, without spending a completion.
    async fn check(&self) -> SourceStatus;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

/// Chat-completions client for an OpenAI-compatible inference endpoint.
pub struct ChatPredictor {
    client: Client,
    config: LlmConfig,
}

impl ChatPredictor {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Predictor for ChatPredictor {
    async fn predict(&self, current_price: f64, indicators: &TechnicalSnapshot, history: &[PriceBar]) -> Result<Forecast> {
        let prompt = build_prompt(current_price, indicators, history);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &prompt },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!("Sending prompt to {} ({} chars)", url, prompt.len());

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body);
        let resp = send_with_retry(request, self.config.max_attempts).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PredictionError::Upstream(format!("inference service returned HTTP {}: {}", status, text)));
        }

        let reply: ChatResponse = resp
            .json()
            .await
            .map_err(|e| PredictionError::Parse(format!("inference response is not valid JSON: {}", e)))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PredictionError::Parse("inference response has no choices".to_string()))?;

        let forecast = parse_forecast(&content)?;
        info!(
            "Model forecast: price={:.2}, confidence={:.1}",
            forecast.predicted_price, forecast.confidence
        );
        Ok(forecast)
    }

    async fn check(&self) -> SourceStatus {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        let request = self.client.get(&url).bearer_auth(&self.config.api_key);
        check_endpoint(request, "Inference endpoint").await
    }
}

pub fn build_prompt(current_price: f64, indicators: &TechnicalSnapshot, history: &[PriceBar]) -> String {
    let mut recent = String::new();
    if !history.is_empty() {
        let take = history.len().min(PROMPT_HISTORY_LEN);
        let _ = writeln!(recent, "Price action over the last {} days:", take);
        for bar in &history[history.len() - take..] {
            let _ = writeln!(
                recent,
                "- {}: open {:.2}, high {:.2}, low {:.2}, close {:.2}",
                bar.date.format("%m-%d"),
                bar.open,
                bar.high,
                bar.low,
                bar.close
            );
        }
        recent.push('\n');
    }

    format!(
        "As a professional equity analyst, forecast tomorrow's price for this Chinese stock index.\n\n\
**Current price**: {current:.2}\n\n\
**Technical indicators**:\n\
- 5-day moving average (MA5): {ma5:.2}\n\
- 20-day moving average (MA20): {ma20:.2}\n\
- Relative strength index (RSI): {rsi:.2}\n\
- Volatility: {vol:.2}%\n\
- Trend: {trend:.2}%\n\n\
{recent}\
**What to consider**:\n\
1. The combined signal of the indicators\n\
2. MA5 versus MA20 for the short-term trend\n\
3. RSI for overbought/oversold (<30 oversold, >70 overbought)\n\
4. Volatility as the level of risk\n\
5. Trend as the overall direction\n\n\
**Output format**:\n\
Reply with JSON in exactly this shape:\n\
{{\n  \"predicted_price\": <number>,\n  \"confidence\": <number between 0 and 100>,\n  \"reasoning\": \"<short rationale>\"\n}}\n\n\
The predicted price should stay within ±5% of the current price; base the confidence on how consistent the indicators are.",
        current = current_price,
        ma5 = indicators.ma5,
        ma20 = indicators.ma20,
        rsi = indicators.rsi,
        vol = indicators.volatility,
        trend = indicators.trend,
        recent = recent,
    )
}

/// Lenient reply parsing: whole-text JSON, then the first balanced `{...}` span,
/// then `predicted_price` / `confidence` labels. Out-of-range values are rejected
/// by every strategy.
pub fn parse_forecast(content: &str) -> Result<Forecast> {
    if let Some(forecast) = serde_json::from_str::<Forecast>(content.trim())
        .ok()
        .and_then(Forecast::validated)
    {
        return Ok(forecast);
    }

    if let Some(forecast) = first_balanced_object(content)
        .and_then(|span| serde_json::from_str::<Forecast>(span).ok())
        .and_then(Forecast::validated)
    {
        return Ok(forecast);
    }

    if let Some(forecast) = scrape_labels(content).and_then(Forecast::validated) {
        return Ok(forecast);
    }

    Err(PredictionError::Parse(format!(
        "could not extract a valid forecast from reply: {}",
        truncate(content, 200)
    )))
}

/// First `{...}` span whose braces balance, ignoring braces inside JSON strings.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn scrape_labels(content: &str) -> Option<Forecast> {
    let price_re = Regex::new(r#"predicted_price"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#).ok()?;
    let confidence_re = Regex::new(r#"confidence"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#).ok()?;

    let capture = |re: &Regex| {
        re.captures(content)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    };

    Some(Forecast {
        predicted_price: capture(&price_re)?,
        confidence: capture(&confidence_re)?,
        reasoning: "extracted from free text".to_string(),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
