// src/config.rs
use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use log::{info, warn};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QuoteConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://sqt.gtimg.cn".to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 1000,
            temperature: 0.3,
            max_attempts: 3,
        }
    }
}

/// Knobs for the quote → indicators → predictor pipeline.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub history_days: usize,
    /// Stored real bars needed before they replace synthetic history.
    pub min_stored_bars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            history_days: 30,
            min_stored_bars: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub trigger_time: NaiveTime,
    pub timezone: Tz,
    pub instrument_delay: Duration,
    pub startup_delay: Duration,
    pub batch_ttl: chrono::Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            trigger_time: NaiveTime::from_hms_opt(15, 10, 0).unwrap_or(NaiveTime::MIN),
            timezone: chrono_tz::Asia::Shanghai,
            instrument_delay: Duration::from_secs(2),
            startup_delay: Duration::from_secs(2),
            batch_ttl: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub quote: QuoteConfig,
    pub llm: LlmConfig,
    pub engine: EngineSettings,
    pub schedule: ScheduleSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            database_url: None,
            db_max_connections: 5,
            quote: QuoteConfig::default(),
            llm: LlmConfig::default(),
            engine: EngineSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment. Call `dotenv().ok()` first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => v.trim().parse::<u16>().with_context(|| format!("PORT must be a number, got {v}"))?,
            None => {
                warn!("PORT not set, defaulting to 8000");
                8000
            }
        };

        let database_url = get("DATABASE_URL");
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), 5u32)?;

        let quote_defaults = QuoteConfig::default();
        let quote = QuoteConfig {
            base_url: get("QUOTE_BASE_URL").unwrap_or(quote_defaults.base_url),
            timeout: Duration::from_secs(parse_or("QUOTE_TIMEOUT_SECS", get("QUOTE_TIMEOUT_SECS"), 30u64)?),
            max_attempts: quote_defaults.max_attempts,
        };

        let llm_defaults = LlmConfig::default();
        let api_key = get("LLM_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            warn!("LLM_API_KEY not set, inference calls will be rejected upstream");
        }
        let llm = LlmConfig {
            base_url: get("LLM_BASE_URL").unwrap_or(llm_defaults.base_url),
            api_key,
            model: get("LLM_MODEL").unwrap_or(llm_defaults.model),
            timeout: Duration::from_secs(parse_or("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"), 60u64)?),
            ..llm_defaults
        };

        let engine = EngineSettings {
            cache_ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", get("CACHE_TTL_SECS"), 300u64)?),
            history_days: parse_or("HISTORY_DAYS", get("HISTORY_DAYS"), 30usize)?,
            ..EngineSettings::default()
        };

        let schedule_defaults = ScheduleSettings::default();
        let trigger_time = match get("SCHEDULE_TIME") {
            Some(v) => NaiveTime::parse_from_str(v.trim(), "%H:%M")
                .with_context(|| format!("SCHEDULE_TIME must be HH:MM, got {v}"))?,
            None => schedule_defaults.trigger_time,
        };
        let timezone = match get("SCHEDULE_TZ") {
            Some(v) => Tz::from_str(v.trim()).map_err(|e| anyhow!("SCHEDULE_TZ is not a known timezone: {e}"))?,
            None => schedule_defaults.timezone,
        };
        let schedule = ScheduleSettings {
            trigger_time,
            timezone,
            instrument_delay: Duration::from_millis(parse_or(
                "INSTRUMENT_DELAY_MS",
                get("INSTRUMENT_DELAY_MS"),
                2000u64,
            )?),
            startup_delay: Duration::from_secs(parse_or("STARTUP_DELAY_SECS", get("STARTUP_DELAY_SECS"), 2u64)?),
            batch_ttl: schedule_defaults.batch_ttl,
        };

        info!(
            "Configuration loaded: port={}, store={}, schedule={} {}",
            port,
            if database_url.is_some() { "sqlite" } else { "none" },
            schedule.trigger_time.format("%H:%M"),
            schedule.timezone
        );

        Ok(Self {
            port,
            database_url,
            db_max_connections,
            quote,
            llm,
            engine,
            schedule,
        })
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{key} is invalid ({v}): {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.schedule.trigger_time, NaiveTime::from_hms_opt(15, 10, 0).unwrap());
        assert_eq!(cfg.schedule.timezone, chrono_tz::Asia::Shanghai);
        assert_eq!(cfg.schedule.instrument_delay, Duration::from_secs(2));
        assert_eq!(cfg.engine.cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.quote.timeout, Duration::from_secs(30));
        assert_eq!(cfg.llm.timeout, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config_from(&[
            ("PORT", "9001"),
            ("DATABASE_URL", "sqlite://forecast.db"),
            ("SCHEDULE_TIME", "09:45"),
            ("SCHEDULE_TZ", "America/New_York"),
            ("INSTRUMENT_DELAY_MS", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.database_url.as_deref(), Some("sqlite://forecast.db"));
        assert_eq!(cfg.schedule.trigger_time, NaiveTime::from_hms_opt(9, 45, 0).unwrap());
        assert_eq!(cfg.schedule.timezone, chrono_tz::America::New_York);
        assert_eq!(cfg.schedule.instrument_delay, Duration::ZERO);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "abc")]).is_err());
        assert!(config_from(&[("SCHEDULE_TIME", "25:99")]).is_err());
        assert!(config_from(&[("SCHEDULE_TZ", "Mars/Olympus")]).is_err());
    }
}
