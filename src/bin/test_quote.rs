use anyhow::Result;
use chrono::Utc;
use dotenv::dotenv;
use log::{error, info};
use std::env;

use index_forecast::config::AppConfig;
use index_forecast::services::indicators::calculate_snapshot;
use index_forecast::services::instruments::InstrumentRegistry;
use index_forecast::services::quote::{self, QuoteSource, TencentQuoteClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env()?;
    let registry = InstrumentRegistry::default_indices();
    let code = env::args().nth(1).unwrap_or_else(|| "sh000001".to_string());
    let Some(instrument) = registry.get(&code) else {
        error!("Unknown index code {}. Known codes: {:?}", code, registry.iter().map(|i| &i.code).collect::<Vec<_>>());
        return Ok(());
    };

    info!("Testing quote feed for {} ({})", instrument.name, instrument.code);
    let client = TencentQuoteClient::new(config.quote.clone())?;
    let now = Utc::now();
    let bar = client.fetch_quote(instrument, now.date_naive()).await?;

    let info = quote::index_info(instrument, &bar, now);
    info!("Index info:");
    info!("  Price: {:.2}", info.price);
    info!("  Change: {:+.2} ({:+.2}%)", info.change, info.change_percent);
    info!("  Volume: {}", info.volume);
    info!("  Trade date: {}", bar.date);

    let history = quote::synthesize_history(&bar, config.engine.history_days, &mut rand::thread_rng());
    let snapshot = calculate_snapshot(&history);
    info!("Indicators over {} synthetic days:", history.len());
    info!("  MA5: {:.2}  MA20: {:.2}", snapshot.ma5, snapshot.ma20);
    info!("  RSI: {:.2}  Volatility: {:.2}%  Trend: {:.2}%", snapshot.rsi, snapshot.volatility, snapshot.trend);

    Ok(())
}
