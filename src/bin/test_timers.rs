use anyhow::Result;
use chrono::{Datelike, Utc};
use dotenv::dotenv;
use log::info;

use index_forecast::config::AppConfig;
use index_forecast::services::scheduler::next_trigger;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Testing prediction schedule...");
    let config = AppConfig::from_env()?;
    let tz = config.schedule.timezone;
    let at = config.schedule.trigger_time;

    let now = Utc::now();
    let local = now.with_timezone(&tz);
    info!("Current time:");
    info!("  UTC: {}", now);
    info!("  {}: {} ({:?})", tz, local, local.weekday());

    info!("Upcoming runs at {} {}:", at.format("%H:%M"), tz);
    let mut from = now;
    for _ in 0..5 {
        let next = next_trigger(from, tz, at);
        let local_next = next.with_timezone(&tz);
        info!("  {} {} (in {} hours)", local_next, local_next.weekday(), (next - now).num_hours());
        from = next;
    }

    Ok(())
}
