// src/services/scheduler.rs
use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleSettings;
use super::clock::is_weekend;
use super::daily_cache::DailyPredictionCache;
use super::engine::PredictionEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Startup,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub trigger: RunTrigger,
    pub succeeded: usize,
    pub failed: usize,
    /// Stamp of the batch written to the cache. `None` when the run was aborted.
    pub generated_at: Option<DateTime<Utc>>,
    pub elapsed: std::time::Duration,
    pub aborted: bool,
}

/// Next weekday occurrence of `at` in `tz`, strictly after `now`.
pub fn next_trigger(now: DateTime<Utc>, tz: Tz, at: NaiveTime) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let mut date = local.date_naive();
    if local.time() >= at {
        date = date + Duration::days(1);
    }

    loop {
        while is_weekend(date) {
            date = date + Duration::days(1);
        }

        let naive = date.and_time(at);
        let candidate = match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            // inside a DST gap, fire at the first valid instant after it
            LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
        };

        match candidate.map(|t| t.with_timezone(&Utc)) {
            Some(t) if t > now => return t,
            _ => date = date + Duration::days(1),
        }
    }
}

/// Runs the daily batch at the configured local time and on demand.
pub struct PredictionScheduler {
    engine: Arc<PredictionEngine>,
    cache: Arc<DailyPredictionCache>,
    settings: ScheduleSettings,
    shutdown: CancellationToken,
}

impl PredictionScheduler {
    pub fn new(engine: Arc<PredictionEngine>, cache: Arc<DailyPredictionCache>, settings: ScheduleSettings) -> Self {
        Self {
            engine,
            cache,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn next_trigger(&self) -> DateTime<Utc> {
        next_trigger(self.engine.clock().now(), self.settings.timezone, self.settings.trigger_time)
    }

    /// Spawn the timer loop and, if the cache is missing or stale, a delayed catch-up run.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let catch_up = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = catch_up.shutdown.cancelled() => {}
                _ = tokio::time::sleep(catch_up.settings.startup_delay) => {
                    catch_up.catch_up_if_stale().await;
                }
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await })
    }

    async fn run_loop(&self) {
        info!(
            "Prediction scheduler started: weekdays at {} {}",
            self.settings.trigger_time.format("%H:%M"),
            self.settings.timezone
        );

        loop {
            let now = self.engine.clock().now();
            let next = next_trigger(now, self.settings.timezone, self.settings.trigger_time);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(
                "Next prediction run at {} ({} in {:.0} minutes)",
                next.with_timezone(&self.settings.timezone),
                self.settings.timezone,
                wait.as_secs_f64() / 60.0
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    self.run_batch(RunTrigger::Scheduled).await;
                }
            }
        }

        info!("Prediction scheduler stopped");
    }

    /// Predict every instrument in order, then swap the whole batch into the cache.
    ///
    /// A stop signal lets the current instrument finish, then abandons the run without touching the cache.
    pub async fn run_batch(&self, trigger: RunTrigger) -> BatchReport {
        let started = tokio::time::Instant::now();
        let instruments: Vec<String> = self.engine.registry().iter().map(|i| i.code.clone()).collect();
        info!("Starting {:?} prediction run for {} instruments", trigger, instruments.len());

        let mut predictions = HashMap::new();
        let mut failed = 0;
        let mut aborted = false;

        for (idx, code) in instruments.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                aborted = true;
                break;
            }

            match self.engine.compute(code).await {
                Ok(prediction) => {
                    info!("Predicted {} ({}/{})", code, idx + 1, instruments.len());
                    predictions.insert(code.clone(), prediction);

                    if idx + 1 < instruments.len() {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                aborted = true;
                                break;
                            }
                            _ = tokio::time::sleep(self.settings.instrument_delay) => {}
                        }
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!("Prediction for {} failed: {}", code, e);
                }
            }
        }

        if aborted {
            warn!(
                "{:?} prediction run aborted after {} successes, cache left unchanged",
                trigger,
                predictions.len()
            );
            return BatchReport {
                trigger,
                succeeded: predictions.len(),
                failed,
                generated_at: None,
                elapsed: started.elapsed(),
                aborted: true,
            };
        }

        let generated_at = self.engine.clock().now();
        let batch = self.cache.replace(predictions, generated_at).await;
        for prediction in batch.predictions.values() {
            self.engine.persist(prediction).await;
        }
        self.engine.clear_short_lived().await;

        let report = BatchReport {
            trigger,
            succeeded: batch.len(),
            failed,
            generated_at: Some(generated_at),
            elapsed: started.elapsed(),
            aborted: false,
        };
        info!(
            "{:?} prediction run finished: {} succeeded, {} failed in {:.1}s",
            trigger,
            report.succeeded,
            report.failed,
            report.elapsed.as_secs_f64()
        );
        report
    }

    /// Manual refresh on a detached task. Does not wait for or cancel a scheduled run.
    pub fn trigger_refresh(self: &Arc<Self>) -> JoinHandle<BatchReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_batch(RunTrigger::Manual).await })
    }

    pub async fn catch_up_if_stale(&self) -> Option<BatchReport> {
        if !self.cache.needs_refresh(self.engine.clock().now()).await {
            info!("Daily prediction cache is fresh, no catch-up run needed");
            return None;
        }
        info!("Daily prediction cache is empty or stale, running catch-up");
        Some(self.run_batch(RunTrigger::Startup).await)
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
