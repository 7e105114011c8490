// src/services/daily_cache.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{CacheStatus, Prediction};

/// One scheduler run's output. Every entry carries `generated_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionBatch {
    pub generated_at: DateTime<Utc>,
    pub predictions: HashMap<String, Prediction>,
}

impl PredictionBatch {
    pub fn new(mut predictions: HashMap<String, Prediction>, generated_at: DateTime<Utc>) -> Self {
        for prediction in predictions.values_mut() {
            prediction.generated_at = generated_at;
        }
        Self { generated_at, predictions }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.generated_at
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Today's predictions for all instruments.
///
/// Readers get an `Arc` to a whole batch, so they can never observe a mix of
/// two generations. Replacement is wholesale under the write lock.
#[derive(Debug)]
pub struct DailyPredictionCache {
    current: RwLock<Option<Arc<PredictionBatch>>>,
    ttl: Duration,
}

impl DailyPredictionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            ttl,
        }
    }

    /// Swap in a new batch. Last writer wins.
    pub async fn replace(&self, predictions: HashMap<String, Prediction>, generated_at: DateTime<Utc>) -> Arc<PredictionBatch> {
        let batch = Arc::new(PredictionBatch::new(predictions, generated_at));
        *self.current.write().await = Some(batch.clone());
        batch
    }

    /// The batch, if it holds entries and is younger than the TTL.
    pub async fn valid_batch(&self, now: DateTime<Utc>) -> Option<Arc<PredictionBatch>> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|batch| !batch.is_empty() && batch.age(now) < self.ttl)
            .cloned()
    }

    pub async fn get(&self, code: &str, now: DateTime<Utc>) -> Option<Prediction> {
        self.valid_batch(now)
            .await
            .and_then(|batch| batch.predictions.get(code).cloned())
    }

    /// True when a catch-up run is warranted: nothing cached, or the batch has aged out.
    pub async fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.valid_batch(now).await.is_none()
    }

    pub async fn status(&self, now: DateTime<Utc>) -> CacheStatus {
        let guard = self.current.read().await;
        match guard.as_ref().filter(|batch| !batch.is_empty()) {
            Some(batch) => {
                let age = batch.age(now);
                CacheStatus {
                    has_cache: true,
                    count: batch.len(),
                    generated_at: Some(batch.generated_at),
                    age_hours: age.num_hours(),
                    is_valid: age < self.ttl,
                }
            }
            None => CacheStatus {
                has_cache: false,
                count: 0,
                generated_at: None,
                age_hours: 0,
                is_valid: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistorySource, TechnicalSnapshot};
    use chrono::TimeZone;

    fn prediction(code: &str, at: DateTime<Utc>) -> Prediction {
        Prediction {
            code: code.to_string(),
            name: code.to_uppercase(),
            prediction_date: at.date_naive(),
            current_price: 100.0,
            predicted_price: 101.0,
            predicted_change: 1.0,
            predicted_change_percent: 1.0,
            confidence: 70.0,
            technical_indicators: TechnicalSnapshot::default(),
            history_source: HistorySource::Synthetic,
            generated_at: at,
            actual_change: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn batch_of(codes: &[&str], at: DateTime<Utc>) -> HashMap<String, Prediction> {
        codes.iter().map(|c| (c.to_string(), prediction(c, at))).collect()
    }

    #[tokio::test]
    async fn replace_stamps_every_entry_with_the_batch_time() {
        let cache = DailyPredictionCache::new(Duration::hours(24));
        let early = Utc.with_ymd_and_hms(2024, 5, 10, 6, 0, 0).unwrap();
        let stamp = Utc.with_ymd_and_hms(2024, 5, 10, 7, 10, 0).unwrap();

        let mut entries = batch_of(&["a", "b"], early);
        entries.get_mut("b").unwrap().generated_at = early - Duration::minutes(3);
        let batch = cache.replace(entries, stamp).await;

        assert!(batch.predictions.values().all(|p| p.generated_at == stamp));
        assert_eq!(cache.get("a", stamp).await.unwrap().generated_at, stamp);
    }

    #[tokio::test]
    async fn batch_expires_after_ttl_but_stays_in_memory() {
        let cache = DailyPredictionCache::new(Duration::hours(24));
        let stamp = Utc.with_ymd_and_hms(2024, 5, 10, 7, 10, 0).unwrap();
        cache.replace(batch_of(&["a"], stamp), stamp).await;

        let within = stamp + Duration::hours(23);
        assert!(cache.get("a", within).await.is_some());
        assert!(!cache.needs_refresh(within).await);

        let past = stamp + Duration::hours(25);
        assert!(cache.get("a", past).await.is_none());
        assert!(cache.needs_refresh(past).await);

        let status = cache.status(past).await;
        assert!(status.has_cache);
        assert!(!status.is_valid);
        assert_eq!(status.count, 1);
        assert_eq!(status.age_hours, 25);
    }

    #[tokio::test]
    async fn empty_cache_reports_no_cache() {
        let cache = DailyPredictionCache::new(Duration::hours(24));
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 7, 10, 0).unwrap();
        assert!(cache.needs_refresh(now).await);
        let status = cache.status(now).await;
        assert!(!status.has_cache);
        assert_eq!(status.generated_at, None);

        // an empty successful run still counts as "nothing cached"
        cache.replace(HashMap::new(), now).await;
        assert!(cache.needs_refresh(now).await);
    }

    #[tokio::test]
    async fn replacement_is_wholesale() {
        let cache = DailyPredictionCache::new(Duration::hours(24));
        let first = Utc.with_ymd_and_hms(2024, 5, 10, 7, 10, 0).unwrap();
        let second = first + Duration::minutes(5);

        cache.replace(batch_of(&["a", "b"], first), first).await;
        cache.replace(batch_of(&["c"], second), second).await;

        let batch = cache.valid_batch(second).await.unwrap();
        assert_eq!(batch.generated_at, second);
        assert_eq!(batch.len(), 1);
        assert!(batch.predictions.contains_key("c"));
        assert!(cache.get("a", second).await.is_none());
    }
}
