mod common;

use chrono::{Duration, NaiveDate};

use common::{days_before_today, harness, start_time, today};
use index_forecast::errors::PredictionError;
use index_forecast::models::{BarSource, HistorySource, PriceBar, Prediction, TechnicalSnapshot};
use index_forecast::services::scheduler::RunTrigger;

fn stored_row(code: &str, date: NaiveDate, predicted: f64) -> Prediction {
    Prediction {
        code: code.to_string(),
        name: "stored".to_string(),
        prediction_date: date,
        current_price: 3000.0,
        predicted_price: predicted,
        predicted_change: predicted - 3000.0,
        predicted_change_percent: 0.0,
        confidence: 55.0,
        technical_indicators: TechnicalSnapshot::default(),
        history_source: HistorySource::Synthetic,
        generated_at: start_time() - Duration::hours(1),
        actual_change: None,
        created_at: None,
        updated_at: None,
    }
}

#[tokio::test]
async fn todays_store_row_wins_without_touching_upstream() {
    let (h, _clock) = harness(true).await;
    let store = h.store.clone().unwrap();
    store.upsert_prediction(&stored_row("sh000001", today(), 3333.0)).await.unwrap();

    let prediction = h.service.get_prediction("sh000001").await.unwrap();
    assert_eq!(prediction.predicted_price, 3333.0);
    assert_eq!(prediction.name, "stored");
    assert_eq!(h.quotes.calls(), 0);
    assert_eq!(h.predictor.calls(), 0);
}

#[tokio::test]
async fn yesterdays_store_row_is_never_served_as_today() {
    let (h, _clock) = harness(true).await;
    let store = h.store.clone().unwrap();
    store.upsert_prediction(&stored_row("sh000001", days_before_today(1), 3333.0)).await.unwrap();

    let prediction = h.service.get_prediction("sh000001").await.unwrap();
    assert_eq!(prediction.prediction_date, today());
    assert_eq!(prediction.predicted_price, 3030.0);
    assert_eq!(h.quotes.calls(), 1);

    // the live result was persisted for the next reader
    let persisted = store.get_prediction("sh000001", today()).await.unwrap().unwrap();
    assert_eq!(persisted.predicted_price, 3030.0);
}

#[tokio::test]
async fn cache_serves_when_the_store_has_nothing() {
    let (h, _clock) = harness(false).await;
    let report = h.service.scheduler().run_batch(RunTrigger::Scheduled).await;
    assert_eq!(report.succeeded, 4);

    h.quotes.fail_all(true);
    let calls_before = h.quotes.calls();
    let prediction = h.service.get_prediction("sz399001").await.unwrap();
    assert_eq!(prediction.generated_at, report.generated_at.unwrap());
    assert_eq!(h.quotes.calls(), calls_before);
}

#[tokio::test]
async fn stale_cache_falls_through_to_a_live_computation() {
    let (h, clock) = harness(false).await;
    h.service.scheduler().run_batch(RunTrigger::Scheduled).await;

    clock.advance(Duration::hours(25));
    h.quotes.fail_all(true);
    let err = h.service.get_prediction("sh000001").await.unwrap_err();
    assert!(matches!(err, PredictionError::PredictionUnavailable { ref code, .. } if code == "sh000001"));

    h.quotes.fail_all(false);
    let prediction = h.service.get_prediction("sh000001").await.unwrap();
    assert_eq!(prediction.prediction_date, today() + Duration::days(1));
}

#[tokio::test]
async fn live_computation_is_not_written_into_the_daily_cache() {
    let (h, _clock) = harness(false).await;
    h.service.get_prediction("sh000001").await.unwrap();

    let status = h.service.get_cache_status().await;
    assert!(!status.has_cache);
    assert_eq!(status.count, 0);
}

#[tokio::test]
async fn predictor_failure_is_prediction_unavailable() {
    let (h, _clock) = harness(false).await;
    h.predictor.fail(true);
    let err = h.service.get_prediction("sz399006").await.unwrap_err();
    assert!(matches!(err, PredictionError::PredictionUnavailable { .. }));
}

#[tokio::test]
async fn unknown_code_is_not_found_before_any_lookup() {
    let (h, _clock) = harness(true).await;
    let err = h.service.get_prediction("xx999999").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.quotes.calls(), 0);
}

#[tokio::test]
async fn get_all_prefers_todays_store_rows() {
    let (h, _clock) = harness(true).await;
    let store = h.store.clone().unwrap();
    store.upsert_prediction(&stored_row("sh000001", today(), 3100.0)).await.unwrap();
    store.upsert_prediction(&stored_row("sz399001", days_before_today(1), 3100.0)).await.unwrap();

    let all = h.service.get_all_predictions().await;
    assert_eq!(all.len(), 1);
    assert!(all.values().all(|p| p.prediction_date == today()));
    assert_eq!(h.quotes.calls(), 0);
}

#[tokio::test]
async fn get_all_omits_failures_and_never_errors() {
    let (h, _clock) = harness(false).await;
    h.quotes.fail("sh000688");
    let partial = h.service.get_all_predictions().await;
    assert_eq!(partial.len(), 3);
    assert!(!partial.contains_key("sh000688"));

    let (h, _clock) = harness(false).await;
    h.quotes.fail_all(true);
    assert!(h.service.get_all_predictions().await.is_empty());
}

#[tokio::test]
async fn stored_bars_replace_synthetic_history() {
    let (h, _clock) = harness(true).await;
    let store = h.store.clone().unwrap();
    for n in 1..=25 {
        let close = 2900.0 + n as f64;
        let bar = PriceBar {
            date: days_before_today(n),
            open: close,
            high: close + 5.0,
            low: close - 5.0,
            close,
            prev_close: close - 1.0,
            volume: 500_000,
            source: BarSource::Live,
        };
        store.upsert_bar("sh000001", &bar).await.unwrap();
    }

    let stored = h.service.get_prediction("sh000001").await.unwrap();
    assert_eq!(stored.history_source, HistorySource::Stored);

    let synthetic = h.service.get_prediction("sz399001").await.unwrap();
    assert_eq!(synthetic.history_source, HistorySource::Synthetic);

    // the live quote fetched along the way was stored, the synthetic filler was not
    let bars = store.get_recent_bars("sz399001", 100).await.unwrap();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].date, today());
}

#[tokio::test]
async fn weekend_quotes_are_never_stored_as_sessions() {
    let (h, clock) = harness(true).await;
    let store = h.store.clone().unwrap();

    // Saturday, then Sunday
    clock.advance(Duration::days(1));
    h.service.get_index_info("sh000001").await.unwrap();
    clock.advance(Duration::days(1));
    h.service.engine().clear_short_lived().await;
    h.service.get_index_info("sh000001").await.unwrap();

    assert!(store.get_recent_bars("sh000001", 10).await.unwrap().is_empty());

    // Monday's quote is a session and is kept
    clock.advance(Duration::days(1));
    h.service.engine().clear_short_lived().await;
    h.service.get_index_info("sh000001").await.unwrap();
    let bars = store.get_recent_bars("sh000001", 10).await.unwrap();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].date, today() + Duration::days(3));
}

#[tokio::test]
async fn history_by_period_ends_with_the_live_quote() {
    let (h, _clock) = harness(false).await;
    let bars = h.service.get_history("sz399006", "5d").await.unwrap();
    assert_eq!(bars.len(), 5);
    let last = bars.last().unwrap();
    assert_eq!(last.source, BarSource::Live);
    assert_eq!(last.close, 1900.0);
    assert!(bars[..4].iter().all(|b| b.source == BarSource::Synthetic));

    assert!(h.service.get_history("nope", "5d").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn index_info_skips_failing_instruments() {
    let (h, _clock) = harness(false).await;
    h.quotes.fail("sz399001");

    let info = h.service.get_index_info("sh000001").await.unwrap();
    assert_eq!(info.change, 10.0);
    assert_eq!(info.change_percent, 0.33);

    let all = h.service.get_all_index_info().await;
    assert_eq!(all.len(), 3);
    assert!(!all.contains_key("sz399001"));
}

#[tokio::test]
async fn prediction_history_needs_the_store() {
    let (h, _clock) = harness(false).await;
    assert!(matches!(
        h.service.get_prediction_history("sh000001", 30).await,
        Err(PredictionError::StoreUnavailable)
    ));
    assert!(matches!(h.service.get_stats().await, Err(PredictionError::StoreUnavailable)));

    let (h, _clock) = harness(true).await;
    let store = h.store.clone().unwrap();
    for n in [0, 3, 40] {
        store.upsert_prediction(&stored_row("sh000001", days_before_today(n), 3010.0)).await.unwrap();
    }
    let rows = h.service.get_prediction_history("sh000001", 30).await.unwrap();
    assert_eq!(rows.iter().map(|p| p.prediction_date).collect::<Vec<_>>(), vec![today(), days_before_today(3)]);

    let grouped = h.service.get_all_prediction_history(400).await.unwrap();
    assert_eq!(grouped["sh000001"].len(), 2);
}
