// src/handlers/predictions.rs
use log::{error, info};
use serde::Deserialize;
use warp::reply::Json;
use warp::Rejection;

use crate::services::predictions::{PredictionService, DEFAULT_HISTORY_WINDOW_DAYS};
use super::error::reject;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryWindowQuery {
    pub days: Option<String>,
}

impl HistoryWindowQuery {
    /// Unparseable values fall back to the default window.
    pub fn days(&self) -> i64 {
        self.days
            .as_deref()
            .and_then(|d| d.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_HISTORY_WINDOW_DAYS)
    }
}

pub async fn get_all_predictions(service: PredictionService) -> Result<Json, Rejection> {
    let predictions = service.get_all_predictions().await;
    info!("Returning {} predictions", predictions.len());
    Ok(warp::reply::json(&predictions))
}

pub async fn get_prediction(code: String, service: PredictionService) -> Result<Json, Rejection> {
    info!("Handling prediction request for {}", code);
    match service.get_prediction(&code).await {
        Ok(prediction) => Ok(warp::reply::json(&prediction)),
        Err(e) => {
            error!("Prediction for {} failed: {}", code, e);
            Err(reject(e))
        }
    }
}

pub async fn get_prediction_history(
    code: String,
    query: HistoryWindowQuery,
    service: PredictionService,
) -> Result<Json, Rejection> {
    let history = service
        .get_prediction_history(&code, query.days())
        .await
        .map_err(|e| {
            error!("Prediction history for {} failed: {}", code, e);
            reject(e)
        })?;
    Ok(warp::reply::json(&history))
}

pub async fn get_all_prediction_history(query: HistoryWindowQuery, service: PredictionService) -> Result<Json, Rejection> {
    let history = service
        .get_all_prediction_history(query.days())
        .await
        .map_err(|e| {
            error!("Prediction history failed: {}", e);
            reject(e)
        })?;
    Ok(warp::reply::json(&history))
}

pub async fn get_prediction_stats(service: PredictionService) -> Result<Json, Rejection> {
    let stats = service.get_stats().await.map_err(|e| {
        error!("Prediction stats failed: {}", e);
        reject(e)
    })?;
    Ok(warp::reply::json(&stats))
}
