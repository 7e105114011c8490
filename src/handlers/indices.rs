// src/handlers/indices.rs
use log::error;
use serde::Deserialize;
use warp::reply::Json;
use warp::Rejection;

use crate::services::predictions::PredictionService;
use super::error::reject;

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

pub async fn get_index_info(code: String, service: PredictionService) -> Result<Json, Rejection> {
    match service.get_index_info(&code).await {
        Ok(info) => Ok(warp::reply::json(&info)),
        Err(e) => {
            error!("Index info for {} failed: {}", code, e);
            Err(reject(e))
        }
    }
}

pub async fn get_all_index_info(service: PredictionService) -> Result<Json, Rejection> {
    Ok(warp::reply::json(&service.get_all_index_info().await))
}

pub async fn get_history(code: String, query: PeriodQuery, service: PredictionService) -> Result<Json, Rejection> {
    let period = query.period.as_deref().unwrap_or("1mo");
    match service.get_history(&code, period).await {
        Ok(bars) => Ok(warp::reply::json(&bars)),
        Err(e) => {
            error!("History for {} ({}) failed: {}", code, period, e);
            Err(reject(e))
        }
    }
}
