// src/handlers/cache.rs
use log::info;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Rejection;

use crate::services::predictions::PredictionService;

pub async fn get_cache_status(service: PredictionService) -> Result<Json, Rejection> {
    let status = service.get_cache_status().await;
    Ok(warp::reply::json(&status))
}

pub async fn refresh_cache(service: PredictionService) -> Result<WithStatus<Json>, Rejection> {
    service.trigger_refresh();
    info!("Prediction refresh started in the background");
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "message": "Prediction refresh started, check the cache status shortly",
        })),
        StatusCode::ACCEPTED,
    ))
}
