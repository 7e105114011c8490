// src/handlers/sources.rs
use warp::reply::Json;
use warp::Rejection;

use crate::services::predictions::PredictionService;

pub async fn get_data_source_status(service: PredictionService) -> Result<Json, Rejection> {
    Ok(warp::reply::json(&service.get_data_source_status().await))
}
