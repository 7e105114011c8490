// src/routes.rs
use chrono::Utc;
use log::info;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reject::Rejection;
use warp::{Filter, Reply};

use crate::handlers::cache::{get_cache_status, refresh_cache};
use crate::handlers::error::ApiError;
use crate::handlers::indices::{get_all_index_info, get_history, get_index_info, PeriodQuery};
use crate::handlers::predictions::{
    get_all_prediction_history, get_all_predictions, get_prediction, get_prediction_history, get_prediction_stats,
    HistoryWindowQuery,
};
use crate::handlers::sources::get_data_source_status;
use crate::services::predictions::PredictionService;

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(api_error) = err.find::<ApiError>() {
        (api_error.status, api_error.message.clone())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "error": message,
        })),
        code,
    ))
}

pub fn routes(service: PredictionService) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    info!("Configuring routes...");

    let service_filter = warp::any().map(move || service.clone());

    let health_route = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "running",
            "timestamp": Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    });

    let all_predictions_route = warp::path!("api" / "v1" / "predict" / "all")
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_all_predictions);

    let all_history_route = warp::path!("api" / "v1" / "predict" / "history" / "all")
        .and(warp::get())
        .and(warp::query::<HistoryWindowQuery>())
        .and(service_filter.clone())
        .and_then(get_all_prediction_history);

    let history_route = warp::path!("api" / "v1" / "predict" / "history" / String)
        .and(warp::get())
        .and(warp::query::<HistoryWindowQuery>())
        .and(service_filter.clone())
        .and_then(get_prediction_history);

    let prediction_route = warp::path!("api" / "v1" / "predict" / String)
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_prediction);

    let bars_route = warp::path!("api" / "v1" / "history" / String)
        .and(warp::get())
        .and(warp::query::<PeriodQuery>())
        .and(service_filter.clone())
        .and_then(get_history);

    let all_indices_route = warp::path!("api" / "v1" / "indices" / "all")
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_all_index_info);

    let index_route = warp::path!("api" / "v1" / "indices" / String)
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_index_info);

    let cache_status_route = warp::path!("api" / "v1" / "prediction-cache" / "status")
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_cache_status);

    let cache_refresh_route = warp::path!("api" / "v1" / "prediction-cache" / "refresh")
        .and(warp::post())
        .and(service_filter.clone())
        .and_then(refresh_cache);

    let stats_route = warp::path!("api" / "v1" / "prediction-stats")
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_prediction_stats);

    let sources_route = warp::path!("api" / "v1" / "data-source" / "status")
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_data_source_status);

    info!("All routes configured successfully.");

    health_route
        .or(all_predictions_route)
        .or(all_history_route)
        .or(history_route)
        .or(prediction_route)
        .or(bars_route)
        .or(all_indices_route)
        .or(index_route)
        .or(cache_status_route)
        .or(cache_refresh_route)
        .or(stats_route)
        .or(sources_route)
        .recover(handle_rejection)
}
