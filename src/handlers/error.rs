// src/handlers/error.rs
use std::fmt;
use warp::http::StatusCode;
use warp::reject::Reject;

use crate::errors::PredictionError;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<PredictionError> for ApiError {
    fn from(e: PredictionError) -> Self {
        match &e {
            PredictionError::UnknownInstrument(_) => ApiError::not_found(e.to_string()),
            PredictionError::PredictionUnavailable { .. } | PredictionError::StoreUnavailable => {
                ApiError::unavailable(e.to_string())
            }
            _ if e.is_upstream() => ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}
impl Reject for ApiError {}

/// Shorthand for turning a service error into a warp rejection.
pub fn reject(e: PredictionError) -> warp::Rejection {
    warp::reject::custom(ApiError::from(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status_codes() {
        let cases = [
            (PredictionError::UnknownInstrument("x".into()), StatusCode::NOT_FOUND),
            (
                PredictionError::PredictionUnavailable { code: "x".into(), reason: "feed down".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (PredictionError::StoreUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (PredictionError::Parse("bad".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
