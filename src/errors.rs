// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Persistent store is not available")]
    StoreUnavailable,

    #[error("Prediction unavailable for {code}: {reason}")]
    PredictionUnavailable { code: String, reason: String },
}

impl PredictionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PredictionError::UnknownInstrument(_))
    }

    /// Upstream and parse failures are handled the same way by every caller.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            PredictionError::Http(_) | PredictionError::Upstream(_) | PredictionError::Parse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PredictionError>;
