// src/services/http.rs
use log::{info, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::models::SourceStatus;

const RETRY_WAIT: Duration = Duration::from_secs(1);

/// Send a request up to `attempts` times, retrying only connection failures and timeouts.
///
/// HTTP status errors are returned as-is; the caller decides what a non-200 means.
pub async fn send_with_retry(request: RequestBuilder, attempts: u32) -> Result<Response, reqwest::Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        let Some(this_try) = request.try_clone() else {
            // Streaming bodies cannot be replayed.
            return request.send().await;
        };

        match this_try.send().await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < attempts && (e.is_connect() || e.is_timeout()) => {
                warn!("Request failed (attempt {}/{}), retrying: {}", attempt, attempts, e);
                attempt += 1;
                tokio::time::sleep(RETRY_WAIT).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One unretried request, reduced to a reachability verdict.
pub async fn check_endpoint(request: RequestBuilder, label: &str) -> SourceStatus {
    let status = match request.send().await {
        Ok(response) => classify(response.status()),
        Err(e) => SourceStatus::error(e.to_string()),
    };
    info!("{} check: {:?}", label, status.status);
    status
}

pub fn classify(status: StatusCode) -> SourceStatus {
    if status.is_success() {
        SourceStatus::connected()
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        SourceStatus::rate_limited("too many requests")
    } else {
        SourceStatus::error(format!("HTTP {}", status))
    }
}
