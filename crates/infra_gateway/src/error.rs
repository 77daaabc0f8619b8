//! HTTP failure mapping
//!
//! Remote answers are translated into `PortError` so the domain can decide
//! what is retryable without knowing it talked HTTP:
//! - 404 -> `NotFound`
//! - 401/403 -> `Unauthorized`
//! - 429 -> `RateLimited`
//! - 5xx -> `ServiceUnavailable`
//! - other 4xx -> `Validation`
//! - transport timeouts -> `Timeout`, other transport failures -> `Connection`

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use tracing::warn;

use core_kernel::PortError;

const DEFAULT_RETRY_AFTER_SECS: u64 = 1;
const MAX_ERROR_BODY: usize = 512;

/// Maps a transport failure
pub(crate) fn transport_error(service: &str, operation: &str, timeout: Duration, err: reqwest::Error) -> PortError {
    if err.is_timeout() {
        return PortError::Timeout {
            operation: operation.to_string(),
            duration_ms: timeout.as_millis() as u64,
        };
    }
    if err.is_decode() {
        return PortError::transformation(format!("{} returned an unreadable body: {}", service, err));
    }
    PortError::Connection {
        message: format!("{} unreachable during {}", service, operation),
        source: Some(Box::new(err)),
    }
}

/// Maps a non-success response
pub(crate) async fn status_error(service: &str, entity: &str, id: &str, response: Response) -> PortError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();

    warn!(service, status = status.as_u16(), entity, id, "Remote call failed");
    from_status(service, entity, id, status, retry_after, &body)
}

pub(crate) fn from_status(
    service: &str,
    entity: &str,
    id: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::not_found(entity, id),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized {
            message: format!("{} rejected the credentials ({})", service, status.as_u16()),
        },
        StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        StatusCode::CONFLICT => PortError::conflict(format!("{} {}: {}", entity, id, body)),
        s if s.is_server_error() => PortError::ServiceUnavailable {
            service: format!("{} ({})", service, s.as_u16()),
        },
        s => PortError::validation(format!("{} answered {}: {}", service, s.as_u16(), body)),
    }
}
