//! Gateway webhook handler
//!
//! The body is verified against the Standard-Webhooks signature before it
//! is parsed; an unsigned or stale delivery never reaches the reconciler.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use tracing::{info, warn};

use domain_billing::{
    EventOutcome, WebhookEvent, WebhookHeaders, WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER,
};

use crate::dto::ApiResponse;
use crate::{error::ApiError, AppState};

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<EventOutcome>, ApiError> {
    let signed = WebhookHeaders {
        id: header(&headers, WEBHOOK_ID_HEADER),
        timestamp: header(&headers, WEBHOOK_TIMESTAMP_HEADER),
        signature: header(&headers, WEBHOOK_SIGNATURE_HEADER),
    };

    if let Err(e) = state.verifier.verify(&signed, &body, Utc::now()) {
        warn!(webhook_id = ?signed.id, error = %e, "Webhook signature rejected");
        return Err(e.into());
    }

    let event = WebhookEvent::parse(&body)?;
    info!(webhook_id = ?signed.id, event_type = event.event_type(), "Webhook accepted");

    let outcome = state.reconciler.handle_event(&event).await?;
    Ok(ApiResponse::ok(outcome))
}
