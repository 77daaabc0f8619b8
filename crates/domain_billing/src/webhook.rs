//! Webhook authentication and parsing
//!
//! The gateway signs each delivery following the Standard Webhooks scheme:
//! an HMAC-SHA256 over `"{webhook-id}.{webhook-timestamp}.{body}"` keyed by
//! the base64 part of a `whsec_` secret. The `webhook-signature` header
//! holds one or more space-separated `v1,<base64>` signatures; a delivery is
//! accepted when any of them matches and its timestamp is within tolerance.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use core_kernel::PaymentId;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

/// Default accepted clock skew in either direction
pub const DEFAULT_TOLERANCE_SECS: i64 = 5 * 60;

/// Signature headers of one delivery
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
}

/// Verifies webhook signatures for one shared secret
#[derive(Clone)]
pub struct WebhookVerifier {
    mac: HmacSha256,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Creates a verifier from a `whsec_<base64>` secret
    ///
    /// A secret without the prefix is decoded as plain base64.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSecret` if the secret is empty or not base64
    pub fn new(secret: &str) -> Result<Self, WebhookError> {
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
        if encoded.is_empty() {
            return Err(WebhookError::InvalidSecret("secret is empty".to_string()));
        }
        let key = STANDARD
            .decode(encoded)
            .map_err(|e| WebhookError::InvalidSecret(e.to_string()))?;
        let mac = HmacSha256::new_from_slice(&key).map_err(|e| WebhookError::InvalidSecret(e.to_string()))?;
        Ok(Self {
            mac,
            tolerance: Duration::seconds(DEFAULT_TOLERANCE_SECS),
        })
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Checks a delivery's signature and timestamp against `now`
    pub fn verify(&self, headers: &WebhookHeaders, body: &[u8], now: DateTime<Utc>) -> Result<(), WebhookError> {
        let id = required(&headers.id, WEBHOOK_ID_HEADER)?;
        let timestamp = required(&headers.timestamp, WEBHOOK_TIMESTAMP_HEADER)?;
        let signatures = required(&headers.signature, WEBHOOK_SIGNATURE_HEADER)?;

        let sent_at: i64 = timestamp.trim().parse().map_err(|_| WebhookError::InvalidTimestamp)?;
        // Timestamps so far off that the difference overflows are stale too
        let skew = now.timestamp().checked_sub(sent_at).map(i64::unsigned_abs);
        let tolerance = u64::try_from(self.tolerance.num_seconds()).unwrap_or(0);
        if skew.map_or(true, |skew| skew > tolerance) {
            warn!(webhook_id = %id, sent_at, "Webhook timestamp outside tolerance");
            return Err(WebhookError::StaleTimestamp);
        }

        let matched = signatures
            .split_whitespace()
            .filter_map(|candidate| candidate.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .filter_map(|(_, encoded)| STANDARD.decode(encoded).ok())
            .any(|signature| self.mac(id, timestamp, body).verify_slice(&signature).is_ok());

        if matched {
            Ok(())
        } else {
            warn!(webhook_id = %id, "Webhook signature rejected");
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Produces the `webhook-signature` value for a delivery
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> String {
        let tag = self.mac(id, &timestamp.to_string(), body).finalize().into_bytes();
        format!("{},{}", SIGNATURE_VERSION, STANDARD.encode(tag))
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.trim().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }
}

fn required<'a>(value: &'a Option<String>, header: &'static str) -> Result<&'a str, WebhookError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(WebhookError::MissingHeader(header))
}

/// A gateway event the reconciler understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded { payment_id: PaymentId },
    PaymentFailed { payment_id: PaymentId },
    /// Any other event type; acknowledged and dropped
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: RawEventData,
}

#[derive(Debug, Default, Deserialize)]
struct RawEventData {
    payment_id: Option<String>,
}

impl WebhookEvent {
    pub const PAYMENT_SUCCEEDED: &'static str = "payment.succeeded";
    pub const PAYMENT_FAILED: &'static str = "payment.failed";

    /// Parses a verified delivery body
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let raw: RawEvent = serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let payment_id = || {
            raw.data
                .payment_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(PaymentId::new)
                .ok_or_else(|| WebhookError::MalformedPayload(format!("{} event without data.payment_id", raw.event_type)))
        };

        match raw.event_type.as_str() {
            Self::PAYMENT_SUCCEEDED => Ok(WebhookEvent::PaymentSucceeded { payment_id: payment_id()? }),
            Self::PAYMENT_FAILED => Ok(WebhookEvent::PaymentFailed { payment_id: payment_id()? }),
            _ => Ok(WebhookEvent::Ignored {
                event_type: raw.event_type.clone(),
            }),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::PaymentSucceeded { .. } => Self::PAYMENT_SUCCEEDED,
            WebhookEvent::PaymentFailed { .. } => Self::PAYMENT_FAILED,
            WebhookEvent::Ignored { event_type } => event_type,
        }
    }
}
