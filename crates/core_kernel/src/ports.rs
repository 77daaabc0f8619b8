//! Ports and Adapters Infrastructure
//!
//! Every collaborator of the booking core (the idempotency store, the
//! wallet ledger, the seat inventory service and the payment gateway) is
//! reached through a port trait defined in a domain crate. Adapters in the
//! infrastructure crates implement those traits; in-memory mocks implement
//! them for tests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        PaymentOrchestrator / SettlementReconciler            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   IdempotencyStore · InventoryPort · CheckoutGateway ·       │
//! │   SettlementSource · LedgerStore                             │
//! └─────────────────────────────────────────────────────────────┘
//!                    ▲                         ▲
//!         ┌─────────┴─────────┐     ┌────────┴─────────┐
//!         │  infra_db         │     │  infra_gateway    │
//!         │  (PostgreSQL)     │     │  (REST adapters)  │
//!         └───────────────────┘     └──────────────────┘
//! ```
//!
//! All port methods return `PortError`, so the domain layer can tell
//! transient collaborator failures from permanent ones without knowing
//! which adapter produced them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by any port implementation
#[derive(Debug, Error)]
pub enum PortError {
    #[error("{entity_type} {id} does not exist")]
    NotFound { entity_type: String, id: String },

    /// The collaborator refused the request itself; resending it unchanged fails again
    #[error("Rejected: {message}")]
    Validation { message: String },

    /// A uniqueness rule or state transition was violated
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("{operation} exceeded its {duration_ms}ms deadline")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{service} is unavailable")]
    ServiceUnavailable { service: String },

    /// A payload did not fit the wire or domain shape
    #[error("Unexpected payload: {message}")]
    Transformation { message: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },
}

impl PortError {
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn transformation(message: impl Into<String>) -> Self {
        Self::Transformation { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the same call may succeed later without any change
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::ServiceUnavailable { .. } => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Marker for port implementations; they are shared across tasks behind `Arc`
pub trait DomainPort: Send + Sync + 'static {}

/// One readiness probe answer
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(component: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            component: component.into(),
            healthy: true,
            latency_ms,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(component: impl Into<String>, latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: false,
            latency_ms,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Adapters that can answer a readiness probe
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}
