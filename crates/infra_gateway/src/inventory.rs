//! Seat inventory adapter
//!
//! The inventory service answers whether a set of seats of one time slot can
//! be committed for booking, with a price per seat in minor units.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use core_kernel::{Currency, DomainPort, HealthCheckResult, HealthCheckable, Money, PortError, DEFAULT_DEADLINE};
use domain_booking::{InventoryPort, SeatQuote, SeatValidation};

use crate::config::GatewayConfigError;
use crate::error::{status_error, transport_error};

const SERVICE: &str = "inventory service";
const VALIDATE_PATH: &str = "/v1/seat-bookings/validate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatCommitRequest {
    pub movie_time_slot_id: i32,
    pub seat_matrix_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookableSeat {
    pub id: i32,
    pub seat_number: String,
    /// Minor units
    pub price: i64,
    pub movie_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeatCommitResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub to_be_booked: Vec<BookableSeat>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SeatCommitResponse {
    fn into_domain(self, currency: Currency) -> SeatValidation {
        if !self.is_valid {
            return SeatValidation::rejected(self.error.unwrap_or_else(|| "seats cannot be booked".to_string()));
        }
        SeatValidation::accepted(
            self.to_be_booked
                .into_iter()
                .map(|seat| SeatQuote {
                    seat_id: seat.id,
                    seat_number: seat.seat_number,
                    price: Money::from_minor(seat.price, currency),
                    movie_name: seat.movie_name,
                })
                .collect(),
        )
    }
}

/// HTTP client for the seat inventory service
#[derive(Debug, Clone)]
pub struct InventoryClient {
    http: Client,
    base_url: String,
    currency: Currency,
    request_timeout: Duration,
}

impl InventoryClient {
    /// Prices quoted by the service are read as minor units of `currency`
    pub fn new(base_url: impl Into<String>, currency: Currency) -> Result<Self, GatewayConfigError> {
        Self::with_timeout(base_url, currency, DEFAULT_DEADLINE)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        currency: Currency,
        request_timeout: Duration,
    ) -> Result<Self, GatewayConfigError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayConfigError::Client(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            currency,
            request_timeout,
        })
    }
}

impl DomainPort for InventoryClient {}

#[async_trait]
impl InventoryPort for InventoryClient {
    #[instrument(skip(self), fields(seats = seat_ids.len()))]
    async fn validate_seats(&self, time_slot_id: i32, seat_ids: &[i32]) -> Result<SeatValidation, PortError> {
        let body = SeatCommitRequest {
            movie_time_slot_id: time_slot_id,
            seat_matrix_ids: seat_ids.to_vec(),
        };

        let response = self
            .http
            .post(format!("{}{}", self.base_url, VALIDATE_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, "inventory.validate_seats", self.request_timeout, e))?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, "MovieTimeSlot", &time_slot_id.to_string(), response).await);
        }

        let answer: SeatCommitResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, "inventory.validate_seats", self.request_timeout, e))?;

        if !answer.is_valid {
            info!(time_slot_id, reason = ?answer.error, "Seats refused by inventory");
        }
        Ok(answer.into_domain(self.currency))
    }
}

#[async_trait]
impl HealthCheckable for InventoryClient {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = self.http.get(&self.base_url).send().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_server_error() => HealthCheckResult::unhealthy(
                "inventory",
                latency_ms,
                format!("inventory answered {}", response.status().as_u16()),
            ),
            Ok(_) => HealthCheckResult::healthy("inventory", latency_ms),
            Err(e) => HealthCheckResult::unhealthy("inventory", latency_ms, e.to_string()),
        }
    }
}
