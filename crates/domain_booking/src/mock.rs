//! In-memory port implementations for tests
//!
//! These adapters keep their state in memory and count calls, so tests can
//! assert how many gateway objects a flow created without any network or
//! database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use core_kernel::{
    Currency, CustomerId, DomainPort, HealthCheckResult, HealthCheckable, Money, PaymentId, PortError, ProductId,
};

use crate::checkout::{CheckoutGateway, CustomerDetails, IssuedPayment, NewCatalogProduct, PaymentRequest};
use crate::idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyStore, RecordPatch, StepClaim, StepLease};
use crate::inventory::{InventoryPort, SeatQuote, SeatValidation};

/// In-memory idempotency store
#[derive(Debug, Default, Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<IdempotencyKey, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored record, if any
    pub async fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, record)| record.clone())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl DomainPort for InMemoryIdempotencyStore {}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, PortError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, PortError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.idempotent_key) {
            return Ok(false);
        }
        records.insert(record.idempotent_key.clone(), record.clone());
        Ok(true)
    }

    async fn update(&self, key: &IdempotencyKey, patch: &RecordPatch) -> Result<IdempotencyRecord, PortError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| PortError::not_found("IdempotencyRecord", key))?;
        record
            .apply(patch)
            .map_err(|e| PortError::conflict(e.to_string()))?;
        Ok(record.clone())
    }

    async fn claim_step(&self, key: &IdempotencyKey, lease: &StepLease) -> Result<StepClaim, PortError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| PortError::not_found("IdempotencyRecord", key))?;
        match record.try_claim(*lease, chrono::Utc::now()) {
            Ok(()) => Ok(StepClaim::Claimed(Box::new(record.clone()))),
            Err(held) => Ok(StepClaim::Busy(held)),
        }
    }

    async fn release_step(&self, key: &IdempotencyKey, lease: &StepLease) -> Result<(), PortError> {
        if let Some(record) = self.records.write().await.get_mut(key) {
            record.release(lease);
        }
        Ok(())
    }
}

#[async_trait]
impl HealthCheckable for InMemoryIdempotencyStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("mock-idempotency-store", 0)
    }
}

/// Seat inventory with a fixed seat map
///
/// Seats listed in `booked` are refused. `delay` holds every answer back,
/// which is how deadline handling is exercised.
#[derive(Debug, Default)]
pub struct MockInventory {
    seats: HashMap<i32, (String, i64)>,
    booked: HashSet<i32>,
    movie_name: String,
    delay: Option<Duration>,
    unavailable: AtomicBool,
    answer: Option<SeatValidation>,
    calls: AtomicUsize,
}

impl MockInventory {
    /// Creates an inventory for one show whose seats cost `price_minor` each
    pub fn with_seats(movie_name: impl Into<String>, seat_ids: &[i32], price_minor: i64) -> Self {
        let seats = seat_ids
            .iter()
            .map(|id| (*id, (format!("R{}", id), price_minor)))
            .collect();
        Self {
            seats,
            movie_name: movie_name.into(),
            ..Default::default()
        }
    }

    /// Marks seats as already booked by someone else
    pub fn with_booked(mut self, seat_ids: &[i32]) -> Self {
        self.booked.extend(seat_ids.iter().copied());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answers every call with `answer` regardless of the request
    pub fn with_answer(mut self, answer: SeatValidation) -> Self {
        self.answer = Some(answer);
        self
    }

    /// Makes subsequent calls fail with `ServiceUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DomainPort for MockInventory {}

#[async_trait]
impl InventoryPort for MockInventory {
    async fn validate_seats(&self, _time_slot_id: i32, seat_ids: &[i32]) -> Result<SeatValidation, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::ServiceUnavailable {
                service: "mock-inventory".to_string(),
            });
        }
        if let Some(answer) = &self.answer {
            return Ok(answer.clone());
        }

        if let Some(taken) = seat_ids.iter().find(|id| self.booked.contains(*id)) {
            return Ok(SeatValidation::rejected(format!("seat {} is already booked", taken)));
        }

        let mut quotes = Vec::with_capacity(seat_ids.len());
        for id in seat_ids {
            let Some((seat_number, price)) = self.seats.get(id) else {
                return Ok(SeatValidation::rejected(format!("seat {} does not exist", id)));
            };
            quotes.push(SeatQuote {
                seat_id: *id,
                seat_number: seat_number.clone(),
                price: Money::from_minor(*price, Currency::INR),
                movie_name: self.movie_name.clone(),
            });
        }
        Ok(SeatValidation::accepted(quotes))
    }
}

/// Payment gateway that hands out sequential ids
#[derive(Debug, Default)]
pub struct MockCheckoutGateway {
    customers: RwLock<HashMap<CustomerId, CustomerDetails>>,
    products: RwLock<HashMap<ProductId, NewCatalogProduct>>,
    payments: RwLock<Vec<PaymentRequest>>,
    customer_calls: AtomicUsize,
    product_calls: AtomicUsize,
    payment_calls: AtomicUsize,
    fail_product_at: Option<usize>,
    unavailable: AtomicBool,
    delay: Option<Duration>,
}

impl MockCheckoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `n`-th product creation (1-based) with `ServiceUnavailable`
    pub fn failing_product_at(mut self, n: usize) -> Self {
        self.fail_product_at = Some(n);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every subsequent call fail with `ServiceUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn customer_calls(&self) -> usize {
        self.customer_calls.load(Ordering::SeqCst)
    }

    pub fn product_calls(&self) -> usize {
        self.product_calls.load(Ordering::SeqCst)
    }

    pub fn payment_calls(&self) -> usize {
        self.payment_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind
    pub fn total_calls(&self) -> usize {
        self.customer_calls() + self.product_calls() + self.payment_calls()
    }

    pub async fn product(&self, id: &ProductId) -> Option<NewCatalogProduct> {
        self.products.read().await.get(id).cloned()
    }

    /// The most recent payment request received
    pub async fn last_payment(&self) -> Option<PaymentRequest> {
        self.payments.read().await.last().cloned()
    }

    async fn before_call(&self) -> Result<(), PortError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::ServiceUnavailable {
                service: "mock-gateway".to_string(),
            });
        }
        Ok(())
    }
}

impl DomainPort for MockCheckoutGateway {}

#[async_trait]
impl CheckoutGateway for MockCheckoutGateway {
    async fn create_customer(&self, details: &CustomerDetails) -> Result<CustomerId, PortError> {
        let n = self.customer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.before_call().await?;
        let id = CustomerId::new(format!("cus_{}", n));
        self.customers.write().await.insert(id.clone(), details.clone());
        Ok(id)
    }

    async fn create_product(&self, product: &NewCatalogProduct) -> Result<ProductId, PortError> {
        let n = self.product_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.before_call().await?;
        if self.fail_product_at == Some(n) {
            return Err(PortError::ServiceUnavailable {
                service: "mock-gateway".to_string(),
            });
        }
        let id = ProductId::new(format!("pdt_{}", n));
        self.products.write().await.insert(id.clone(), product.clone());
        Ok(id)
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<IssuedPayment, PortError> {
        let n = self.payment_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.before_call().await?;
        self.payments.write().await.push(request.clone());
        Ok(IssuedPayment {
            payment_id: PaymentId::new(format!("pay_{}", n)),
            payment_link: format!("https://test.checkout.example/pay_{}", n),
        })
    }
}

#[async_trait]
impl HealthCheckable for MockCheckoutGateway {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("mock-checkout-gateway", 0)
    }
}
