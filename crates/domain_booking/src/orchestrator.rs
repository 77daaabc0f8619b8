//! Payment orchestrator
//!
//! Drives a booking from a committed idempotency key to a hosted payment
//! link:
//!
//! ```text
//! NEW -> PRODUCTS_CREATED -> CUSTOMER_BOUND -> PAYMENT_LINK_ISSUED
//!   \_______________________________________________/
//!                       ABORTED
//! ```
//!
//! Seat validation has no stage of its own: it runs under the order step's
//! lease and is only persisted together with the products it paid for.
//!
//! Every step first loads the key's record and replays the stored result if
//! the step already ran, so a client retrying with the same key never
//! triggers a second seat reservation, product, customer or payment. A step
//! that has to call out claims a `StepLease` first and re-checks the record
//! it read under the claim; a concurrent request on the same key fails with
//! `InProgress` without calling anyone. Calls to the inventory service and
//! the gateway are bounded by the configured deadline; any failure aborts
//! the step before the record is touched.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use core_kernel::{with_deadline, Currency, CustomerId, PaymentId, PortError, ProductId, DEFAULT_DEADLINE};

use crate::checkout::{
    BillingAddress, CartItem, CheckoutGateway, CustomerDetails, NewCatalogProduct, PaymentMetadata, PaymentRequest,
};
use crate::error::BookingError;
use crate::idempotency::{
    IdempotencyKey, IdempotencyRecord, OrderStage, OrderStep, PaymentStatus, RecordPatch, DEFAULT_KEY_TTL_HOURS,
};
use crate::inventory::{InventoryPort, InventoryValidator, SeatQuote};
use crate::keys::IdempotencyKeyManager;
use crate::validation::{check_billing_address, check_customer, check_idempotent_key, check_seat_selection, ValidationErrors};

const INVENTORY: &str = "inventory service";
const GATEWAY: &str = "payment gateway";

/// Settings the orchestrator applies to every booking
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on each inventory and gateway call
    pub deadline: Duration,
    /// Currency the payment is billed in
    pub currency: Currency,
    /// Where the hosted checkout sends the buyer afterwards
    pub return_url: String,
    /// Used when a payment-link request carries no billing address
    pub default_billing: BillingAddress,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            currency: Currency::INR,
            return_url: "https://example.com/return".to_string(),
            default_billing: BillingAddress {
                street: "123 Example Street".to_string(),
                city: "Bengaluru".to_string(),
                state: "Karnataka".to_string(),
                country: "IN".to_string(),
                zipcode: "560001".to_string(),
            },
        }
    }
}

/// Request to reserve seats and create their catalog products
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub idempotent_key: String,
    pub movie_time_slot_id: i32,
    pub seat_matrix_ids: Vec<i32>,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<IdempotencyKey, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_idempotent_key(&self.idempotent_key, &mut errors);
        check_seat_selection(self.movie_time_slot_id, &self.seat_matrix_ids, &mut errors);
        errors.into_result()?;
        IdempotencyKey::parse(self.idempotent_key.clone())
    }
}

/// Request to create the gateway customer for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub idempotent_key: String,
    #[serde(flatten)]
    pub customer: CustomerDetails,
}

impl CustomerRequest {
    pub fn validate(&self) -> Result<IdempotencyKey, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_idempotent_key(&self.idempotent_key, &mut errors);
        check_customer(&self.customer, &mut errors);
        errors.into_result()?;
        IdempotencyKey::parse(self.idempotent_key.clone())
    }
}

/// Composite request running the whole booking flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLinkRequest {
    pub idempotent_key: String,
    pub movie_time_slot_id: i32,
    pub seat_matrix_ids: Vec<i32>,
    #[serde(flatten)]
    pub customer: CustomerDetails,
    pub billing_address: BillingAddress,
}

impl PaymentLinkRequest {
    pub fn validate(&self) -> Result<IdempotencyKey, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_idempotent_key(&self.idempotent_key, &mut errors);
        check_seat_selection(self.movie_time_slot_id, &self.seat_matrix_ids, &mut errors);
        check_customer(&self.customer, &mut errors);
        check_billing_address(&self.billing_address, &mut errors);
        errors.into_result()?;
        IdempotencyKey::parse(self.idempotent_key.clone())
    }
}

/// Catalog products recorded for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConfirmation {
    pub idempotent_key: IdempotencyKey,
    pub order_ids: Vec<ProductId>,
    pub booked_seat_ids: Vec<i32>,
    pub movie_time_slot_id: i32,
    pub payment_status: PaymentStatus,
    /// True when the products were created by an earlier call
    pub replayed: bool,
}

/// Gateway customer bound to a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerConfirmation {
    pub idempotent_key: IdempotencyKey,
    pub customer_id: CustomerId,
    pub replayed: bool,
}

/// Hosted payment link issued for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLink {
    pub idempotent_key: IdempotencyKey,
    pub payment_id: PaymentId,
    pub payment_link: String,
    pub replayed: bool,
}

/// Outcome of the composite flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSummary {
    pub idempotent_key: IdempotencyKey,
    pub order_ids: Vec<ProductId>,
    pub customer_id: CustomerId,
    pub payment_id: PaymentId,
    pub payment_link: String,
    /// True when the link was issued by an earlier call
    pub replayed: bool,
}

/// Coordinates the key store, the inventory service and the payment gateway
#[derive(Clone)]
pub struct PaymentOrchestrator {
    keys: IdempotencyKeyManager,
    inventory: InventoryValidator,
    gateway: Arc<dyn CheckoutGateway>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        keys: IdempotencyKeyManager,
        inventory: Arc<dyn InventoryPort>,
        gateway: Arc<dyn CheckoutGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        let inventory = InventoryValidator::new(inventory, config.deadline);
        Self {
            keys,
            inventory,
            gateway,
            config,
        }
    }

    pub fn keys(&self) -> &IdempotencyKeyManager {
        &self.keys
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validates seats with the inventory service and creates one catalog
    /// product per seat
    ///
    /// # Errors
    ///
    /// * `Validation` - bad key or seat selection
    /// * `PreconditionFailed` - key not committed, or booking aborted
    /// * `Conflict` - the key already holds products for other seats
    /// * `InProgress` - another request is running a step for the key
    /// * `SeatsUnavailable` - the inventory service refused the seats
    /// * `ExternalUnavailable` - inventory or gateway failed or timed out
    #[instrument(skip(self, request), fields(key = %request.idempotent_key, time_slot = request.movie_time_slot_id))]
    pub async fn create_order(&self, request: &OrderRequest) -> Result<OrderConfirmation, BookingError> {
        let key = request.validate()?;
        self.order_for_key(&key, request.movie_time_slot_id, &request.seat_matrix_ids)
            .await
    }

    /// Creates the gateway customer for a key
    ///
    /// Replays the bound customer if one exists.
    #[instrument(skip(self, request), fields(key = %request.idempotent_key))]
    pub async fn create_customer(&self, request: &CustomerRequest) -> Result<CustomerConfirmation, BookingError> {
        let key = request.validate()?;
        self.customer_for_key(&key, &request.customer).await
    }

    /// Requests a hosted payment link for a key whose products and customer
    /// are in place
    #[instrument(skip(self, billing), fields(key = %key))]
    pub async fn generate_payment_link(
        &self,
        key: &IdempotencyKey,
        billing: Option<BillingAddress>,
    ) -> Result<PaymentLink, BookingError> {
        if let Some(address) = &billing {
            let mut errors = ValidationErrors::new();
            check_billing_address(address, &mut errors);
            errors.into_result()?;
        }
        self.link_for_key(key, billing).await
    }

    /// Runs the whole flow: commit key, create order, create customer,
    /// issue payment link
    ///
    /// The request is validated in full before anything is committed.
    #[instrument(skip(self, request), fields(key = %request.idempotent_key))]
    pub async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<CheckoutSummary, BookingError> {
        let key = request.validate()?;

        let commit = self.keys.commit_key(&key).await?;
        if let Some(summary) = completed_checkout(commit.record(), request) {
            info!("Replaying completed checkout");
            return Ok(summary);
        }

        let order = self
            .order_for_key(&key, request.movie_time_slot_id, &request.seat_matrix_ids)
            .await?;
        let customer = self.customer_for_key(&key, &request.customer).await?;
        let link = self.link_for_key(&key, Some(request.billing_address.clone())).await?;

        info!(order_count = order.order_ids.len(), replayed = link.replayed, "Checkout ready");
        Ok(CheckoutSummary {
            idempotent_key: key,
            order_ids: order.order_ids,
            customer_id: customer.customer_id,
            payment_id: link.payment_id,
            payment_link: link.payment_link,
            replayed: link.replayed,
        })
    }

    async fn order_for_key(
        &self,
        key: &IdempotencyKey,
        time_slot_id: i32,
        seat_ids: &[i32],
    ) -> Result<OrderConfirmation, BookingError> {
        let record = self.keys.require_record(key).await?;
        if let Some(done) = replay_order(&record, time_slot_id, seat_ids)? {
            return Ok(done);
        }

        let ttl = self.lease_ttl(seat_ids.len() + 1);
        let (lease, record) = self.keys.claim_step(key, OrderStep::Order, ttl).await?;
        let result = self.place_order(key, &record, time_slot_id, seat_ids).await;
        self.keys.release_step(key, &lease).await;
        result
    }

    async fn place_order(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        time_slot_id: i32,
        seat_ids: &[i32],
    ) -> Result<OrderConfirmation, BookingError> {
        if let Some(done) = replay_order(record, time_slot_id, seat_ids)? {
            return Ok(done);
        }

        let validation = self
            .inventory
            .validate_and_reserve(time_slot_id, seat_ids)
            .await
            .map_err(|e| BookingError::external(INVENTORY, e))?;

        if !validation.is_valid {
            let reason = validation
                .reason
                .unwrap_or_else(|| "seats cannot be booked".to_string());
            warn!(%reason, "Inventory refused seats");
            return Err(BookingError::SeatsUnavailable { reason });
        }

        let quotes = in_request_order(validation.to_be_booked, seat_ids);
        let mut order_ids = Vec::with_capacity(quotes.len());
        for quote in &quotes {
            let product = NewCatalogProduct::for_seat(quote);
            let product_id = with_deadline(
                "gateway.create_product",
                self.config.deadline,
                self.gateway.create_product(&product),
            )
            .await
            .map_err(|e| BookingError::external(GATEWAY, e))?;
            order_ids.push(product_id);
        }

        let record = self
            .keys
            .commit_order_ids(key, order_ids, time_slot_id, seat_ids.to_vec())
            .await?;
        info!(order_count = record.order_ids.len(), "Order created");
        Ok(order_confirmation(record, false))
    }

    async fn customer_for_key(
        &self,
        key: &IdempotencyKey,
        details: &CustomerDetails,
    ) -> Result<CustomerConfirmation, BookingError> {
        let record = self.keys.require_record(key).await?;
        if let Some(done) = replay_customer(&record)? {
            return Ok(done);
        }

        let (lease, record) = self.keys.claim_step(key, OrderStep::Customer, self.lease_ttl(1)).await?;
        let result = self.bind_customer(key, &record, details).await;
        self.keys.release_step(key, &lease).await;
        result
    }

    async fn bind_customer(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        details: &CustomerDetails,
    ) -> Result<CustomerConfirmation, BookingError> {
        if let Some(done) = replay_customer(record)? {
            return Ok(done);
        }

        let customer_id = with_deadline(
            "gateway.create_customer",
            self.config.deadline,
            self.gateway.create_customer(details),
        )
        .await
        .map_err(|e| BookingError::external(GATEWAY, e))?;

        let record = self.keys.commit_customer_id(key, customer_id).await?;
        let customer_id = record
            .customer_id
            .ok_or_else(|| BookingError::Persistence(PortError::internal("customer_id not stored")))?;
        info!(customer_id = %customer_id, "Customer bound");
        Ok(CustomerConfirmation {
            idempotent_key: key.clone(),
            customer_id,
            replayed: false,
        })
    }

    async fn link_for_key(
        &self,
        key: &IdempotencyKey,
        billing: Option<BillingAddress>,
    ) -> Result<PaymentLink, BookingError> {
        let record = self.keys.require_record(key).await?;
        if let Some(done) = replay_link(&record)? {
            return Ok(done);
        }

        let (lease, record) = self
            .keys
            .claim_step(key, OrderStep::PaymentLink, self.lease_ttl(1))
            .await?;
        let result = self.issue_link(key, &record, billing).await;
        self.keys.release_step(key, &lease).await;
        result
    }

    async fn issue_link(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        billing: Option<BillingAddress>,
    ) -> Result<PaymentLink, BookingError> {
        if let Some(done) = replay_link(record)? {
            return Ok(done);
        }

        let customer_id = record
            .customer_id
            .clone()
            .ok_or_else(|| BookingError::precondition("no customer is bound to this key"))?;
        if record.order_ids.is_empty() || record.payment_status == PaymentStatus::Unset {
            return Err(BookingError::precondition("no order has been created for this key"));
        }
        let movie_time_slot_id = record
            .movie_time_slot_id
            .ok_or_else(|| BookingError::precondition("no time slot is recorded for this key"))?;

        let request = PaymentRequest {
            customer_id: customer_id.clone(),
            billing: billing.unwrap_or_else(|| self.config.default_billing.clone()),
            product_cart: record
                .order_ids
                .iter()
                .map(|id| CartItem {
                    product_id: id.clone(),
                    quantity: 1,
                })
                .collect(),
            currency: self.config.currency,
            return_url: self.config.return_url.clone(),
            metadata: PaymentMetadata {
                idempotent_key: key.clone(),
                movie_time_slot_id,
                booked_seats_id: record.booked_seat_ids.clone(),
                customer_id,
            },
        };

        let issued = with_deadline(
            "gateway.create_payment",
            self.config.deadline,
            self.gateway.create_payment(&request),
        )
        .await
        .map_err(|e| BookingError::external(GATEWAY, e))?;

        self.keys
            .update_field(key, &RecordPatch::payment_link(issued.payment_id.clone(), issued.payment_link.clone()))
            .await?;
        info!(payment_id = %issued.payment_id, "Payment link issued");

        Ok(PaymentLink {
            idempotent_key: key.clone(),
            payment_id: issued.payment_id,
            payment_link: issued.payment_link,
            replayed: false,
        })
    }

    /// Lease long enough for `external_calls` calls to each hit the deadline,
    /// plus one deadline of slack for the store writes
    fn lease_ttl(&self, external_calls: usize) -> chrono::Duration {
        let calls = u32::try_from(external_calls).unwrap_or(u32::MAX).saturating_add(1);
        chrono::Duration::from_std(self.config.deadline.saturating_mul(calls))
            .unwrap_or_else(|_| chrono::Duration::hours(DEFAULT_KEY_TTL_HOURS))
    }
}

fn ensure_not_aborted(record: &IdempotencyRecord) -> Result<(), BookingError> {
    if record.stage() == OrderStage::Aborted {
        return Err(BookingError::precondition(format!(
            "booking for key {} was aborted",
            record.idempotent_key
        )));
    }
    Ok(())
}

fn replay_order(
    record: &IdempotencyRecord,
    time_slot_id: i32,
    seat_ids: &[i32],
) -> Result<Option<OrderConfirmation>, BookingError> {
    ensure_not_aborted(record)?;
    if record.order_ids.is_empty() {
        return Ok(None);
    }
    if record.movie_time_slot_id == Some(time_slot_id) && same_seats(&record.booked_seat_ids, seat_ids) {
        info!("Replaying existing order");
        return Ok(Some(order_confirmation(record.clone(), true)));
    }
    Err(BookingError::conflict(format!(
        "idempotency key {} already holds an order for other seats",
        record.idempotent_key
    )))
}

fn replay_customer(record: &IdempotencyRecord) -> Result<Option<CustomerConfirmation>, BookingError> {
    ensure_not_aborted(record)?;
    Ok(record.customer_id.clone().map(|customer_id| {
        info!("Replaying bound customer");
        CustomerConfirmation {
            idempotent_key: record.idempotent_key.clone(),
            customer_id,
            replayed: true,
        }
    }))
}

fn replay_link(record: &IdempotencyRecord) -> Result<Option<PaymentLink>, BookingError> {
    ensure_not_aborted(record)?;
    match (&record.payment_id, &record.payment_link) {
        (Some(payment_id), Some(payment_link)) => {
            info!("Replaying issued payment link");
            Ok(Some(PaymentLink {
                idempotent_key: record.idempotent_key.clone(),
                payment_id: payment_id.clone(),
                payment_link: payment_link.clone(),
                replayed: true,
            }))
        }
        _ => Ok(None),
    }
}

/// Summary of a checkout that already finished for the same seats
fn completed_checkout(record: &IdempotencyRecord, request: &PaymentLinkRequest) -> Option<CheckoutSummary> {
    if record.stage() != OrderStage::PaymentLinkIssued
        || record.movie_time_slot_id != Some(request.movie_time_slot_id)
        || !same_seats(&record.booked_seat_ids, &request.seat_matrix_ids)
    {
        return None;
    }
    Some(CheckoutSummary {
        idempotent_key: record.idempotent_key.clone(),
        order_ids: record.order_ids.clone(),
        customer_id: record.customer_id.clone()?,
        payment_id: record.payment_id.clone()?,
        payment_link: record.payment_link.clone()?,
        replayed: true,
    })
}

fn same_seats(stored: &[i32], requested: &[i32]) -> bool {
    let mut a = stored.to_vec();
    let mut b = requested.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Orders quotes like the requested seats; `covers_exactly` already holds
fn in_request_order(mut quotes: Vec<SeatQuote>, seat_ids: &[i32]) -> Vec<SeatQuote> {
    quotes.sort_by_key(|q| seat_ids.iter().position(|id| *id == q.seat_id));
    quotes
}

fn order_confirmation(record: IdempotencyRecord, replayed: bool) -> OrderConfirmation {
    OrderConfirmation {
        movie_time_slot_id: record.movie_time_slot_id.unwrap_or_default(),
        idempotent_key: record.idempotent_key,
        order_ids: record.order_ids,
        booked_seat_ids: record.booked_seat_ids,
        payment_status: record.payment_status,
        replayed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation_collects_all_fields() {
        let request = PaymentLinkRequest {
            idempotent_key: String::new(),
            movie_time_slot_id: 0,
            seat_matrix_ids: vec![],
            customer: CustomerDetails {
                name: "".into(),
                email: "bad".into(),
                phone_number: "123".into(),
            },
            billing_address: BillingAddress {
                street: "".into(),
                city: "Pune".into(),
                state: "MH".into(),
                country: "IN".into(),
                zipcode: "411001".into(),
            },
        };
        let errors = request.validate().unwrap_err();
        for field in [
            "idempotent_key",
            "movie_time_slot_id",
            "seat_matrix_ids",
            "name",
            "email",
            "phone_number",
            "billing_address.street",
        ] {
            assert!(errors.has_field(field), "missing violation for {}", field);
        }
    }

    #[test]
    fn test_same_seats_ignores_order() {
        assert!(same_seats(&[102, 101], &[101, 102]));
        assert!(!same_seats(&[101], &[101, 102]));
    }

    #[test]
    fn test_customer_request_flattens_details() {
        let json = r#"{"idempotent_key":"K-1","name":"Asha","email":"a@example.com","phone_number":"+919876543210"}"#;
        let request: CustomerRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.customer.name, "Asha");
        assert!(request.validate().is_ok());
    }
}
