//! In-memory port implementations for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use core_kernel::{
    CustomerId, DomainPort, HealthCheckResult, HealthCheckable, Money, PaymentId, PortError, ProductId,
};

use crate::ledger::{LedgerEntry, LedgerStore, PostingReceipt};
use crate::posting::SettlementPosting;
use crate::settlement::{CartLine, CustomerDetail, ProductDetail, SettlementDetail, SettlementSource, IDEMPOTENT_KEY_METADATA};
use crate::wallet::Wallet;

#[derive(Debug, Default, Clone)]
struct LedgerState {
    wallets: HashMap<CustomerId, Wallet>,
    entries: Vec<LedgerEntry>,
}

/// In-memory wallet and ledger store
///
/// A posting is applied to a staged copy of the state and swapped in only
/// when every step succeeded, matching the all-or-nothing behavior of the
/// database transaction.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    fail_on_line: Arc<RwLock<Option<i32>>>,
    posts: Arc<AtomicUsize>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next postings fail while writing entry `line_no`,
    /// after the wallet was already credited
    pub async fn fail_on_line(&self, line_no: i32) {
        *self.fail_on_line.write().await = Some(line_no);
    }

    pub async fn clear_failure(&self) {
        *self.fail_on_line.write().await = None;
    }

    pub async fn all_entries(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.clone()
    }

    pub async fn wallet_count(&self) -> usize {
        self.state.read().await.wallets.len()
    }

    /// Number of `post_settlement` calls, successful or not
    pub fn post_calls(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn post_settlement(&self, posting: &SettlementPosting) -> Result<PostingReceipt, PortError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        let fail_on_line = *self.fail_on_line.read().await;
        let mut state = self.state.write().await;

        if state.entries.iter().any(|e| e.transaction_id == posting.transaction_id) {
            return Ok(PostingReceipt::AlreadyPosted {
                transaction_id: posting.transaction_id.clone(),
            });
        }

        let mut staged = state.clone();
        let wallet = staged
            .wallets
            .entry(posting.user_id.clone())
            .or_insert_with(|| Wallet::open(posting.user_id.clone(), posting.currency()));
        wallet
            .credit(&posting.total)
            .map_err(|e| PortError::validation(e.to_string()))?;
        let wallet = wallet.clone();

        let entries = posting.entries(wallet.id);
        for entry in &entries {
            if Some(entry.line_no) == fail_on_line {
                return Err(PortError::internal(format!(
                    "injected failure writing line {} of {}",
                    entry.line_no, entry.transaction_id
                )));
            }
            staged.entries.push(entry.clone());
        }

        *state = staged;
        Ok(PostingReceipt::Posted { wallet, entries })
    }

    async fn find_wallet(&self, user_id: &CustomerId) -> Result<Option<Wallet>, PortError> {
        Ok(self.state.read().await.wallets.get(user_id).cloned())
    }

    async fn entries_for_transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntry>, PortError> {
        let mut entries: Vec<LedgerEntry> = self
            .state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.line_no);
        Ok(entries)
    }
}

#[async_trait]
impl HealthCheckable for InMemoryLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("in-memory-ledger", 0)
    }
}

/// Scripted gateway read side
#[derive(Debug, Default, Clone)]
pub struct MockSettlementSource {
    payments: Arc<RwLock<HashMap<PaymentId, SettlementDetail>>>,
    customers: Arc<RwLock<HashMap<CustomerId, CustomerDetail>>>,
    products: Arc<RwLock<HashMap<ProductId, ProductDetail>>>,
    delay: Option<Duration>,
    unavailable: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockSettlementSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn add_customer(&self, customer_id: &str, name: &str, email: &str) {
        let id = CustomerId::new(customer_id);
        self.customers.write().await.insert(
            id.clone(),
            CustomerDetail {
                customer_id: id,
                name: name.to_string(),
                email: email.to_string(),
            },
        );
    }

    pub async fn add_product(&self, product_id: &str, name: &str, price: Money) {
        let id = ProductId::new(product_id);
        self.products.write().await.insert(
            id.clone(),
            ProductDetail {
                product_id: id,
                name: name.to_string(),
                price,
            },
        );
    }

    /// Registers a succeeded payment with quantity 1 per product
    pub async fn add_payment(
        &self,
        payment_id: &str,
        customer_id: &str,
        total: Money,
        product_ids: &[&str],
        idempotent_key: Option<&str>,
    ) {
        let mut metadata = HashMap::new();
        if let Some(key) = idempotent_key {
            metadata.insert(IDEMPOTENT_KEY_METADATA.to_string(), key.to_string());
        }
        self.insert_payment(SettlementDetail {
            payment_id: PaymentId::new(payment_id),
            total,
            customer_id: CustomerId::new(customer_id),
            product_cart: product_ids
                .iter()
                .map(|id| CartLine {
                    product_id: ProductId::new(*id),
                    quantity: 1,
                })
                .collect(),
            status: Some("succeeded".to_string()),
            metadata,
        })
        .await;
    }

    pub async fn insert_payment(&self, payment: SettlementDetail) {
        self.payments.write().await.insert(payment.payment_id.clone(), payment);
    }

    async fn enter(&self) -> Result<(), PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::ServiceUnavailable {
                service: "payment gateway".to_string(),
            });
        }
        Ok(())
    }
}

impl DomainPort for MockSettlementSource {}

#[async_trait]
impl SettlementSource for MockSettlementSource {
    async fn fetch_payment(&self, payment_id: &PaymentId) -> Result<SettlementDetail, PortError> {
        self.enter().await?;
        self.payments
            .read()
            .await
            .get(payment_id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Payment", payment_id))
    }

    async fn fetch_customer(&self, customer_id: &CustomerId) -> Result<CustomerDetail, PortError> {
        self.enter().await?;
        self.customers
            .read()
            .await
            .get(customer_id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Customer", customer_id))
    }

    async fn fetch_product(&self, product_id: &ProductId) -> Result<ProductDetail, PortError> {
        self.enter().await?;
        self.products
            .read()
            .await
            .get(product_id)
            .cloned()
            .ok_or_else(|| PortError::not_found("Product", product_id))
    }
}
