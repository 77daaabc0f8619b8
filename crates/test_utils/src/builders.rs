//! Test Data Builders
//!
//! `SettlementBuilder` assembles a consistent settlement (payment, customer
//! and catalog products) with sensible defaults, so a test only states the
//! lines it cares about.

use std::collections::HashMap;

use core_kernel::{Currency, CustomerId, Money, PaymentId, ProductId};
use domain_billing::{
    BillingError, CartLine, CustomerDetail, ProductDetail, SettlementDetail, SettlementPosting,
    IDEMPOTENT_KEY_METADATA,
};

/// Builder for a settled payment and the gateway data behind it
pub struct SettlementBuilder {
    payment_id: PaymentId,
    customer_id: CustomerId,
    currency: Currency,
    lines: Vec<(ProductDetail, u32)>,
    total: Option<Money>,
    status: Option<String>,
    idempotent_key: Option<String>,
}

impl Default for SettlementBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementBuilder {
    pub fn new() -> Self {
        Self {
            payment_id: PaymentId::new("pay_test"),
            customer_id: CustomerId::new("cus_test"),
            currency: Currency::INR,
            lines: Vec::new(),
            total: None,
            status: Some("succeeded".to_string()),
            idempotent_key: None,
        }
    }

    pub fn with_payment_id(mut self, id: impl Into<String>) -> Self {
        self.payment_id = PaymentId::new(id);
        self
    }

    pub fn with_customer_id(mut self, id: impl Into<String>) -> Self {
        self.customer_id = CustomerId::new(id);
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    /// Adds a cart line priced in minor units of the builder currency
    pub fn with_line(mut self, product_id: impl Into<String>, price_minor: i64, quantity: u32) -> Self {
        let product_id = ProductId::new(product_id);
        let product = ProductDetail {
            name: format!("Seat {}", product_id),
            product_id,
            price: Money::from_minor(price_minor, self.currency),
        };
        self.lines.push((product, quantity));
        self
    }

    /// Overrides the settled total; defaults to the sum of the lines
    pub fn with_total(mut self, total: Money) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_idempotent_key(mut self, key: impl Into<String>) -> Self {
        self.idempotent_key = Some(key.into());
        self
    }

    fn line_total(&self) -> Money {
        self.lines.iter().fold(Money::zero(self.currency), |acc, (product, quantity)| {
            product
                .price
                .times(*quantity)
                .and_then(|amount| acc.checked_add(&amount))
                .unwrap_or(acc)
        })
    }

    pub fn settlement(&self) -> SettlementDetail {
        let mut metadata = HashMap::new();
        if let Some(key) = &self.idempotent_key {
            metadata.insert(IDEMPOTENT_KEY_METADATA.to_string(), key.clone());
        }
        SettlementDetail {
            payment_id: self.payment_id.clone(),
            total: self.total.unwrap_or_else(|| self.line_total()),
            customer_id: self.customer_id.clone(),
            product_cart: self
                .lines
                .iter()
                .map(|(product, quantity)| CartLine {
                    product_id: product.product_id.clone(),
                    quantity: *quantity,
                })
                .collect(),
            status: self.status.clone(),
            metadata,
        }
    }

    pub fn customer(&self) -> CustomerDetail {
        CustomerDetail {
            customer_id: self.customer_id.clone(),
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
        }
    }

    pub fn products(&self) -> Vec<ProductDetail> {
        self.lines.iter().map(|(product, _)| product.clone()).collect()
    }

    /// Builds the posting, running the reconciliation checks
    pub fn posting(&self) -> Result<SettlementPosting, BillingError> {
        SettlementPosting::build(&self.settlement(), &self.customer(), &self.products())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_total_is_line_sum() {
        let builder = SettlementBuilder::new().with_line("p1", 25_000, 1).with_line("p2", 12_500, 2);

        assert_eq!(builder.settlement().total, Money::from_minor(50_000, Currency::INR));
        assert_eq!(builder.posting().unwrap().lines.len(), 2);
    }

    #[test]
    fn test_total_override_breaks_reconciliation() {
        let builder = SettlementBuilder::new()
            .with_line("p1", 25_000, 1)
            .with_total(Money::from_minor(1, Currency::INR));

        assert!(matches!(builder.posting(), Err(BillingError::ReconciliationMismatch { .. })));
    }
}
