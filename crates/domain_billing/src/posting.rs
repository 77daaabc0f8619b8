//! Posting plans
//!
//! A `SettlementPosting` is the ledger write derived from one confirmed
//! payment: one credit line per product in the cart, each worth
//! `price * quantity`. It is only constructed when the lines add up to the
//! amount the gateway settled, in the same currency.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use core_kernel::{Currency, CustomerId, LedgerEntryId, Money, PaymentId, ProductId, WalletId};

use crate::error::BillingError;
use crate::ledger::{EntryType, LedgerEntry};
use crate::settlement::{CustomerDetail, ProductDetail, SettlementDetail};

/// One credit line of a posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingLine {
    pub line_no: i32,
    pub order_id: ProductId,
    pub amount: Money,
    pub description: String,
}

/// Ledger write for one settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPosting {
    /// External reference shared by every entry
    pub transaction_id: String,
    pub psp_ref_id: PaymentId,
    pub user_id: CustomerId,
    pub total: Money,
    pub lines: Vec<PostingLine>,
}

impl SettlementPosting {
    /// Builds and checks the posting for a settlement
    ///
    /// # Arguments
    ///
    /// * `settlement` - The confirmed payment
    /// * `customer` - The paying customer; owns the wallet
    /// * `products` - Catalog details for every product in the cart
    ///
    /// # Errors
    ///
    /// - `InvalidPosting` for an empty cart, a zero quantity or a
    ///   non-positive total
    /// - `MissingProduct` if a cart line has no catalog detail
    /// - `CurrencyMismatch` if a price is not in the settlement currency
    /// - `ReconciliationMismatch` if the lines do not sum to the total
    pub fn build(
        settlement: &SettlementDetail,
        customer: &CustomerDetail,
        products: &[ProductDetail],
    ) -> Result<Self, BillingError> {
        if settlement.product_cart.is_empty() {
            return Err(BillingError::InvalidPosting(format!(
                "payment {} has an empty product cart",
                settlement.payment_id
            )));
        }
        if !settlement.total.is_positive() {
            return Err(BillingError::InvalidPosting(format!(
                "payment {} settled a non-positive amount",
                settlement.payment_id
            )));
        }

        let currency = settlement.total.currency();
        let mut lines = Vec::with_capacity(settlement.product_cart.len());

        for (index, item) in settlement.product_cart.iter().enumerate() {
            if item.quantity == 0 {
                return Err(BillingError::InvalidPosting(format!(
                    "product {} has zero quantity",
                    item.product_id
                )));
            }
            let product = products
                .iter()
                .find(|p| p.product_id == item.product_id)
                .ok_or_else(|| BillingError::MissingProduct(item.product_id.to_string()))?;

            if product.price.currency() != currency {
                return Err(BillingError::CurrencyMismatch(format!(
                    "product {} is priced in {}, payment settled in {}",
                    product.product_id,
                    product.price.currency(),
                    currency
                )));
            }

            lines.push(PostingLine {
                line_no: (index + 1) as i32,
                order_id: item.product_id.clone(),
                amount: product.price.times(item.quantity)?,
                description: format!("Payment received for product {}", product.name),
            });
        }

        let line_total = Money::sum(currency, lines.iter().map(|l| &l.amount))?;
        if line_total != settlement.total {
            return Err(BillingError::ReconciliationMismatch {
                lines: line_total,
                total: settlement.total,
            });
        }

        Ok(Self {
            transaction_id: settlement.payment_id.to_string(),
            psp_ref_id: settlement.payment_id.clone(),
            user_id: customer.customer_id.clone(),
            total: settlement.total,
            lines,
        })
    }

    pub fn currency(&self) -> Currency {
        self.total.currency()
    }

    /// Materializes the ledger rows for `wallet_id`
    pub fn entries(&self, wallet_id: WalletId) -> Vec<LedgerEntry> {
        let now = Utc::now();
        self.lines
            .iter()
            .map(|line| LedgerEntry {
                id: LedgerEntryId::new(),
                wallet_id,
                order_id: Some(line.order_id.clone()),
                transaction_id: self.transaction_id.clone(),
                line_no: line.line_no,
                amount: line.amount,
                entry_type: EntryType::Credit,
                description: line.description.clone(),
                psp_ref_id: self.psp_ref_id.clone(),
                created_at: now,
            })
            .collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::settlement::CartLine;
    use proptest::prelude::*;
    use std::collections::HashMap;

    proptest! {
        #[test]
        fn posting_lines_always_sum_to_total(
            lines in proptest::collection::vec((1i64..1_000_000i64, 1u32..5u32), 1..10)
        ) {
            let products: Vec<ProductDetail> = lines
                .iter()
                .enumerate()
                .map(|(i, (price, _))| ProductDetail {
                    product_id: ProductId::new(format!("p{}", i)),
                    name: format!("Seat {}", i),
                    price: Money::from_minor(*price, Currency::INR),
                })
                .collect();
            let total: i64 = lines.iter().map(|(price, qty)| price * i64::from(*qty)).sum();
            let settlement = SettlementDetail {
                payment_id: PaymentId::new("pay_p"),
                total: Money::from_minor(total, Currency::INR),
                customer_id: CustomerId::new("cus_p"),
                product_cart: lines
                    .iter()
                    .enumerate()
                    .map(|(i, (_, qty))| CartLine { product_id: ProductId::new(format!("p{}", i)), quantity: *qty })
                    .collect(),
                status: None,
                metadata: HashMap::new(),
            };
            let customer = CustomerDetail {
                customer_id: CustomerId::new("cus_p"),
                name: "P".into(),
                email: "p@example.com".into(),
            };

            let posting = SettlementPosting::build(&settlement, &customer, &products).unwrap();
            let sum = Money::sum(Currency::INR, posting.lines.iter().map(|l| &l.amount)).unwrap();
            prop_assert_eq!(sum, settlement.total);

            let off_by_one = SettlementDetail { total: Money::from_minor(total + 1, Currency::INR), ..settlement };
            prop_assert!(SettlementPosting::build(&off_by_one, &customer, &products).is_err());
        }
    }
}
