//! Customer wallets
//!
//! One wallet per gateway customer, created on the customer's first
//! settlement. The balance only changes together with the ledger entries
//! that explain it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{Currency, CustomerId, Money, WalletId};

use crate::error::BillingError;

/// A customer's wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique identifier
    pub id: WalletId,
    /// Gateway customer owning the wallet
    pub user_id: CustomerId,
    /// Current balance
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Opens an empty wallet for a customer
    ///
    /// # Arguments
    ///
    /// * `user_id` - The gateway customer
    /// * `currency` - Currency the wallet is kept in
    pub fn open(user_id: CustomerId, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            user_id,
            balance: Money::zero(currency),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn currency(&self) -> Currency {
        self.balance.currency()
    }

    /// Adds `amount` to the balance
    ///
    /// # Errors
    ///
    /// Returns `CurrencyMismatch` if `amount` is not in the wallet currency
    pub fn credit(&mut self, amount: &Money) -> Result<(), BillingError> {
        self.balance = self.balance.checked_add(amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}
