//! Wallet ledger
//!
//! Ledger entries are immutable and append-only. Each explains a change of
//! one wallet's balance and carries the external reference of the
//! settlement it came from.
//!
//! # Invariants
//!
//! - (`transaction_id`, `line_no`) is unique, so one settlement line is
//!   never posted twice
//! - For a given `transaction_id` the entries sum to the settled amount
//! - A wallet's balance and its entries are written in one unit of work

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{CustomerId, DomainPort, LedgerEntryId, Money, PaymentId, PortError, ProductId, WalletId};

use crate::posting::SettlementPosting;
use crate::wallet::Wallet;

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Credit,
    Debit,
    Refund,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Credit => "credit",
            EntryType::Debit => "debit",
            EntryType::Refund => "refund",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(EntryType::Credit),
            "debit" => Ok(EntryType::Debit),
            "refund" => Ok(EntryType::Refund),
            other => Err(format!("unknown ledger entry type: {}", other)),
        }
    }
}

/// An immutable ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub wallet_id: WalletId,
    /// Catalog product the line paid for
    pub order_id: Option<ProductId>,
    /// External reference of the settlement
    pub transaction_id: String,
    /// 1-based position within the settlement
    pub line_no: i32,
    pub amount: Money,
    pub entry_type: EntryType,
    pub description: String,
    /// Gateway payment id
    pub psp_ref_id: PaymentId,
    pub created_at: DateTime<Utc>,
}

/// Result of posting a settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingReceipt {
    /// Wallet credited and entries written
    Posted {
        wallet: Wallet,
        entries: Vec<LedgerEntry>,
    },
    /// The settlement's entries already existed; nothing was written
    AlreadyPosted { transaction_id: String },
}

/// Durable wallet and ledger storage
#[async_trait]
pub trait LedgerStore: DomainPort {
    /// Posts a settlement as one unit of work
    ///
    /// Creates or reuses the user's wallet (row-locked), credits it by the
    /// posting total and appends one entry per line. Either everything is
    /// committed or nothing is. Returns `AlreadyPosted` when entries for
    /// the posting's `transaction_id` exist.
    async fn post_settlement(&self, posting: &SettlementPosting) -> Result<PostingReceipt, PortError>;

    async fn find_wallet(&self, user_id: &CustomerId) -> Result<Option<Wallet>, PortError>;

    /// Entries written for a settlement, ordered by line number
    async fn entries_for_transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntry>, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trip() {
        for t in [EntryType::Credit, EntryType::Debit, EntryType::Refund] {
            assert_eq!(t.as_str().parse::<EntryType>().unwrap(), t);
        }
        assert!("chargeback".parse::<EntryType>().is_err());
        assert_eq!(serde_json::to_string(&EntryType::Credit).unwrap(), "\"credit\"");
    }
}
