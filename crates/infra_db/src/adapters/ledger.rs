//! PostgreSQL ledger store
//!
//! Implements `LedgerStore` over `LedgerRepository` and maps rows back to
//! `Wallet` and `LedgerEntry`.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{error, instrument};

use core_kernel::{
    Currency, CustomerId, DomainPort, HealthCheckResult, HealthCheckable, LedgerEntryId, Money, PaymentId, PortError,
    ProductId, WalletId,
};
use domain_billing::{LedgerEntry, LedgerStore, PostingReceipt, SettlementPosting, Wallet};

use crate::error::DatabaseError;
use crate::repositories::ledger::{LedgerEntryRow, LedgerWrite, WalletRow};
use crate::repositories::LedgerRepository;

use super::ping;

/// PostgreSQL-backed `LedgerStore`
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    repository: LedgerRepository,
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: LedgerRepository::new(pool.clone()),
            pool,
        }
    }
}

impl DomainPort for PostgresLedgerStore {}

#[async_trait]
impl HealthCheckable for PostgresLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-ledger-store").await
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, posting), fields(transaction_id = %posting.transaction_id))]
    async fn post_settlement(&self, posting: &SettlementPosting) -> Result<PostingReceipt, PortError> {
        let write = self.repository.post_settlement(posting).await.map_err(|e| {
            error!(error = %e, "Ledger transaction rolled back");
            PortError::from(e)
        })?;

        match write {
            LedgerWrite::Posted { wallet, entries } => Ok(PostingReceipt::Posted {
                wallet: row_to_wallet(wallet)?,
                entries: entries.into_iter().map(row_to_entry).collect::<Result<_, _>>()?,
            }),
            LedgerWrite::AlreadyPosted => Ok(PostingReceipt::AlreadyPosted {
                transaction_id: posting.transaction_id.clone(),
            }),
        }
    }

    async fn find_wallet(&self, user_id: &CustomerId) -> Result<Option<Wallet>, PortError> {
        self.repository
            .find_wallet(user_id.as_str())
            .await
            .map_err(PortError::from)?
            .map(row_to_wallet)
            .transpose()
    }

    async fn entries_for_transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntry>, PortError> {
        self.repository
            .entries_for_transaction(transaction_id)
            .await
            .map_err(PortError::from)?
            .into_iter()
            .map(row_to_entry)
            .collect()
    }
}

fn currency(code: &str) -> Result<Currency, PortError> {
    Currency::from_str(code).map_err(|e| PortError::from(DatabaseError::SerializationError(e.to_string())))
}

fn row_to_wallet(row: WalletRow) -> Result<Wallet, PortError> {
    Ok(Wallet {
        id: WalletId::from_uuid(row.id),
        user_id: CustomerId::new(row.user_id),
        balance: Money::new(row.balance, currency(&row.currency)?),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_entry(row: LedgerEntryRow) -> Result<LedgerEntry, PortError> {
    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(row.id),
        wallet_id: WalletId::from_uuid(row.wallet_id),
        order_id: row.order_id.map(ProductId::new),
        transaction_id: row.transaction_id,
        line_no: row.line_no,
        amount: Money::new(row.amount, currency(&row.currency)?),
        entry_type: row.entry_type.into(),
        description: row.description,
        psp_ref_id: PaymentId::new(row.psp_ref_id),
        created_at: row.created_at,
    })
}
