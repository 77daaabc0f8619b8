//! Wallet and ledger repository
//!
//! A settlement is posted in a single transaction:
//!
//! 1. create the user's wallet if missing, then lock its row
//! 2. stop if entries for the transaction already exist
//! 3. credit the wallet by the posting total
//! 4. insert one entry per line
//!
//! Locking the wallet before the existence check serializes concurrent
//! deliveries of the same settlement; the `(transaction_id, line_no)`
//! unique constraint catches anything that slips past it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use domain_billing::{EntryType, LedgerEntry, SettlementPosting};

use crate::error::DatabaseError;

const SELECT_WALLET: &str = r#"
    SELECT id, user_id, balance, currency, created_at, updated_at
    FROM wallets
    WHERE user_id = $1
"#;

const SELECT_ENTRIES: &str = r#"
    SELECT e.id, e.wallet_id, e.order_id, e.transaction_id, e.line_no, e.amount,
           e.entry_type, e.description, e.psp_ref_id, e.created_at, w.currency
    FROM ledger_entries e
    JOIN wallets w ON w.id = e.wallet_id
    WHERE e.transaction_id = $1
    ORDER BY e.line_no
"#;

/// Outcome of a ledger write
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    Posted {
        wallet: WalletRow,
        entries: Vec<LedgerEntryRow>,
    },
    AlreadyPosted,
}

/// Repository for `wallets` and `ledger_entries`
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Posts a settlement atomically
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the wallet is kept in a different
    /// currency; any error rolls the whole transaction back
    #[instrument(skip(self, posting), fields(transaction_id = %posting.transaction_id, lines = posting.lines.len()))]
    pub async fn post_settlement(&self, posting: &SettlementPosting) -> Result<LedgerWrite, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let wallet = Self::lock_wallet(&mut tx, posting).await?;

        let already_posted: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE transaction_id = $1)")
                .bind(&posting.transaction_id)
                .fetch_one(&mut *tx)
                .await?;
        if already_posted {
            tx.rollback().await?;
            info!("Settlement already in ledger");
            return Ok(LedgerWrite::AlreadyPosted);
        }

        if wallet.currency != posting.currency().code() {
            return Err(DatabaseError::ConstraintViolation(format!(
                "wallet {} is kept in {}, settlement is in {}",
                wallet.id,
                wallet.currency,
                posting.currency()
            )));
        }

        let wallet = sqlx::query_as::<_, WalletRow>(
            r#"
            UPDATE wallets SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, balance, currency, created_at, updated_at
            "#,
        )
        .bind(wallet.id)
        .bind(posting.total.amount())
        .fetch_one(&mut *tx)
        .await?;

        let mut rows = Vec::with_capacity(posting.lines.len());
        for entry in posting.entries(wallet.id.into()) {
            let inserted = Self::insert_entry(&mut tx, &entry, &wallet.currency).await;
            match inserted {
                Ok(row) => rows.push(row),
                Err(e) if e.is_unique_violation() => {
                    warn!(line_no = entry.line_no, "Concurrent posting of the same settlement");
                    tx.rollback().await?;
                    return Ok(LedgerWrite::AlreadyPosted);
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        debug!(wallet_id = %wallet.id, balance = %wallet.balance, "Wallet credited");
        Ok(LedgerWrite::Posted { wallet, entries: rows })
    }

    async fn lock_wallet(
        tx: &mut Transaction<'_, Postgres>,
        posting: &SettlementPosting,
    ) -> Result<WalletRow, DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, currency, created_at, updated_at)
            VALUES ($1, $2, 0, $3, NOW(), NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(posting.user_id.as_str())
        .bind(posting.currency().code())
        .execute(&mut **tx)
        .await?;

        let locked = format!("{} FOR UPDATE", SELECT_WALLET.trim_end());
        let wallet = sqlx::query_as::<_, WalletRow>(&locked)
            .bind(posting.user_id.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok(wallet)
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
        currency: &str,
    ) -> Result<LedgerEntryRow, DatabaseError> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            INSERT INTO ledger_entries (
                id, wallet_id, order_id, transaction_id, line_no, amount,
                entry_type, description, psp_ref_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, wallet_id, order_id, transaction_id, line_no, amount,
                      entry_type, description, psp_ref_id, created_at, $11::VARCHAR AS currency
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.wallet_id.as_uuid())
        .bind(entry.order_id.as_ref().map(|id| id.as_str()))
        .bind(&entry.transaction_id)
        .bind(entry.line_no)
        .bind(entry.amount.amount())
        .bind(DbEntryType::from(entry.entry_type))
        .bind(&entry.description)
        .bind(entry.psp_ref_id.as_str())
        .bind(entry.created_at)
        .bind(currency)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    pub async fn find_wallet(&self, user_id: &str) -> Result<Option<WalletRow>, DatabaseError> {
        let wallet = sqlx::query_as::<_, WalletRow>(SELECT_WALLET)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(wallet)
    }

    pub async fn entries_for_transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntryRow>, DatabaseError> {
        let entries = sqlx::query_as::<_, LedgerEntryRow>(SELECT_ENTRIES)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }
}

/// PostgreSQL `ledger_entry_type` enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_type", rename_all = "snake_case")]
pub enum DbEntryType {
    Credit,
    Debit,
    Refund,
}

impl From<EntryType> for DbEntryType {
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Credit => DbEntryType::Credit,
            EntryType::Debit => DbEntryType::Debit,
            EntryType::Refund => DbEntryType::Refund,
        }
    }
}

impl From<DbEntryType> for EntryType {
    fn from(entry_type: DbEntryType) -> Self {
        match entry_type {
            DbEntryType::Credit => EntryType::Credit,
            DbEntryType::Debit => EntryType::Debit,
            DbEntryType::Refund => EntryType::Refund,
        }
    }
}

/// Database row for a wallet
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WalletRow {
    pub id: Uuid,
    pub user_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for a ledger entry, with its wallet's currency
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub order_id: Option<String>,
    pub transaction_id: String,
    pub line_no: i32,
    pub amount: Decimal,
    pub entry_type: DbEntryType,
    pub description: String,
    pub psp_ref_id: String,
    pub created_at: DateTime<Utc>,
    pub currency: String,
}
