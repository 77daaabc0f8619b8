//! Idempotency record repository
//!
//! The key is the concurrency boundary: a commit is a plain insert that
//! loses quietly on the primary key, and every update runs under a row lock
//! so the write-once merge in `IdempotencyRecord::apply` sees the latest
//! committed state. Step leases are taken with a single conditional
//! `UPDATE`; Postgres re-checks the condition after waiting on the row lock,
//! so of two racing claims only one matches.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{CustomerId, PaymentId, ProductId};
use domain_booking::{IdempotencyKey, IdempotencyRecord, OrderStep, PaymentStatus, RecordPatch, StepLease};

use crate::error::DatabaseError;

const SELECT_RECORD: &str = r#"
    SELECT idempotent_key, customer_id, order_ids, booked_seat_ids, movie_time_slot_id,
           payment_status, payment_id, payment_link, is_ticket_sent, is_mail_sent,
           in_flight_step, in_flight_until, expires_at, created_at, updated_at
    FROM idempotency_records
    WHERE idempotent_key = $1
"#;

const CLAIM_STEP: &str = r#"
    UPDATE idempotency_records
    SET in_flight_step = $2, in_flight_until = $3
    WHERE idempotent_key = $1
      AND (in_flight_until IS NULL OR in_flight_until <= $4)
    RETURNING idempotent_key, customer_id, order_ids, booked_seat_ids, movie_time_slot_id,
              payment_status, payment_id, payment_link, is_ticket_sent, is_mail_sent,
              in_flight_step, in_flight_until, expires_at, created_at, updated_at
"#;

/// Outcome of a lease claim at the row level
#[derive(Debug)]
pub enum ClaimedRow {
    Claimed(IdempotencyRow),
    /// The row exists but another live lease holds it
    Held(IdempotencyRow),
}

/// Repository for `idempotency_records`
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn find(&self, key: &str) -> Result<Option<IdempotencyRow>, DatabaseError> {
        let row = sqlx::query_as::<_, IdempotencyRow>(SELECT_RECORD)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Inserts a fresh record; returns false if the key already exists
    #[instrument(skip(self, record), fields(key = %record.idempotent_key))]
    pub async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, DatabaseError> {
        let row = IdempotencyRow::from(record);
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                idempotent_key, customer_id, order_ids, booked_seat_ids, movie_time_slot_id,
                payment_status, payment_id, payment_link, is_ticket_sent, is_mail_sent,
                expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (idempotent_key) DO NOTHING
            "#,
        )
        .bind(&row.idempotent_key)
        .bind(&row.customer_id)
        .bind(&row.order_ids)
        .bind(&row.booked_seat_ids)
        .bind(row.movie_time_slot_id)
        .bind(row.payment_status)
        .bind(&row.payment_id)
        .bind(&row.payment_link)
        .bind(row.is_ticket_sent)
        .bind(row.is_mail_sent)
        .bind(row.expires_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(inserted, "Idempotency record insert");
        Ok(inserted)
    }

    /// Merges `patch` into the stored record under `SELECT ... FOR UPDATE`
    ///
    /// # Errors
    ///
    /// - `NotFound` if the key was never committed
    /// - `Conflict` if the patch would overwrite a write-once field or move
    ///   the payment status backwards
    #[instrument(skip(self, patch))]
    pub async fn update(&self, key: &str, patch: &RecordPatch) -> Result<IdempotencyRecord, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let locked = format!("{} FOR UPDATE", SELECT_RECORD.trim_end());
        let row = sqlx::query_as::<_, IdempotencyRow>(&locked)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DatabaseError::not_found("IdempotencyRecord", key))?;

        let mut record = row.into_record()?;
        let changed = record
            .apply(patch)
            .map_err(|e| DatabaseError::Conflict(e.to_string()))?;

        if !changed {
            tx.rollback().await?;
            return Ok(record);
        }

        let next = IdempotencyRow::from(&record);
        sqlx::query(
            r#"
            UPDATE idempotency_records SET
                customer_id = $2,
                order_ids = $3,
                booked_seat_ids = $4,
                movie_time_slot_id = $5,
                payment_status = $6,
                payment_id = $7,
                payment_link = $8,
                is_ticket_sent = $9,
                is_mail_sent = $10,
                updated_at = $11
            WHERE idempotent_key = $1
            "#,
        )
        .bind(&next.idempotent_key)
        .bind(&next.customer_id)
        .bind(&next.order_ids)
        .bind(&next.booked_seat_ids)
        .bind(next.movie_time_slot_id)
        .bind(next.payment_status)
        .bind(&next.payment_id)
        .bind(&next.payment_link)
        .bind(next.is_ticket_sent)
        .bind(next.is_mail_sent)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Writes `lease` unless a lease expiring after `now` is present
    ///
    /// # Errors
    ///
    /// - `NotFound` if the key was never committed
    #[instrument(skip(self, lease), fields(step = %lease.step))]
    pub async fn claim_step(
        &self,
        key: &str,
        lease: &StepLease,
        now: DateTime<Utc>,
    ) -> Result<ClaimedRow, DatabaseError> {
        let claimed = sqlx::query_as::<_, IdempotencyRow>(CLAIM_STEP)
            .bind(key)
            .bind(lease.step.as_str())
            .bind(lease.until)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = claimed {
            debug!("Step lease claimed");
            return Ok(ClaimedRow::Claimed(row));
        }

        self.find(key)
            .await?
            .map(ClaimedRow::Held)
            .ok_or_else(|| DatabaseError::not_found("IdempotencyRecord", key))
    }

    /// Clears the lease only if the row still carries exactly `lease`
    #[instrument(skip(self, lease), fields(step = %lease.step))]
    pub async fn release_step(&self, key: &str, lease: &StepLease) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET in_flight_step = NULL, in_flight_until = NULL
            WHERE idempotent_key = $1 AND in_flight_step = $2 AND in_flight_until = $3
            "#,
        )
        .bind(key)
        .bind(lease.step.as_str())
        .bind(lease.until)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// PostgreSQL `payment_status` enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbPaymentStatus {
    Unset,
    Initiated,
    Settled,
    Failed,
}

/// Database row for an idempotency record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyRow {
    pub idempotent_key: String,
    pub customer_id: Option<String>,
    pub order_ids: Vec<String>,
    pub booked_seat_ids: Vec<i32>,
    pub movie_time_slot_id: Option<i32>,
    pub payment_status: DbPaymentStatus,
    pub payment_id: Option<String>,
    pub payment_link: Option<String>,
    pub is_ticket_sent: bool,
    pub is_mail_sent: bool,
    pub in_flight_step: Option<String>,
    pub in_flight_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentStatus> for DbPaymentStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Unset => DbPaymentStatus::Unset,
            PaymentStatus::Initiated => DbPaymentStatus::Initiated,
            PaymentStatus::Settled => DbPaymentStatus::Settled,
            PaymentStatus::Failed => DbPaymentStatus::Failed,
        }
    }
}

impl From<DbPaymentStatus> for PaymentStatus {
    fn from(status: DbPaymentStatus) -> Self {
        match status {
            DbPaymentStatus::Unset => PaymentStatus::Unset,
            DbPaymentStatus::Initiated => PaymentStatus::Initiated,
            DbPaymentStatus::Settled => PaymentStatus::Settled,
            DbPaymentStatus::Failed => PaymentStatus::Failed,
        }
    }
}

impl From<&IdempotencyRecord> for IdempotencyRow {
    fn from(record: &IdempotencyRecord) -> Self {
        Self {
            idempotent_key: record.idempotent_key.as_str().to_string(),
            customer_id: record.customer_id.as_ref().map(|id| id.as_str().to_string()),
            order_ids: record.order_ids.iter().map(|id| id.as_str().to_string()).collect(),
            booked_seat_ids: record.booked_seat_ids.clone(),
            movie_time_slot_id: record.movie_time_slot_id,
            payment_status: record.payment_status.into(),
            payment_id: record.payment_id.as_ref().map(|id| id.as_str().to_string()),
            payment_link: record.payment_link.clone(),
            is_ticket_sent: record.is_ticket_sent,
            is_mail_sent: record.is_mail_sent,
            in_flight_step: record.in_flight.map(|lease| lease.step.as_str().to_string()),
            in_flight_until: record.in_flight.map(|lease| lease.until),
            expires_at: record.expires_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl IdempotencyRow {
    /// The stored step lease, if both lease columns are set
    pub fn lease(&self) -> Result<Option<StepLease>, DatabaseError> {
        match (self.in_flight_step.as_deref(), self.in_flight_until) {
            (Some(step), Some(until)) => {
                let step = OrderStep::parse(step)
                    .ok_or_else(|| DatabaseError::SerializationError(format!("unknown step {}", step)))?;
                Ok(Some(StepLease { step, until }))
            }
            _ => Ok(None),
        }
    }

    /// Maps the row back to the domain record
    pub fn into_record(self) -> Result<IdempotencyRecord, DatabaseError> {
        let idempotent_key = IdempotencyKey::parse(&self.idempotent_key)
            .map_err(|e| DatabaseError::SerializationError(format!("stored key is invalid: {}", e)))?;
        let in_flight = self.lease()?;

        Ok(IdempotencyRecord {
            idempotent_key,
            customer_id: self.customer_id.map(CustomerId::new),
            order_ids: self.order_ids.into_iter().map(ProductId::new).collect(),
            booked_seat_ids: self.booked_seat_ids,
            movie_time_slot_id: self.movie_time_slot_id,
            payment_status: self.payment_status.into(),
            payment_id: self.payment_id.map(PaymentId::new),
            payment_link: self.payment_link,
            is_ticket_sent: self.is_ticket_sent,
            is_mail_sent: self.is_mail_sent,
            in_flight,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_round_trip() {
        let key = IdempotencyKey::parse("K-row").unwrap();
        let mut record = IdempotencyRecord::new(key, chrono::Duration::hours(24));
        record
            .apply(&RecordPatch::orders(vec![ProductId::new("pdt_1")], 42, vec![101]))
            .unwrap();

        let restored = IdempotencyRow::from(&record).into_record().unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_lease_columns_round_trip() {
        let key = IdempotencyKey::parse("K-lease").unwrap();
        let mut record = IdempotencyRecord::new(key, chrono::Duration::hours(24));
        let lease = StepLease::new(OrderStep::Customer, chrono::Duration::seconds(20));
        record.try_claim(lease, Utc::now()).unwrap();

        let row = IdempotencyRow::from(&record);
        assert_eq!(row.in_flight_step.as_deref(), Some("customer"));
        assert_eq!(row.lease().unwrap(), Some(lease));
    }

    #[test]
    fn test_unknown_lease_step_is_rejected() {
        let key = IdempotencyKey::parse("K-lease").unwrap();
        let mut row = IdempotencyRow::from(&IdempotencyRecord::new(key, chrono::Duration::hours(24)));
        row.in_flight_step = Some("refund".to_string());
        row.in_flight_until = Some(Utc::now());
        assert!(matches!(row.into_record(), Err(DatabaseError::SerializationError(_))));
    }

    #[test]
    fn test_status_mapping() {
        for status in [
            PaymentStatus::Unset,
            PaymentStatus::Initiated,
            PaymentStatus::Settled,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::from(DbPaymentStatus::from(status)), status);
        }
    }
}
