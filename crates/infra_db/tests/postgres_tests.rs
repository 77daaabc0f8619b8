//! PostgreSQL adapter tests
//!
//! These run against a testcontainers PostgreSQL and are ignored by default:
//! `cargo test -p infra_db -- --ignored` with Docker available.

use std::sync::Arc;

use rust_decimal_macros::dec;

use core_kernel::{Currency, CustomerId, Money, PaymentId, ProductId};
use domain_billing::{LedgerStore, PostingLine, PostingReceipt, SettlementPosting};
use domain_booking::{
    IdempotencyKey, IdempotencyRecord, IdempotencyStore, OrderStep, PaymentStatus, RecordPatch, StepClaim, StepLease,
};
use infra_db::{PostgresIdempotencyStore, PostgresLedgerStore};
use test_utils::{assert_entries_sum_to, create_isolated_test_database, SettlementBuilder};

fn key(raw: &str) -> IdempotencyKey {
    IdempotencyKey::parse(raw).unwrap()
}

fn fresh(raw: &str) -> IdempotencyRecord {
    IdempotencyRecord::new(key(raw), chrono::Duration::hours(24))
}

mod idempotency_store_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_insert_is_idempotent() {
        let db = create_isolated_test_database().await.unwrap();
        let store = PostgresIdempotencyStore::new(db.pool().clone());

        assert!(store.insert(&fresh("pg-insert-1")).await.unwrap());
        assert!(!store.insert(&fresh("pg-insert-1")).await.unwrap());

        let found = store.find(&key("pg-insert-1")).await.unwrap().unwrap();
        assert_eq!(found.payment_status, PaymentStatus::Unset);
        assert!(found.order_ids.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_concurrent_inserts_have_one_winner() {
        let db = create_isolated_test_database().await.unwrap();
        let store = Arc::new(PostgresIdempotencyStore::new(db.pool().clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.insert(&fresh("pg-race-1")).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_update_is_write_once() {
        let db = create_isolated_test_database().await.unwrap();
        let store = PostgresIdempotencyStore::new(db.pool().clone());
        store.insert(&fresh("pg-update-1")).await.unwrap();

        let patch = RecordPatch::orders(vec![ProductId::new("pdt_1"), ProductId::new("pdt_2")], 42, vec![101, 102]);
        let record = store.update(&key("pg-update-1"), &patch).await.unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Initiated);
        assert_eq!(record.booked_seat_ids, vec![101, 102]);

        // identical rewrite is a no-op
        store.update(&key("pg-update-1"), &patch).await.unwrap();

        let other = RecordPatch::orders(vec![ProductId::new("pdt_9")], 42, vec![103]);
        let err = store.update(&key("pg-update-1"), &other).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.find(&key("pg-update-1")).await.unwrap().unwrap();
        assert_eq!(stored.order_ids, vec![ProductId::new("pdt_1"), ProductId::new("pdt_2")]);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_update_of_unknown_key() {
        let db = create_isolated_test_database().await.unwrap();
        let store = PostgresIdempotencyStore::new(db.pool().clone());

        let err = store
            .update(&key("pg-missing-1"), &RecordPatch::customer(CustomerId::new("cus_1")))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_concurrent_step_claims_have_one_winner() {
        let db = create_isolated_test_database().await.unwrap();
        let store = Arc::new(PostgresIdempotencyStore::new(db.pool().clone()));
        store.insert(&fresh("pg-lease-1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let lease = StepLease::new(OrderStep::Order, chrono::Duration::seconds(30));
                store.claim_step(&key("pg-lease-1"), &lease).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), StepClaim::Claimed(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_released_and_expired_leases_can_be_claimed() {
        let db = create_isolated_test_database().await.unwrap();
        let store = PostgresIdempotencyStore::new(db.pool().clone());
        store.insert(&fresh("pg-lease-2")).await.unwrap();

        let stale = StepLease::new(OrderStep::Customer, chrono::Duration::seconds(-5));
        assert!(matches!(store.claim_step(&key("pg-lease-2"), &stale).await.unwrap(), StepClaim::Claimed(_)));

        let fresh_lease = StepLease::new(OrderStep::Customer, chrono::Duration::seconds(30));
        let claimed = store.claim_step(&key("pg-lease-2"), &fresh_lease).await.unwrap();
        let StepClaim::Claimed(record) = claimed else {
            panic!("expired lease was not taken over");
        };
        assert_eq!(record.in_flight, Some(fresh_lease));

        // the stale holder must not clear the new lease
        store.release_step(&key("pg-lease-2"), &stale).await.unwrap();
        let other = StepLease::new(OrderStep::PaymentLink, chrono::Duration::seconds(30));
        assert_eq!(
            store.claim_step(&key("pg-lease-2"), &other).await.unwrap(),
            StepClaim::Busy(fresh_lease)
        );

        store.release_step(&key("pg-lease-2"), &fresh_lease).await.unwrap();
        assert!(matches!(store.claim_step(&key("pg-lease-2"), &other).await.unwrap(), StepClaim::Claimed(_)));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_claim_of_unknown_key() {
        let db = create_isolated_test_database().await.unwrap();
        let store = PostgresIdempotencyStore::new(db.pool().clone());

        let lease = StepLease::new(OrderStep::Order, chrono::Duration::seconds(30));
        let err = store.claim_step(&key("pg-missing-2"), &lease).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

mod ledger_store_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_post_two_lines_and_redeliver() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = PostgresLedgerStore::new(db.pool().clone());
        let posting = SettlementBuilder::new()
            .with_payment_id("pay_pg_1")
            .with_customer_id("cus_pg_1")
            .with_line("pdt_1", 25_000, 1)
            .with_line("pdt_2", 25_000, 1)
            .posting()
            .unwrap();

        let receipt = ledger.post_settlement(&posting).await.unwrap();
        let PostingReceipt::Posted { wallet, entries } = receipt else {
            panic!("expected Posted");
        };
        assert_eq!(wallet.balance, Money::new(dec!(500), Currency::INR));
        assert_entries_sum_to(&entries, &posting.total);

        let again = ledger.post_settlement(&posting).await.unwrap();
        assert!(matches!(again, PostingReceipt::AlreadyPosted { .. }));

        let wallet = ledger.find_wallet(&CustomerId::new("cus_pg_1")).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Money::new(dec!(500), Currency::INR));
        let stored = ledger.entries_for_transaction("pay_pg_1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].psp_ref_id, PaymentId::new("pay_pg_1"));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_failed_entry_rolls_back_wallet() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = PostgresLedgerStore::new(db.pool().clone());

        let line = |line_no: i32, order: &str| PostingLine {
            line_no,
            order_id: ProductId::new(order),
            amount: Money::new(dec!(250), Currency::INR),
            description: "Payment received for product Seat".to_string(),
        };
        // line 0 violates the line_no check after the wallet was credited
        let posting = SettlementPosting {
            transaction_id: "pay_pg_rollback".to_string(),
            psp_ref_id: PaymentId::new("pay_pg_rollback"),
            user_id: CustomerId::new("cus_pg_rollback"),
            total: Money::new(dec!(500), Currency::INR),
            lines: vec![line(1, "pdt_1"), line(0, "pdt_2")],
        };

        assert!(ledger.post_settlement(&posting).await.is_err());

        assert!(ledger
            .find_wallet(&CustomerId::new("cus_pg_rollback"))
            .await
            .unwrap()
            .is_none());
        assert!(ledger.entries_for_transaction("pay_pg_rollback").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_concurrent_deliveries_credit_once() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = Arc::new(PostgresLedgerStore::new(db.pool().clone()));
        let posting = SettlementBuilder::new()
            .with_payment_id("pay_pg_race")
            .with_customer_id("cus_pg_race")
            .with_line("pdt_1", 15_000, 2)
            .posting()
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = ledger.clone();
            let posting = posting.clone();
            handles.push(tokio::spawn(async move { ledger.post_settlement(&posting).await.unwrap() }));
        }
        let mut posted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), PostingReceipt::Posted { .. }) {
                posted += 1;
            }
        }

        assert_eq!(posted, 1);
        let wallet = ledger.find_wallet(&CustomerId::new("cus_pg_race")).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Money::new(dec!(300), Currency::INR));
    }
}
