//! Custom Test Assertions

use core_kernel::Money;
use domain_billing::{EntryType, LedgerEntry};
use domain_booking::{IdempotencyRecord, OrderStage};

/// Asserts that the credit entries of one settlement add up to `total`
///
/// # Panics
///
/// Panics if the entries mix transactions or currencies, or do not sum to `total`
pub fn assert_entries_sum_to(entries: &[LedgerEntry], total: &Money) {
    assert!(!entries.is_empty(), "Expected ledger entries, got none");

    let transaction_id = &entries[0].transaction_id;
    assert!(
        entries.iter().all(|e| &e.transaction_id == transaction_id),
        "Entries belong to more than one transaction"
    );
    assert!(
        entries.iter().all(|e| e.entry_type == EntryType::Credit),
        "Expected only credit entries"
    );

    let sum = Money::sum(total.currency(), entries.iter().map(|e| &e.amount))
        .unwrap_or_else(|e| panic!("Entries cannot be summed: {}", e));
    assert_eq!(&sum, total, "Entries of {} sum to {}, expected {}", transaction_id, sum, total);

    let mut line_numbers: Vec<i32> = entries.iter().map(|e| e.line_no).collect();
    line_numbers.sort_unstable();
    let expected: Vec<i32> = (1..=entries.len() as i32).collect();
    assert_eq!(line_numbers, expected, "Line numbers are not 1..=n");
}

/// Asserts the orchestration stage of a record
pub fn assert_stage(record: &IdempotencyRecord, expected: OrderStage) {
    assert_eq!(
        record.stage(),
        expected,
        "Record {} is at {:?}, expected {:?}",
        record.idempotent_key,
        record.stage(),
        expected
    );
}

/// Asserts that a record has none of the booking results written
pub fn assert_untouched(record: &IdempotencyRecord) {
    assert!(record.order_ids.is_empty(), "order_ids written: {:?}", record.order_ids);
    assert!(record.booked_seat_ids.is_empty(), "booked_seat_ids written: {:?}", record.booked_seat_ids);
    assert!(record.customer_id.is_none(), "customer_id written: {:?}", record.customer_id);
    assert!(record.payment_link.is_none(), "payment_link written");
}
