//! Input validation
//!
//! Every operation validates its input before touching the store or any
//! network collaborator. Checks collect all violations instead of stopping
//! at the first one, so a client sees every bad field in one response.
//!
//! # Rules
//!
//! - Idempotency keys: 1..=255 characters, no leading/trailing whitespace
//! - Emails: syntactically valid address
//! - Phones: E.164 (`+` followed by 8 to 15 digits, no leading zero)
//! - Seat selections: positive time slot, at least one seat, no duplicates
//! - Billing addresses: every line present, ISO 3166-1 alpha-2 country

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use validator::ValidateEmail;

use crate::checkout::{BillingAddress, CustomerDetails};

/// Longest idempotency key accepted
pub const MAX_KEY_LENGTH: usize = 255;

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// All violations found in one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldViolation>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation for `field`
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.0
    }

    /// Returns true if `field` has at least one violation
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }

    /// Converts the collected violations into a result
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Validates a caller-supplied idempotency key
pub fn validate_idempotent_key(key: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_idempotent_key(key, &mut errors);
    errors.into_result()
}

/// Validates the customer fields sent to the payment gateway
pub fn validate_customer(details: &CustomerDetails) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_customer(details, &mut errors);
    errors.into_result()
}

/// Validates a seat selection for one show time slot
pub fn validate_seat_selection(time_slot_id: i32, seat_ids: &[i32]) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_seat_selection(time_slot_id, seat_ids, &mut errors);
    errors.into_result()
}

/// Validates a billing address
pub fn validate_billing_address(address: &BillingAddress) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_billing_address(address, &mut errors);
    errors.into_result()
}

pub(crate) fn check_idempotent_key(key: &str, errors: &mut ValidationErrors) {
    if key.is_empty() {
        errors.add("idempotent_key", "must not be empty");
    } else if key.chars().count() > MAX_KEY_LENGTH {
        errors.add("idempotent_key", format!("must be at most {} characters", MAX_KEY_LENGTH));
    } else if key.trim() != key {
        errors.add("idempotent_key", "must not have leading or trailing whitespace");
    }
}

pub(crate) fn check_customer(details: &CustomerDetails, errors: &mut ValidationErrors) {
    if details.name.trim().is_empty() {
        errors.add("name", "must not be empty");
    }

    if details.email.trim().is_empty() {
        errors.add("email", "must not be empty");
    } else if !details.email.validate_email() {
        errors.add("email", "is not a valid email address");
    }

    if details.phone_number.trim().is_empty() {
        errors.add("phone_number", "must not be empty");
    } else if !is_e164(&details.phone_number) {
        errors.add("phone_number", "must be in E.164 format, e.g. +919876543210");
    }
}

pub(crate) fn check_seat_selection(time_slot_id: i32, seat_ids: &[i32], errors: &mut ValidationErrors) {
    if time_slot_id <= 0 {
        errors.add("movie_time_slot_id", "must be a positive id");
    }

    if seat_ids.is_empty() {
        errors.add("seat_matrix_ids", "at least one seat is required");
        return;
    }

    if seat_ids.iter().any(|id| *id <= 0) {
        errors.add("seat_matrix_ids", "seat ids must be positive");
    }

    let mut seen = HashSet::with_capacity(seat_ids.len());
    if let Some(dup) = seat_ids.iter().find(|id| !seen.insert(**id)) {
        errors.add("seat_matrix_ids", format!("seat {} is listed more than once", dup));
    }
}

pub(crate) fn check_billing_address(address: &BillingAddress, errors: &mut ValidationErrors) {
    let lines = [
        ("billing_address.street", &address.street),
        ("billing_address.city", &address.city),
        ("billing_address.state", &address.state),
        ("billing_address.zipcode", &address.zipcode),
    ];
    for (field, value) in lines {
        if value.trim().is_empty() {
            errors.add(field, "must not be empty");
        }
    }

    let country = address.country.as_str();
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_uppercase()) {
        errors.add("billing_address.country", "must be an ISO 3166-1 alpha-2 code");
    }
}

/// Returns true for E.164 numbers such as `+919876543210`
pub fn is_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn e164_accepts_well_formed_numbers(first in 1u8..=9, rest in "[0-9]{7,14}") {
            let phone = format!("+{}{}", first, rest);
            prop_assert!(is_e164(&phone));
        }

        #[test]
        fn distinct_positive_seats_are_accepted(seats in proptest::collection::hash_set(1i32..100_000, 1..40)) {
            let seats: Vec<i32> = seats.into_iter().collect();
            prop_assert!(validate_seat_selection(1, &seats).is_ok());
        }

        #[test]
        fn keys_with_outer_whitespace_are_rejected(core in "[A-Za-z0-9-]{1,50}") {
            let padded = format!(" {}", core);
            prop_assert!(validate_idempotent_key(&padded).is_err());
            prop_assert!(validate_idempotent_key(&core).is_ok());
        }
    }
}
