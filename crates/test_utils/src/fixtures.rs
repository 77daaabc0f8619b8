//! Pre-built Test Fixtures
//!
//! Predictable values for the common booking inputs, plus a randomized
//! buyer built with `fake`.

use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;

use domain_booking::{BillingAddress, CustomerDetails, PaymentLinkRequest};

/// Fixture for booking inputs
pub struct BookingFixtures;

impl BookingFixtures {
    pub const TIME_SLOT: i32 = 42;
    pub const SEATS: [i32; 2] = [101, 102];

    pub fn customer() -> CustomerDetails {
        CustomerDetails {
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
            phone_number: "+919876543210".to_string(),
        }
    }

    /// A customer with generated name and email
    pub fn random_customer() -> CustomerDetails {
        CustomerDetails {
            name: Name().fake(),
            email: SafeEmail().fake(),
            phone_number: format!("+91{}", (7_000_000_000u64..9_999_999_999u64).fake::<u64>()),
        }
    }

    pub fn billing_address() -> BillingAddress {
        BillingAddress {
            street: "12 MG Road".to_string(),
            city: "Bengaluru".to_string(),
            state: "Karnataka".to_string(),
            country: "IN".to_string(),
            zipcode: "560001".to_string(),
        }
    }

    /// Whole-flow request for the standard seats under `key`
    pub fn checkout_request(key: &str) -> PaymentLinkRequest {
        PaymentLinkRequest {
            idempotent_key: key.to_string(),
            movie_time_slot_id: Self::TIME_SLOT,
            seat_matrix_ids: Self::SEATS.to_vec(),
            customer: Self::customer(),
            billing_address: Self::billing_address(),
        }
    }
}
