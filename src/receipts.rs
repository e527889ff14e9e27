//! Identity-keyed storage for provider delivery receipts.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{CourierError, CourierResult};
use crate::models::Email;

/// An in-memory map from an email instance's identity to the provider
/// receipt recorded by its most recent successful delivery.
///
/// Keys are the id assigned to each [`Email`] at construction, not its
/// structural content, so two identical emails built separately track
/// independent receipts. The map is guarded by a mutex so a courier instance
/// can be shared across concurrent callers.
#[derive(Debug, Default)]
pub struct ReceiptStore {
    receipts: Mutex<HashMap<Uuid, String>>,
}

impl ReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the receipt for an email, replacing any earlier one.
    pub fn save(&self, email: &Email, receipt: impl Into<String>) {
        self.receipts
            .lock()
            .expect("receipt store lock poisoned")
            .insert(email.id, receipt.into());
    }

    /// Look up the receipt recorded for this email instance.
    pub fn receipt_for(&self, email: &Email) -> CourierResult<String> {
        self.receipts
            .lock()
            .expect("receipt store lock poisoned")
            .get(&email.id)
            .cloned()
            .ok_or(CourierError::Receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;

    #[test]
    fn round_trips_a_receipt() {
        let store = ReceiptStore::new();
        let email = Email::new(Address::new("from@example.com"), "Subject");

        store.save(&email, "receipt-1");
        assert_eq!(store.receipt_for(&email).unwrap(), "receipt-1");
    }

    #[test]
    fn missing_receipt_is_an_error() {
        let store = ReceiptStore::new();
        let email = Email::new(Address::new("from@example.com"), "Subject");

        assert!(matches!(
            store.receipt_for(&email),
            Err(CourierError::Receipt)
        ));
    }

    #[test]
    fn identical_emails_track_independent_receipts() {
        let store = ReceiptStore::new();
        let first = Email::new(Address::new("from@example.com"), "Subject");
        let second = Email::new(Address::new("from@example.com"), "Subject");

        store.save(&first, "receipt-1");

        assert_eq!(store.receipt_for(&first).unwrap(), "receipt-1");
        assert!(matches!(
            store.receipt_for(&second),
            Err(CourierError::Receipt)
        ));
    }

    #[test]
    fn latest_receipt_wins() {
        let store = ReceiptStore::new();
        let email = Email::new(Address::new("from@example.com"), "Subject");

        store.save(&email, "first");
        store.save(&email, "second");
        assert_eq!(store.receipt_for(&email).unwrap(), "second");
    }
}
