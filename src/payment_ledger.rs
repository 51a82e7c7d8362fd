// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Thread-safe payment ledger.
//!
//! Stores every payment attempt, guarantees transaction reference uniqueness
//! and indexes payments by the gateway's checkout reference. Callbacks that
//! match no payment are parked in a queue for manual inspection.

use crate::base::{EnrollmentId, PaymentId};
use crate::enrollment::EnrollmentData;
use crate::payment::Payment;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Length of the random suffix in a transaction reference.
const REFERENCE_SUFFIX_LEN: usize = 8;

#[derive(Debug)]
struct LedgerEntry {
    /// Insertion order, used to list payments newest first.
    sequence: u64,
    payment: Arc<Payment>,
}

/// A callback that could not be matched to any payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedCallback {
    pub received_at: DateTime<Utc>,
    pub checkout_request_id: Option<String>,
    pub external_reference: Option<String>,
    pub raw: String,
}

#[derive(Debug, Default)]
pub struct PaymentLedger {
    payments: DashMap<PaymentId, LedgerEntry>,

    /// Transaction reference → payment. Doubles as the uniqueness guard.
    by_reference: DashMap<String, PaymentId>,

    /// Gateway checkout reference → payment.
    by_checkout: DashMap<String, PaymentId>,

    sequence: AtomicU64,

    orphaned_callbacks: SegQueue<OrphanedCallback>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and stores a payment for the enrollment under a fresh,
    /// unique transaction reference.
    pub(crate) fn create(
        &self,
        enrollment: &EnrollmentData,
        reference_prefix: &str,
        currency: &str,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Arc<Payment> {
        loop {
            let reference = generate_reference(reference_prefix);
            // Entry API gives an atomic check-and-insert on the reference.
            match self.by_reference.entry(reference.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let payment = Arc::new(Payment::for_enrollment(
                        enrollment,
                        reference,
                        currency.to_string(),
                        phone_number.to_string(),
                        now,
                    ));
                    let id = payment.id();
                    slot.insert(id);
                    self.payments.insert(
                        id,
                        LedgerEntry {
                            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                            payment: Arc::clone(&payment),
                        },
                    );
                    return payment;
                }
            }
        }
    }

    /// Indexes a payment under the gateway's checkout reference.
    pub(crate) fn index_checkout(&self, checkout_request_id: &str, payment_id: PaymentId) {
        self.by_checkout
            .entry(checkout_request_id.to_string())
            .or_insert(payment_id);
    }

    pub fn get(&self, id: &PaymentId) -> Option<Arc<Payment>> {
        self.payments.get(id).map(|e| Arc::clone(&e.payment))
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<Arc<Payment>> {
        let id = *self.by_reference.get(reference)?;
        self.get(&id)
    }

    pub fn find_by_checkout(&self, checkout_request_id: &str) -> Option<Arc<Payment>> {
        let id = *self.by_checkout.get(checkout_request_id)?;
        self.get(&id)
    }

    /// Resolves a callback to its payment: checkout reference first, then
    /// our own transaction reference.
    pub fn resolve(
        &self,
        checkout_request_id: Option<&str>,
        external_reference: Option<&str>,
    ) -> Option<Arc<Payment>> {
        checkout_request_id
            .and_then(|checkout| self.find_by_checkout(checkout))
            .or_else(|| external_reference.and_then(|reference| self.find_by_reference(reference)))
    }

    /// All payments, newest first.
    pub fn list(&self) -> Vec<Arc<Payment>> {
        let mut entries: Vec<(u64, Arc<Payment>)> = self
            .payments
            .iter()
            .map(|e| (e.sequence, Arc::clone(&e.payment)))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, payment)| payment).collect()
    }

    /// Payments made against one enrollment, newest first.
    pub fn for_enrollment(&self, enrollment_id: &EnrollmentId) -> Vec<Arc<Payment>> {
        self.list()
            .into_iter()
            .filter(|payment| payment.enrollment_id() == *enrollment_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }

    pub(crate) fn park_orphan(&self, orphan: OrphanedCallback) {
        self.orphaned_callbacks.push(orphan);
    }

    /// Drains callbacks that matched no payment, oldest first.
    pub fn take_orphaned_callbacks(&self) -> Vec<OrphanedCallback> {
        std::iter::from_fn(|| self.orphaned_callbacks.pop()).collect()
    }
}

/// `<prefix>-<8 uppercase alphanumerics>`
fn generate_reference(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}-{}",
        suffix[..REFERENCE_SUFFIX_LEN].to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{CourseId, StudentId};
    use crate::enrollment::Enrollment;
    use rust_decimal_macros::dec;

    fn enrollment() -> Enrollment {
        Enrollment::new(
            StudentId::new_v4(),
            CourseId::new_v4(),
            dec!(2999),
            None,
            Utc::now(),
        )
    }

    fn create(ledger: &PaymentLedger, enrollment: &Enrollment) -> Arc<Payment> {
        let data = enrollment.lock();
        ledger.create(&data, "MWZ", "KES", "254712345678", Utc::now())
    }

    #[test]
    fn reference_format() {
        let reference = generate_reference("MWZ");
        assert_eq!(reference.len(), 12);
        assert!(reference.starts_with("MWZ-"));
        assert!(
            reference[4..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn lookups_by_reference_and_checkout() {
        let ledger = PaymentLedger::new();
        let enrollment = enrollment();
        let payment = create(&ledger, &enrollment);
        ledger.index_checkout("ws_CO_123", payment.id());

        let by_ref = ledger
            .find_by_reference(&payment.transaction_reference())
            .unwrap();
        assert_eq!(by_ref.id(), payment.id());
        assert_eq!(ledger.find_by_checkout("ws_CO_123").unwrap().id(), payment.id());
        assert!(ledger.find_by_checkout("ws_CO_999").is_none());
    }

    #[test]
    fn resolve_falls_back_to_external_reference() {
        let ledger = PaymentLedger::new();
        let enrollment = enrollment();
        let payment = create(&ledger, &enrollment);
        let reference = payment.transaction_reference();

        let found = ledger.resolve(Some("ws_CO_unknown"), Some(&reference)).unwrap();
        assert_eq!(found.id(), payment.id());
        assert!(ledger.resolve(None, None).is_none());
    }

    #[test]
    fn list_is_newest_first() {
        let ledger = PaymentLedger::new();
        let enrollment = enrollment();
        let first = create(&ledger, &enrollment);
        let second = create(&ledger, &enrollment);

        let listed: Vec<PaymentId> = ledger.list().iter().map(|p| p.id()).collect();
        assert_eq!(listed, vec![second.id(), first.id()]);
        assert_eq!(ledger.for_enrollment(&enrollment.id()).len(), 2);
        assert!(ledger.for_enrollment(&EnrollmentId::new_v4()).is_empty());
    }

    #[test]
    fn references_are_unique() {
        let ledger = PaymentLedger::new();
        let enrollment = enrollment();
        let mut references: Vec<String> = (0..500)
            .map(|_| create(&ledger, &enrollment).transaction_reference())
            .collect();
        references.sort();
        references.dedup();
        assert_eq!(references.len(), 500);
    }

    #[test]
    fn orphaned_callbacks_drain_in_order() {
        let ledger = PaymentLedger::new();
        for n in 0..3 {
            ledger.park_orphan(OrphanedCallback {
                received_at: Utc::now(),
                checkout_request_id: Some(format!("ws_CO_{n}")),
                external_reference: None,
                raw: "{}".into(),
            });
        }
        let drained = ledger.take_orphaned_callbacks();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].checkout_request_id.as_deref(), Some("ws_CO_0"));
        assert!(ledger.take_orphaned_callbacks().is_empty());
    }
}
