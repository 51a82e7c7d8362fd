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

//! Payment attempts.
//!
//! Payments follow a state machine:
//! - [`Initiated`] → [`Pending`] (gateway accepted the STK push)
//! - [`Initiated`] / [`Pending`] → [`Success`] or [`Failed`] (callback, or timeout on read)
//! - [`Failed`] → [`Success`] (late success: money moved after we gave up)
//! - [`Success`] → [`Refunded`] (administrative)
//!
//! Nothing ever moves a payment out of [`Success`] except a refund.
//!
//! [`Initiated`]: PaymentStatus::Initiated
//! [`Pending`]: PaymentStatus::Pending
//! [`Success`]: PaymentStatus::Success
//! [`Failed`]: PaymentStatus::Failed
//! [`Refunded`]: PaymentStatus::Refunded

use crate::EnrollmentError;
use crate::base::{CourseId, EnrollmentId, PaymentId, StudentId, money};
use crate::enrollment::EnrollmentData;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Record created, STK push not yet accepted by the gateway.
    Initiated,
    /// STK push sent to the phone, awaiting confirmation.
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// `Initiated` and `Pending` are the only states a client should keep polling on.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Initiated | Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable reason a payment failed.
///
/// Raw gateway diagnostics (result code and description) are stored
/// separately and only kept for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No confirmation arrived within the configured timeout.
    Timeout,
    /// The payer cancelled or the mobile-money provider declined.
    Declined,
    /// The gateway refused the initiation request.
    GatewayRejected(String),
    /// Enrollment was already paid by another payment.
    DuplicatePayment,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Declined => f.write_str("payment was cancelled or declined"),
            Self::GatewayRejected(message) => write!(f, "payment initiation failed: {message}"),
            Self::DuplicatePayment => f.write_str("duplicate payment"),
        }
    }
}

/// Outcome of a settlement attempt (`mark_success` / `mark_failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied { previous: PaymentStatus },
    Ignored { current: PaymentStatus },
}

impl Settlement {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug)]
pub(crate) struct PaymentData {
    pub(crate) id: PaymentId,
    pub(crate) enrollment_id: EnrollmentId,
    pub(crate) student_id: StudentId,
    pub(crate) course_id: CourseId,
    pub(crate) transaction_reference: String,
    pub(crate) checkout_request_id: Option<String>,
    /// Copied from the enrollment at creation, never mutated.
    amount: Decimal,
    pub(crate) currency: String,
    pub(crate) phone_number: String,
    pub(crate) status: PaymentStatus,
    pub(crate) mpesa_receipt_number: Option<String>,
    pub(crate) result_code: Option<i64>,
    pub(crate) result_desc: Option<String>,
    pub(crate) failure_reason: Option<FailureReason>,
    pub(crate) callback_received: bool,
    pub(crate) callback_data: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl PaymentData {
    fn for_enrollment(
        enrollment: &EnrollmentData,
        transaction_reference: String,
        currency: String,
        phone_number: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new_v4(),
            enrollment_id: enrollment.id,
            student_id: enrollment.student_id,
            course_id: enrollment.course_id,
            transaction_reference,
            checkout_request_id: None,
            amount: enrollment.price_paid(),
            currency,
            phone_number,
            status: PaymentStatus::Initiated,
            mpesa_receipt_number: None,
            result_code: None,
            result_desc: None,
            failure_reason: None,
            callback_received: false,
            callback_data: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub(crate) fn amount(&self) -> Decimal {
        self.amount
    }

    /// Records the gateway checkout reference; `Initiated` → `Pending`.
    ///
    /// A callback can beat the acceptance response, so a settled payment keeps
    /// its status and only learns its checkout reference.
    pub(crate) fn mark_gateway_accepted(&mut self, checkout_request_id: String, now: DateTime<Utc>) -> bool {
        if self.checkout_request_id.is_none() {
            self.checkout_request_id = Some(checkout_request_id);
        }
        self.updated_at = now;
        if self.status == PaymentStatus::Initiated {
            self.status = PaymentStatus::Pending;
            return true;
        }
        false
    }

    pub(crate) fn mark_success(
        &mut self,
        receipt: Option<String>,
        result_code: Option<i64>,
        result_desc: Option<String>,
        now: DateTime<Utc>,
    ) -> Settlement {
        match self.status {
            PaymentStatus::Success | PaymentStatus::Refunded => Settlement::Ignored {
                current: self.status,
            },
            previous => {
                self.status = PaymentStatus::Success;
                self.mpesa_receipt_number = receipt;
                self.result_code = result_code;
                self.result_desc = result_desc;
                self.failure_reason = None;
                self.completed_at = Some(now);
                self.updated_at = now;
                Settlement::Applied { previous }
            }
        }
    }

    /// Never overwrites a confirmed success.
    pub(crate) fn mark_failed(
        &mut self,
        reason: FailureReason,
        result_code: Option<i64>,
        result_desc: Option<String>,
        now: DateTime<Utc>,
    ) -> Settlement {
        match self.status {
            PaymentStatus::Success | PaymentStatus::Refunded => Settlement::Ignored {
                current: self.status,
            },
            previous => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(reason);
                if result_code.is_some() {
                    self.result_code = result_code;
                }
                if result_desc.is_some() {
                    self.result_desc = result_desc;
                }
                self.completed_at = Some(now);
                self.updated_at = now;
                Settlement::Applied { previous }
            }
        }
    }

    pub(crate) fn mark_refunded(&mut self, now: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if self.status != PaymentStatus::Success {
            return Err(EnrollmentError::NotRefundable);
        }
        self.status = PaymentStatus::Refunded;
        self.updated_at = now;
        Ok(())
    }

    /// Flags the payment as having received its callback.
    ///
    /// Returns `false` for every delivery after the first.
    pub(crate) fn record_callback(&mut self, raw: &str, now: DateTime<Utc>) -> bool {
        if self.callback_received {
            return false;
        }
        self.callback_received = true;
        self.callback_data = Some(raw.to_string());
        self.updated_at = now;
        true
    }

    pub(crate) fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.status.is_unresolved() && now - self.created_at > timeout
    }
}

/// One payment attempt for an enrollment.
#[derive(Debug)]
pub struct Payment {
    inner: Mutex<PaymentData>,
}

impl Payment {
    pub(crate) fn for_enrollment(
        enrollment: &EnrollmentData,
        transaction_reference: String,
        currency: String,
        phone_number: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Mutex::new(PaymentData::for_enrollment(
                enrollment,
                transaction_reference,
                currency,
                phone_number,
                now,
            )),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PaymentData> {
        self.inner.lock()
    }

    pub fn id(&self) -> PaymentId {
        self.inner.lock().id
    }

    pub fn enrollment_id(&self) -> EnrollmentId {
        self.inner.lock().enrollment_id
    }

    pub fn transaction_reference(&self) -> String {
        self.inner.lock().transaction_reference.clone()
    }

    pub fn checkout_request_id(&self) -> Option<String> {
        self.inner.lock().checkout_request_id.clone()
    }

    pub fn amount(&self) -> Decimal {
        self.inner.lock().amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.lock().status
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.inner.lock().failure_reason.clone()
    }

    pub fn callback_received(&self) -> bool {
        self.inner.lock().callback_received
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.lock().created_at
    }

    /// Consistent snapshot for API responses.
    pub fn to_response(&self) -> PaymentResponse {
        PaymentResponse::from_data(&self.inner.lock())
    }
}

/// Externally visible view of a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub enrollment_id: EnrollmentId,
    pub transaction_reference: String,
    pub checkout_request_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub phone_number: String,
    pub payment_status: PaymentStatus,
    pub mpesa_receipt_number: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentResponse {
    pub(crate) fn from_data(data: &PaymentData) -> Self {
        Self {
            id: data.id,
            enrollment_id: data.enrollment_id,
            transaction_reference: data.transaction_reference.clone(),
            checkout_request_id: data.checkout_request_id.clone(),
            amount: money(data.amount),
            currency: data.currency.clone(),
            phone_number: data.phone_number.clone(),
            payment_status: data.status,
            mpesa_receipt_number: data.mpesa_receipt_number.clone(),
            failure_reason: data.failure_reason.as_ref().map(ToString::to_string),
            created_at: data.created_at,
            updated_at: data.updated_at,
            completed_at: data.completed_at,
        }
    }
}

/// Poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub payment_status: PaymentStatus,
    pub transaction_reference: String,
    pub mpesa_receipt_number: Option<String>,
    pub failure_reason: Option<String>,
    pub should_continue_polling: bool,
}

impl PaymentStatusResponse {
    pub(crate) fn from_data(data: &PaymentData) -> Self {
        Self {
            payment_status: data.status,
            transaction_reference: data.transaction_reference.clone(),
            mpesa_receipt_number: data.mpesa_receipt_number.clone(),
            failure_reason: data.failure_reason.as_ref().map(ToString::to_string),
            should_continue_polling: data.status.is_unresolved(),
        }
    }
}
