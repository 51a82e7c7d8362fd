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

//! Enrollment and payment reconciliation engine.
//!
//! The [`Engine`] turns a purchase intent into an access-granting enrollment
//! and feeds content events into the progress aggregator.
//!
//! # Payment Flow
//!
//! - **Enroll**: priced courses start `PENDING_PAYMENT`, free courses start `ACTIVE`.
//! - **Initiate**: creates a payment and sends an STK push through the gateway.
//! - **Callback**: the gateway reports the outcome; success activates the enrollment.
//! - **Poll**: clients read payment status; unresolved payments past the timeout fail.
//!
//! Callbacks and polls share the payment's transition rules, so whichever
//! runs first settles the payment and the other becomes a no-op.
//!
//! # Lock Ordering
//!
//! Records are locked payment first, then enrollment. The course counter is
//! atomic and only bumped while the enrollment lock is held. No record lock is
//! held across a gateway call.

use crate::base::{CourseId, EnrollmentId, QuizId, StudentId, VideoId};
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, PaymentConfig};
use crate::enrollment::{Activation, Enrollment, EnrollmentStatus};
use crate::enrollment_store::EnrollmentStore;
use crate::gateway::{
    CallbackPayload, PaymentGateway, SimulatedGateway, StkPushRequest, normalize_phone,
};
use crate::payhero::PayHeroGateway;
use crate::payment::{
    FailureReason, Payment, PaymentResponse, PaymentStatus, PaymentStatusResponse, Settlement,
};
use crate::payment_ledger::{OrphanedCallback, PaymentLedger};
use crate::progress::{ContentLedger, ProgressAggregator, ProgressSnapshot, QuizAttempt, VideoProgress};
use crate::{EnrollmentError, GatewayError};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to a gateway callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackOutcome {
    /// Payment settled to the given status.
    Applied(PaymentStatus),
    /// Callback for this payment was already processed.
    Duplicate,
    /// Payment was already settled; nothing changed.
    AlreadySettled,
    /// No payment matches the callback's references.
    UnknownPayment,
    /// Body could not be parsed or carries no reference.
    Malformed,
}

/// Acknowledgement returned to the gateway. Always a success from the
/// gateway's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
    pub outcome: CallbackOutcome,
}

impl CallbackAck {
    pub fn message(&self) -> &'static str {
        match self.outcome {
            CallbackOutcome::Applied(_) => "Callback processed successfully",
            CallbackOutcome::Malformed => "Callback received but invalid structure",
            _ => "Callback received",
        }
    }
}

/// Result of a watch-position report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgressUpdate {
    pub video: VideoProgress,
    pub enrollment: ProgressSnapshot,
}

/// Result of a quiz submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttemptUpdate {
    pub attempt: QuizAttempt,
    pub enrollment: ProgressSnapshot,
}

pub struct Engine {
    payment_config: PaymentConfig,
    catalog: Arc<Catalog>,
    enrollments: EnrollmentStore,
    payments: PaymentLedger,
    content: Arc<ContentLedger>,
    aggregator: ProgressAggregator,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Creates an engine over `catalog` using the system clock and default
    /// payment settings.
    pub fn new(catalog: Arc<Catalog>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let content = Arc::new(ContentLedger::new());
        Engine {
            payment_config: PaymentConfig::default(),
            aggregator: ProgressAggregator::new(Arc::clone(&catalog), Arc::clone(&content)),
            catalog,
            enrollments: EnrollmentStore::new(),
            payments: PaymentLedger::new(),
            content,
            gateway,
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds an engine from configuration. Falls back to the simulated
    /// gateway when PayHero credentials are absent.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let catalog = Arc::new(Catalog::with_courses(config.courses.clone()));
        let gateway: Arc<dyn PaymentGateway> = if config.gateway.is_configured() {
            Arc::new(PayHeroGateway::new(config.gateway.clone())?)
        } else {
            warn!("PayHero credentials not configured, using simulated gateway");
            Arc::new(SimulatedGateway::new())
        };
        Ok(Self::new(catalog, gateway).with_payment_config(config.payment.clone()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_payment_config(mut self, payment_config: PaymentConfig) -> Self {
        self.payment_config = payment_config;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn content(&self) -> &Arc<ContentLedger> {
        &self.content
    }

    // === Enrollment lifecycle ===

    /// Enrolls a student, capturing the course's current price.
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::CourseNotFound`] - unknown course.
    /// - [`EnrollmentError::CourseNotPurchasable`] - course is not published.
    /// - [`EnrollmentError::AlreadyEnrolled`] - student already holds an enrollment.
    pub fn enroll(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Arc<Enrollment>, EnrollmentError> {
        let course = self
            .catalog
            .course(&course_id)
            .ok_or(EnrollmentError::CourseNotFound)?;
        if !course.published {
            return Err(EnrollmentError::CourseNotPurchasable);
        }

        let now = self.clock.now();
        let access_period = access_period(course.access_days);
        let enrollment = self.enrollments.insert_unique(student_id, course_id, || {
            Enrollment::new(student_id, course_id, course.price, access_period, now)
        })?;

        let mut data = enrollment.lock();
        if course.required_quiz_count() == 0 {
            data.apply_quiz_counts(0, 0, now);
        }
        if data.status == EnrollmentStatus::Active {
            self.catalog.increment_enrollment_count(&course_id);
        }
        info!(
            enrollment_id = %data.id,
            %student_id,
            %course_id,
            price = %data.price_paid(),
            status = %data.status,
            "Enrollment created"
        );
        drop(data);

        Ok(enrollment)
    }

    /// Looks up an enrollment, applying lazy expiry.
    pub fn enrollment(&self, id: &EnrollmentId) -> Result<Arc<Enrollment>, EnrollmentError> {
        let enrollment = self.get_enrollment(id)?;
        self.expire_if_due(&enrollment);
        Ok(enrollment)
    }

    pub fn enrollment_for(&self, student_id: &StudentId, course_id: &CourseId) -> Option<Arc<Enrollment>> {
        self.enrollments.find(student_id, course_id)
    }

    pub fn enrollments_for_student(&self, student_id: &StudentId) -> Vec<Arc<Enrollment>> {
        self.enrollments.for_student(student_id)
    }

    pub fn enrollment_count(&self, course_id: &CourseId) -> Option<u64> {
        self.catalog.enrollment_count(course_id)
    }

    /// True iff the enrollment grants access right now.
    pub fn has_access(&self, id: &EnrollmentId) -> Result<bool, EnrollmentError> {
        let enrollment = self.get_enrollment(id)?;
        self.expire_if_due(&enrollment);
        Ok(enrollment.is_accessible(self.clock.now()))
    }

    /// Opens course content, recording the access time.
    pub fn access_course(&self, id: &EnrollmentId) -> Result<Arc<Enrollment>, EnrollmentError> {
        let enrollment = self.get_enrollment(id)?;
        self.ensure_accessible(&enrollment)?;
        enrollment.lock().record_access(self.clock.now());
        Ok(enrollment)
    }

    pub fn suspend(&self, id: &EnrollmentId) -> Result<Arc<Enrollment>, EnrollmentError> {
        let enrollment = self.get_enrollment(id)?;
        self.expire_if_due(&enrollment);
        enrollment.lock().suspend(self.clock.now())?;
        info!(enrollment_id = %id, "Enrollment suspended");
        Ok(enrollment)
    }

    pub fn resume(&self, id: &EnrollmentId) -> Result<Arc<Enrollment>, EnrollmentError> {
        let enrollment = self.get_enrollment(id)?;
        enrollment.lock().resume(self.clock.now())?;
        info!(enrollment_id = %id, "Enrollment resumed");
        Ok(enrollment)
    }

    pub fn cancel(&self, id: &EnrollmentId) -> Result<Arc<Enrollment>, EnrollmentError> {
        let enrollment = self.get_enrollment(id)?;
        enrollment.lock().cancel(self.clock.now())?;
        info!(enrollment_id = %id, "Enrollment cancelled");
        Ok(enrollment)
    }

    // === Payments ===

    /// Starts a payment attempt for a `PENDING_PAYMENT` enrollment.
    ///
    /// A gateway rejection is not an error: the attempt is returned in
    /// `FAILED` with the gateway's message so the caller may retry.
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::EnrollmentNotFound`] - unknown enrollment.
    /// - [`EnrollmentError::AlreadyPaid`] - enrollment is already `ACTIVE`/`COMPLETED`.
    /// - [`EnrollmentError::NotPayable`] - enrollment is suspended, cancelled or expired.
    /// - [`EnrollmentError::InvalidPhoneNumber`] - phone is not a Kenyan MSISDN.
    pub async fn initiate_payment(
        &self,
        enrollment_id: &EnrollmentId,
        phone_number: &str,
    ) -> Result<Arc<Payment>, EnrollmentError> {
        let enrollment = self.get_enrollment(enrollment_id)?;
        let now = self.clock.now();

        let payment = {
            let mut data = enrollment.lock();
            data.expire_if_due(now);
            match data.status {
                EnrollmentStatus::PendingPayment => {}
                EnrollmentStatus::Active | EnrollmentStatus::Completed => {
                    return Err(EnrollmentError::AlreadyPaid);
                }
                _ => return Err(EnrollmentError::NotPayable),
            }
            let phone_number = normalize_phone(phone_number)?;
            self.payments.create(
                &data,
                &self.payment_config.reference_prefix,
                &self.payment_config.currency,
                &phone_number,
                now,
            )
        };

        let (reference, request) = {
            let data = payment.lock();
            (
                data.transaction_reference.clone(),
                StkPushRequest {
                    amount: data.amount(),
                    phone_number: data.phone_number.clone(),
                    reference: data.transaction_reference.clone(),
                },
            )
        };
        info!(
            %enrollment_id,
            %reference,
            amount = %request.amount,
            "Payment initiated"
        );

        let result = self.gateway.initiate(request).await;
        let now = self.clock.now();

        match result {
            Ok(acceptance) => {
                self.payments
                    .index_checkout(&acceptance.checkout_request_id, payment.id());
                let moved = payment
                    .lock()
                    .mark_gateway_accepted(acceptance.checkout_request_id.clone(), now);
                info!(
                    %reference,
                    checkout_request_id = %acceptance.checkout_request_id,
                    pending = moved,
                    "STK push accepted"
                );
            }
            Err(err) => {
                let settlement = payment.lock().mark_failed(
                    FailureReason::GatewayRejected(err.to_string()),
                    None,
                    Some(err.to_string()),
                    now,
                );
                warn!(%reference, error = %err, ?settlement, "Gateway rejected payment");
            }
        }

        Ok(payment)
    }

    /// Poll endpoint. Fails unresolved payments older than the timeout.
    pub fn payment_status(&self, reference: &str) -> Result<PaymentStatusResponse, EnrollmentError> {
        let payment = self
            .payments
            .find_by_reference(reference)
            .ok_or(EnrollmentError::PaymentNotFound)?;
        let now = self.clock.now();

        let mut data = payment.lock();
        if data.is_stale(self.payment_config.timeout(), now) {
            data.mark_failed(FailureReason::Timeout, None, None, now);
            warn!(
                %reference,
                created_at = %data.created_at,
                "Payment timed out"
            );
        }
        Ok(PaymentStatusResponse::from_data(&data))
    }

    pub fn payment_by_reference(&self, reference: &str) -> Result<Arc<Payment>, EnrollmentError> {
        self.payments
            .find_by_reference(reference)
            .ok_or(EnrollmentError::PaymentNotFound)
    }

    /// All payments, newest first.
    pub fn payments(&self) -> Vec<PaymentResponse> {
        self.payments.list().iter().map(|p| p.to_response()).collect()
    }

    pub fn payments_for_enrollment(&self, enrollment_id: &EnrollmentId) -> Vec<PaymentResponse> {
        self.payments
            .for_enrollment(enrollment_id)
            .iter()
            .map(|p| p.to_response())
            .collect()
    }

    /// Callbacks that matched no payment since the last call.
    pub fn take_orphaned_callbacks(&self) -> Vec<OrphanedCallback> {
        self.payments.take_orphaned_callbacks()
    }

    /// Applies a gateway callback. Never fails: every outcome is logged and
    /// acknowledged.
    pub fn process_callback(&self, raw: &str) -> CallbackAck {
        let outcome = self.reconcile(raw);
        debug!(?outcome, "Callback acknowledged");
        CallbackAck { outcome }
    }

    fn reconcile(&self, raw: &str) -> CallbackOutcome {
        let payload = match CallbackPayload::parse(raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Malformed payment callback");
                return CallbackOutcome::Malformed;
            }
        };
        if !payload.has_reference() {
            warn!("Payment callback without any reference");
            return CallbackOutcome::Malformed;
        }

        let Some(payment) = self.payments.resolve(
            payload.checkout_request_id.as_deref(),
            payload.external_reference.as_deref(),
        ) else {
            error!(
                checkout_request_id = ?payload.checkout_request_id,
                external_reference = ?payload.external_reference,
                "Payment not found for callback"
            );
            self.payments.park_orphan(OrphanedCallback {
                received_at: self.clock.now(),
                checkout_request_id: payload.checkout_request_id.clone(),
                external_reference: payload.external_reference.clone(),
                raw: raw.to_string(),
            });
            return CallbackOutcome::UnknownPayment;
        };

        // Resolve everything the transition needs before taking any lock.
        let enrollment = self.enrollments.get(&payment.enrollment_id());
        let access_period = enrollment
            .as_ref()
            .and_then(|e| self.catalog.course(&e.course_id()))
            .and_then(|course| access_period(course.access_days));
        let now = self.clock.now();

        let mut data = payment.lock();
        let reference = data.transaction_reference.clone();
        if !data.record_callback(raw, now) {
            info!(%reference, "Callback already processed");
            return CallbackOutcome::Duplicate;
        }

        if let Some(checkout) = &payload.checkout_request_id {
            if data.checkout_request_id.is_none() {
                data.checkout_request_id = Some(checkout.clone());
                self.payments.index_checkout(checkout, data.id);
            }
        }

        if let Some(reported) = payload.amount() {
            if reported != data.amount() {
                warn!(
                    %reference,
                    expected = %data.amount(),
                    %reported,
                    "Callback amount does not match payment"
                );
            }
        }

        if !payload.is_success() {
            let settlement = data.mark_failed(
                FailureReason::Declined,
                payload.result_code,
                payload.result_desc.clone(),
                now,
            );
            return match settlement {
                Settlement::Applied { .. } => {
                    info!(
                        %reference,
                        result_code = ?payload.result_code,
                        result_desc = ?payload.result_desc,
                        "Payment failed"
                    );
                    CallbackOutcome::Applied(PaymentStatus::Failed)
                }
                Settlement::Ignored { current } => {
                    warn!(%reference, status = %current, "Failure callback after settlement ignored");
                    CallbackOutcome::AlreadySettled
                }
            };
        }

        let Some(enrollment) = enrollment else {
            // Money moved; record it even though there is nothing to activate.
            data.mark_success(
                payload.mpesa_receipt_number.clone(),
                payload.result_code,
                payload.result_desc.clone(),
                now,
            );
            error!(%reference, enrollment_id = %data.enrollment_id, "Paid enrollment does not exist");
            return CallbackOutcome::Applied(PaymentStatus::Success);
        };

        let mut record = enrollment.lock();
        if record.payment_id.is_some_and(|paid_by| paid_by != data.id) {
            data.mark_failed(
                FailureReason::DuplicatePayment,
                payload.result_code,
                payload.result_desc.clone(),
                now,
            );
            error!(
                %reference,
                enrollment_id = %record.id,
                receipt = ?payload.mpesa_receipt_number,
                "Duplicate payment for already paid enrollment, refund required"
            );
            return CallbackOutcome::Applied(PaymentStatus::Failed);
        }

        match data.mark_success(
            payload.mpesa_receipt_number.clone(),
            payload.result_code,
            payload.result_desc.clone(),
            now,
        ) {
            Settlement::Applied { previous } => {
                if previous == PaymentStatus::Failed {
                    error!(
                        %reference,
                        failure_reason = ?data.failure_reason,
                        "Late success after payment was failed, honoring it"
                    );
                }
                info!(
                    %reference,
                    receipt = ?data.mpesa_receipt_number,
                    amount = %data.amount(),
                    "Payment succeeded"
                );
            }
            Settlement::Ignored { current } => {
                warn!(%reference, status = %current, "Success callback after settlement ignored");
                return CallbackOutcome::AlreadySettled;
            }
        }

        match record.activate(data.id, access_period, now) {
            Activation::Activated => {
                let count = self.catalog.increment_enrollment_count(&record.course_id);
                info!(
                    enrollment_id = %record.id,
                    course_id = %record.course_id,
                    enrollment_count = ?count,
                    "Enrollment activated"
                );
            }
            Activation::AlreadyActive => {
                debug!(enrollment_id = %record.id, "Enrollment already active");
            }
            Activation::Conflict(status) => {
                warn!(
                    enrollment_id = %record.id,
                    %status,
                    %reference,
                    "Payment succeeded for enrollment that cannot be activated"
                );
            }
        }

        CallbackOutcome::Applied(PaymentStatus::Success)
    }

    /// Refunds a successful payment and cancels its enrollment.
    pub fn refund_payment(&self, reference: &str) -> Result<PaymentResponse, EnrollmentError> {
        let payment = self.payment_by_reference(reference)?;
        let enrollment = self.enrollments.get(&payment.enrollment_id());
        let now = self.clock.now();

        let mut data = payment.lock();
        data.mark_refunded(now)?;
        if let Some(enrollment) = enrollment {
            let mut record = enrollment.lock();
            if record.payment_id == Some(data.id) && record.status != EnrollmentStatus::Cancelled {
                record.cancel(now)?;
            }
        }
        info!(%reference, amount = %data.amount(), "Payment refunded");
        Ok(PaymentResponse::from_data(&data))
    }

    // === Progress ===

    /// Records a watch position and recomputes enrollment progress.
    pub fn record_video_progress(
        &self,
        enrollment_id: &EnrollmentId,
        video_id: &VideoId,
        position_seconds: u32,
    ) -> Result<VideoProgressUpdate, EnrollmentError> {
        let enrollment = self.get_enrollment(enrollment_id)?;
        let (course_id, video) = self
            .catalog
            .video(video_id)
            .ok_or(EnrollmentError::VideoNotFound)?;
        if course_id != enrollment.course_id() {
            return Err(EnrollmentError::VideoNotFound);
        }
        self.ensure_accessible(&enrollment)?;

        let now = self.clock.now();
        let (progress, newly_completed) =
            self.content
                .record_video(*enrollment_id, &video, position_seconds, now);
        if newly_completed {
            info!(%enrollment_id, %video_id, "Video completed");
        }
        let snapshot = self.aggregator.on_video_progress_update(&enrollment, now)?;
        Ok(VideoProgressUpdate {
            video: progress,
            enrollment: snapshot,
        })
    }

    /// Records a quiz attempt and recomputes completion when it passes.
    pub fn record_quiz_attempt(
        &self,
        enrollment_id: &EnrollmentId,
        quiz_id: &QuizId,
        score: u32,
    ) -> Result<QuizAttemptUpdate, EnrollmentError> {
        let score = u8::try_from(score)
            .ok()
            .filter(|score| *score <= 100)
            .ok_or(EnrollmentError::InvalidScore)?;
        let enrollment = self.get_enrollment(enrollment_id)?;
        let (course_id, quiz) = self
            .catalog
            .quiz(quiz_id)
            .ok_or(EnrollmentError::QuizNotFound)?;
        if course_id != enrollment.course_id() {
            return Err(EnrollmentError::QuizNotFound);
        }
        self.ensure_accessible(&enrollment)?;

        let now = self.clock.now();
        let attempt = self
            .content
            .record_quiz_attempt(*enrollment_id, &quiz, score, now)?;
        info!(
            %enrollment_id,
            %quiz_id,
            attempt = attempt.attempt_number,
            score,
            passed = attempt.passed,
            "Quiz attempt recorded"
        );
        let snapshot = self.aggregator.on_quiz_passed(&enrollment, now)?;
        Ok(QuizAttemptUpdate {
            attempt,
            enrollment: snapshot,
        })
    }

    /// Trigger from the video subsystem.
    pub fn video_progress_changed(
        &self,
        student_id: &StudentId,
        course_id: &CourseId,
    ) -> Result<ProgressSnapshot, EnrollmentError> {
        let enrollment = self
            .enrollments
            .find(student_id, course_id)
            .ok_or(EnrollmentError::EnrollmentNotFound)?;
        self.aggregator
            .on_video_progress_update(&enrollment, self.clock.now())
    }

    /// Trigger from the quiz subsystem.
    pub fn quiz_passed(
        &self,
        student_id: &StudentId,
        course_id: &CourseId,
    ) -> Result<ProgressSnapshot, EnrollmentError> {
        let enrollment = self
            .enrollments
            .find(student_id, course_id)
            .ok_or(EnrollmentError::EnrollmentNotFound)?;
        self.aggregator.on_quiz_passed(&enrollment, self.clock.now())
    }

    fn get_enrollment(&self, id: &EnrollmentId) -> Result<Arc<Enrollment>, EnrollmentError> {
        self.enrollments
            .get(id)
            .ok_or(EnrollmentError::EnrollmentNotFound)
    }

    fn expire_if_due(&self, enrollment: &Enrollment) {
        let mut data = enrollment.lock();
        if data.expire_if_due(self.clock.now()) {
            info!(enrollment_id = %data.id, expires_at = ?data.expires_at, "Enrollment expired");
        }
    }

    fn ensure_accessible(&self, enrollment: &Enrollment) -> Result<(), EnrollmentError> {
        self.expire_if_due(enrollment);
        if enrollment.is_accessible(self.clock.now()) {
            Ok(())
        } else {
            Err(EnrollmentError::NotAccessible)
        }
    }
}

fn access_period(access_days: Option<u32>) -> Option<Duration> {
    access_days.map(|days| Duration::days(i64::from(days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Course, Video};
    use rust_decimal_macros::dec;

    fn engine_with(course: Course) -> Engine {
        Engine::new(
            Arc::new(Catalog::with_courses([course])),
            Arc::new(SimulatedGateway::new()),
        )
    }

    fn priced_course() -> Course {
        Course {
            id: CourseId::new_v4(),
            title: "Paid".into(),
            price: dec!(2999),
            published: true,
            access_days: None,
            videos: vec![Video {
                id: VideoId::new_v4(),
                duration_seconds: 60,
            }],
            quizzes: vec![],
        }
    }

    #[test]
    fn malformed_callbacks_are_acknowledged() {
        let engine = engine_with(priced_course());
        assert_eq!(
            engine.process_callback("<xml/>").outcome,
            CallbackOutcome::Malformed
        );
        assert_eq!(engine.process_callback("{}").outcome, CallbackOutcome::Malformed);
        assert_eq!(
            engine.process_callback("{}").message(),
            "Callback received but invalid structure"
        );
    }

    #[test]
    fn unknown_callbacks_are_parked() {
        let engine = engine_with(priced_course());
        let ack = engine.process_callback(r#"{"CheckoutRequestID": "ws_CO_x", "ResultCode": 0}"#);
        assert_eq!(ack.outcome, CallbackOutcome::UnknownPayment);
        let orphans = engine.take_orphaned_callbacks();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].checkout_request_id.as_deref(), Some("ws_CO_x"));
    }

    #[test]
    fn free_enrollment_counts_immediately() {
        let mut course = priced_course();
        course.price = dec!(0);
        let id = course.id;
        let engine = engine_with(course);
        let enrollment = engine.enroll(StudentId::new_v4(), id).unwrap();
        assert_eq!(enrollment.status(), EnrollmentStatus::Active);
        assert!(enrollment.quizzes_completed());
        assert_eq!(engine.enrollment_count(&id), Some(1));
    }

    #[test]
    fn quiz_score_is_validated_before_lookup() {
        let engine = engine_with(priced_course());
        assert_eq!(
            engine
                .record_quiz_attempt(&EnrollmentId::new_v4(), &QuizId::new_v4(), 101)
                .unwrap_err(),
            EnrollmentError::InvalidScore
        );
    }

    #[test]
    fn access_period_in_days() {
        assert_eq!(access_period(Some(30)), Some(Duration::days(30)));
        assert_eq!(access_period(None), None);
    }
}
