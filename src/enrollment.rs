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

//! Enrollment records.
//!
//! Implemented State Machine
//!
//! ```text
//!  PENDING_PAYMENT ──activate──► ACTIVE ──complete──► COMPLETED
//!                                 │  ▲
//!                         suspend │  │ resume
//!                                 ▼  │
//!                               SUSPENDED
//!
//!  ACTIVE ──(expiry passed)──► EXPIRED
//!  any ──cancel──► CANCELLED
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use course_enrollment_rs::{CourseId, Enrollment, EnrollmentStatus, StudentId};
//! use rust_decimal_macros::dec;
//!
//! let enrollment = Enrollment::new(StudentId::new_v4(), CourseId::new_v4(), dec!(0), None, Utc::now());
//! assert_eq!(enrollment.status(), EnrollmentStatus::Active);
//! ```

use crate::EnrollmentError;
use crate::base::{CourseId, EnrollmentId, PaymentId, StudentId, money};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    /// Created for a priced course, awaiting a successful payment.
    PendingPayment,
    Active,
    Completed,
    /// Temporarily inaccessible (dispute, policy violation).
    Suspended,
    Cancelled,
    /// Time-limited access period ended.
    Expired,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Suspended => "SUSPENDED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// `PENDING_PAYMENT` → `ACTIVE`. The course counter must be bumped.
    Activated,
    /// Already `ACTIVE` or `COMPLETED`; nothing changed.
    AlreadyActive,
    /// Enrollment is in a state that must never be re-activated. The payment
    /// is still recorded as the one that settled it.
    Conflict(EnrollmentStatus),
}

#[derive(Debug)]
pub(crate) struct EnrollmentData {
    pub(crate) id: EnrollmentId,
    pub(crate) student_id: StudentId,
    pub(crate) course_id: CourseId,
    /// Captured at creation, never mutated.
    price_paid: Decimal,
    pub(crate) payment_id: Option<PaymentId>,
    pub(crate) status: EnrollmentStatus,
    pub(crate) progress_percentage: u8,
    pub(crate) videos_completed: bool,
    pub(crate) quizzes_completed: bool,
    pub(crate) is_completed: bool,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) last_accessed_at: Option<DateTime<Utc>>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl EnrollmentData {
    fn new(
        student_id: StudentId,
        course_id: CourseId,
        price_paid: Decimal,
        access_period: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        let free = price_paid.is_zero();
        Self {
            id: EnrollmentId::new_v4(),
            student_id,
            course_id,
            price_paid,
            payment_id: None,
            status: if free {
                EnrollmentStatus::Active
            } else {
                EnrollmentStatus::PendingPayment
            },
            progress_percentage: 0,
            videos_completed: false,
            quizzes_completed: false,
            is_completed: false,
            completed_at: None,
            last_accessed_at: None,
            expires_at: if free {
                access_period.map(|period| now + period)
            } else {
                None
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn price_paid(&self) -> Decimal {
        self.price_paid
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.progress_percentage <= 100,
            "Invariant violated: progress above 100: {}",
            self.progress_percentage
        );
        debug_assert!(
            !self.is_completed
                || (self.progress_percentage == 100
                    && self.videos_completed
                    && self.quizzes_completed),
            "Invariant violated: completed enrollment {} without full progress",
            self.id
        );
    }

    /// Grants access after a successful payment.
    pub(crate) fn activate(
        &mut self,
        payment_id: PaymentId,
        access_period: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Activation {
        match self.status {
            EnrollmentStatus::PendingPayment => {
                self.status = EnrollmentStatus::Active;
                self.payment_id = Some(payment_id);
                self.expires_at = access_period.map(|period| now + period);
                self.updated_at = now;
                self.assert_invariants();
                Activation::Activated
            }
            EnrollmentStatus::Active | EnrollmentStatus::Completed => Activation::AlreadyActive,
            other => {
                if self.payment_id.is_none() {
                    self.payment_id = Some(payment_id);
                    self.updated_at = now;
                }
                Activation::Conflict(other)
            }
        }
    }

    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub(crate) fn is_accessible(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            EnrollmentStatus::Active | EnrollmentStatus::Completed
        ) && !self.is_expired(now)
    }

    /// Moves an `ACTIVE` enrollment whose access period has passed to `EXPIRED`.
    pub(crate) fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == EnrollmentStatus::Active && self.is_expired(now) {
            self.status = EnrollmentStatus::Expired;
            self.updated_at = now;
            return true;
        }
        false
    }

    /// Recomputes the video flag and progress from source counts.
    pub(crate) fn apply_video_counts(&mut self, completed: u64, total: u64, now: DateTime<Utc>) {
        if self.is_completed {
            return;
        }
        self.videos_completed = total > 0 && completed >= total;
        self.progress_percentage = match total {
            0 => 0,
            total => (completed.min(total) * 100 / total) as u8,
        };
        self.updated_at = now;
        self.assert_invariants();
    }

    /// Recomputes the quiz flag. Zero required quizzes is vacuously complete.
    pub(crate) fn apply_quiz_counts(&mut self, passed: u64, required: u64, now: DateTime<Utc>) {
        if self.is_completed {
            return;
        }
        self.quizzes_completed = passed >= required;
        self.updated_at = now;
    }

    /// Finalizes the course. Returns `false` when already completed.
    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<bool, EnrollmentError> {
        if self.is_completed {
            return Ok(false);
        }
        if !(self.videos_completed && self.quizzes_completed) {
            return Err(EnrollmentError::CompletionFlagsIncomplete);
        }
        if self.status != EnrollmentStatus::Active {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status,
                action: "complete",
            });
        }
        self.status = EnrollmentStatus::Completed;
        self.is_completed = true;
        self.progress_percentage = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.assert_invariants();
        Ok(true)
    }

    pub(crate) fn suspend(&mut self, now: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if self.status != EnrollmentStatus::Active {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status,
                action: "suspend",
            });
        }
        self.status = EnrollmentStatus::Suspended;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn resume(&mut self, now: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if self.status != EnrollmentStatus::Suspended {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status,
                action: "resume",
            });
        }
        self.status = EnrollmentStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), EnrollmentError> {
        if self.status == EnrollmentStatus::Cancelled {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status,
                action: "cancel",
            });
        }
        self.status = EnrollmentStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = Some(now);
    }
}

/// A student's purchase and access relationship to a course.
#[derive(Debug)]
pub struct Enrollment {
    inner: Mutex<EnrollmentData>,
}

impl Enrollment {
    /// Creates an enrollment. Zero-priced enrollments start `ACTIVE`.
    pub fn new(
        student_id: StudentId,
        course_id: CourseId,
        price_paid: Decimal,
        access_period: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Mutex::new(EnrollmentData::new(
                student_id,
                course_id,
                price_paid,
                access_period,
                now,
            )),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EnrollmentData> {
        self.inner.lock()
    }

    pub fn id(&self) -> EnrollmentId {
        self.inner.lock().id
    }

    pub fn student_id(&self) -> StudentId {
        self.inner.lock().student_id
    }

    pub fn course_id(&self) -> CourseId {
        self.inner.lock().course_id
    }

    pub fn price_paid(&self) -> Decimal {
        self.inner.lock().price_paid
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.inner.lock().payment_id
    }

    pub fn status(&self) -> EnrollmentStatus {
        self.inner.lock().status
    }

    pub fn progress_percentage(&self) -> u8 {
        self.inner.lock().progress_percentage
    }

    pub fn videos_completed(&self) -> bool {
        self.inner.lock().videos_completed
    }

    pub fn quizzes_completed(&self) -> bool {
        self.inner.lock().quizzes_completed
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().is_completed
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().completed_at
    }

    pub fn last_accessed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_accessed_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().expires_at
    }

    /// True iff `ACTIVE` or `COMPLETED` and not past expiry.
    pub fn is_accessible(&self, now: DateTime<Utc>) -> bool {
        self.inner.lock().is_accessible(now)
    }
}

impl Serialize for Enrollment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Enrollment", 14)?;
        state.serialize_field("id", &data.id)?;
        state.serialize_field("studentId", &data.student_id)?;
        state.serialize_field("courseId", &data.course_id)?;
        state.serialize_field("pricePaid", &money(data.price_paid))?;
        state.serialize_field("paymentId", &data.payment_id)?;
        state.serialize_field("status", &data.status)?;
        state.serialize_field("progressPercentage", &data.progress_percentage)?;
        state.serialize_field("videosCompleted", &data.videos_completed)?;
        state.serialize_field("quizzesCompleted", &data.quizzes_completed)?;
        state.serialize_field("isCompleted", &data.is_completed)?;
        state.serialize_field("completedAt", &data.completed_at)?;
        state.serialize_field("lastAccessedAt", &data.last_accessed_at)?;
        state.serialize_field("expiresAt", &data.expires_at)?;
        state.serialize_field("createdAt", &data.created_at)?;
        state.end()
    }
}
