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

//! Error types for enrollment and payment processing.

use crate::enrollment::EnrollmentStatus;
use thiserror::Error;

/// Enrollment lifecycle and payment reconciliation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentError {
    /// Referenced course does not exist in the catalog
    #[error("course not found")]
    CourseNotFound,

    /// Referenced enrollment does not exist
    #[error("enrollment not found")]
    EnrollmentNotFound,

    /// No payment matches the given reference
    #[error("payment not found")]
    PaymentNotFound,

    #[error("video not found")]
    VideoNotFound,

    #[error("quiz not found")]
    QuizNotFound,

    /// Student already holds an enrollment for this course
    #[error("already enrolled in this course")]
    AlreadyEnrolled,

    /// Course is not published
    #[error("course is not available for enrollment")]
    CourseNotPurchasable,

    /// Enrollment already has a successful payment
    #[error("payment already completed for this enrollment")]
    AlreadyPaid,

    /// Enrollment is not awaiting payment (cancelled, expired or suspended)
    #[error("enrollment is not awaiting payment")]
    NotPayable,

    #[error("invalid phone number")]
    InvalidPhoneNumber,

    /// State machine rejected the requested action
    #[error("cannot {action} an enrollment in status {from}")]
    InvalidTransition {
        from: EnrollmentStatus,
        action: &'static str,
    },

    /// Completion requested before both completion flags were set
    #[error("videos and quizzes must both be completed")]
    CompletionFlagsIncomplete,

    /// Enrollment does not grant access to course content
    #[error("course content is not accessible")]
    NotAccessible,

    #[error("maximum number of quiz attempts reached")]
    AttemptLimitReached,

    /// Quiz score outside 0..=100
    #[error("quiz score must be between 0 and 100")]
    InvalidScore,

    /// Only successful payments can be refunded
    #[error("only successful payments can be refunded")]
    NotRefundable,
}

/// Errors raised by a payment gateway adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Gateway answered but declined the request
    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("invalid gateway credentials")]
    Unauthorized,

    /// Request never completed (connection, timeout, TLS)
    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("gateway credentials not configured")]
    NotConfigured,
}
