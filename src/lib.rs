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

//! # Course Enrollment
//!
//! This library provides the enrollment lifecycle and payment reconciliation
//! core of a course-sales platform: it turns a purchase intent into an
//! access-granting enrollment via an asynchronous mobile-money gateway, and
//! aggregates video and quiz progress into a single completion decision.
//!
//! ## Core Components
//!
//! - [`Engine`]: Orchestrates enrollment, payment initiation, callbacks, polling and progress
//! - [`Enrollment`]: A student's enrollment with its state machine and completion flags
//! - [`Payment`]: A payment attempt with its state machine
//! - [`PaymentGateway`]: Contract for the mobile-money provider ([`PayHeroGateway`], [`SimulatedGateway`])
//! - [`EnrollmentError`]: Error types for enrollment and payment failures
//!
//! ## Example
//!
//! ```
//! use course_enrollment_rs::{Catalog, Course, CourseId, Engine, EnrollmentStatus, SimulatedGateway, StudentId};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let course = Course {
//!     id: CourseId::new_v4(),
//!     title: "Intro to Payments".into(),
//!     price: dec!(2999.00),
//!     published: true,
//!     access_days: None,
//!     videos: vec![],
//!     quizzes: vec![],
//! };
//! let engine = Engine::new(
//!     Arc::new(Catalog::with_courses([course.clone()])),
//!     Arc::new(SimulatedGateway::new()),
//! );
//!
//! let enrollment = engine.enroll(StudentId::new_v4(), course.id).unwrap();
//! assert_eq!(enrollment.status(), EnrollmentStatus::PendingPayment);
//!
//! let payment = engine.initiate_payment(&enrollment.id(), "0712345678").await.unwrap();
//! let callback = format!(
//!     r#"{{"status": true, "response": {{"ExternalReference": "{}", "ResultCode": 0, "MpesaReceiptNumber": "RBJ3K9X7M2"}}}}"#,
//!     payment.transaction_reference()
//! );
//! engine.process_callback(&callback);
//!
//! assert_eq!(enrollment.status(), EnrollmentStatus::Active);
//! assert_eq!(engine.enrollment_count(&course.id), Some(1));
//! # });
//! ```
//!
//! ## Thread Safety
//!
//! Stores are [`dashmap::DashMap`]s of individually locked records, so
//! callbacks, polls and progress events for different enrollments run in
//! parallel while those for the same record serialize.

mod base;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod enrollment;
mod enrollment_store;
pub mod error;
pub mod gateway;
pub mod http;
pub mod payhero;
pub mod payment;
mod payment_ledger;
pub mod progress;

pub use base::{CourseId, EnrollmentId, PaymentId, QuizId, StudentId, VideoId, money};
pub use catalog::{Catalog, Course, Quiz, Video};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use engine::{CallbackAck, CallbackOutcome, Engine, QuizAttemptUpdate, VideoProgressUpdate};
pub use enrollment::{Activation, Enrollment, EnrollmentStatus};
pub use enrollment_store::EnrollmentStore;
pub use error::{EnrollmentError, GatewayError};
pub use gateway::{
    CallbackPayload, GatewayAcceptance, PaymentGateway, SimulatedGateway, StkPushRequest,
    normalize_phone,
};
pub use payhero::PayHeroGateway;
pub use payment::{
    FailureReason, Payment, PaymentResponse, PaymentStatus, PaymentStatusResponse, Settlement,
};
pub use payment_ledger::{OrphanedCallback, PaymentLedger};
pub use progress::{
    ContentLedger, ProgressAggregator, ProgressSnapshot, QuizAttempt, VideoProgress,
};
