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

//! REST API.
//!
//! ## Endpoints
//!
//! - `GET  /health`
//! - `POST /api/v1/enrollments` - Enroll a student in a course
//! - `GET  /api/v1/enrollments/{id}` - Get an enrollment
//! - `POST /api/v1/enrollments/{id}/access` - Open course content
//! - `POST /api/v1/enrollments/{id}/suspend`, `/resume`, `/cancel`
//! - `POST /api/v1/payments` - Initiate an STK push
//! - `GET  /api/v1/payments` - List all payments (newest first)
//! - `GET  /api/v1/payments/status/{reference}` - Poll a payment
//! - `POST /api/v1/payments/callback` - Gateway webhook, always `200 OK`
//! - `POST /api/v1/payments/{reference}/refund`
//! - `POST /api/v1/progress/videos` - Report a watch position
//! - `POST /api/v1/progress/quizzes` - Submit a quiz score
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/payments \
//!   -H "Content-Type: application/json" \
//!   -d '{"enrollmentId": "…", "phoneNumber": "0712345678"}'
//!
//! curl http://localhost:8080/api/v1/payments/status/MWZ-AB12CD34
//! ```

use crate::EnrollmentError;
use crate::base::{CourseId, EnrollmentId, QuizId, StudentId, VideoId};
use crate::engine::{Engine, QuizAttemptUpdate, VideoProgressUpdate};
use crate::enrollment::Enrollment;
use crate::payment::{PaymentResponse, PaymentStatus, PaymentStatusResponse};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub student_id: StudentId,
    pub course_id: CourseId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub enrollment_id: EnrollmentId,
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgressRequest {
    pub enrollment_id: EnrollmentId,
    pub video_id: VideoId,
    pub position_seconds: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttemptRequest {
    pub enrollment_id: EnrollmentId,
    pub quiz_id: QuizId,
    pub score: u32,
}

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `EnrollmentError` into HTTP responses.
pub struct AppError(EnrollmentError);

impl From<EnrollmentError> for AppError {
    fn from(err: EnrollmentError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EnrollmentError::CourseNotFound => (StatusCode::NOT_FOUND, "COURSE_NOT_FOUND"),
            EnrollmentError::EnrollmentNotFound => {
                (StatusCode::NOT_FOUND, "ENROLLMENT_NOT_FOUND")
            }
            EnrollmentError::PaymentNotFound => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
            EnrollmentError::VideoNotFound => (StatusCode::NOT_FOUND, "VIDEO_NOT_FOUND"),
            EnrollmentError::QuizNotFound => (StatusCode::NOT_FOUND, "QUIZ_NOT_FOUND"),
            EnrollmentError::AlreadyEnrolled => (StatusCode::CONFLICT, "ALREADY_ENROLLED"),
            EnrollmentError::CourseNotPurchasable => {
                (StatusCode::UNPROCESSABLE_ENTITY, "COURSE_NOT_PURCHASABLE")
            }
            EnrollmentError::AlreadyPaid => (StatusCode::CONFLICT, "ALREADY_PAID"),
            EnrollmentError::NotPayable => (StatusCode::CONFLICT, "NOT_PAYABLE"),
            EnrollmentError::InvalidPhoneNumber => {
                (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER")
            }
            EnrollmentError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            EnrollmentError::CompletionFlagsIncomplete => {
                (StatusCode::CONFLICT, "COMPLETION_FLAGS_INCOMPLETE")
            }
            EnrollmentError::NotAccessible => (StatusCode::FORBIDDEN, "NOT_ACCESSIBLE"),
            EnrollmentError::AttemptLimitReached => {
                (StatusCode::UNPROCESSABLE_ENTITY, "ATTEMPT_LIMIT_REACHED")
            }
            EnrollmentError::InvalidScore => (StatusCode::BAD_REQUEST, "INVALID_SCORE"),
            EnrollmentError::NotRefundable => (StatusCode::CONFLICT, "NOT_REFUNDABLE"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP" }))
}

/// POST /api/v1/enrollments
async fn create_enrollment(
    State(state): State<AppState>,
    Json(request): Json<EnrollmentRequest>,
) -> Result<(StatusCode, Json<Arc<Enrollment>>), AppError> {
    let enrollment = state
        .engine
        .enroll(request.student_id, request.course_id)?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// GET /api/v1/enrollments/{id}
async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
) -> Result<Json<Arc<Enrollment>>, AppError> {
    Ok(Json(state.engine.enrollment(&id)?))
}

async fn access_enrollment(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
) -> Result<Json<Arc<Enrollment>>, AppError> {
    Ok(Json(state.engine.access_course(&id)?))
}

async fn suspend_enrollment(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
) -> Result<Json<Arc<Enrollment>>, AppError> {
    Ok(Json(state.engine.suspend(&id)?))
}

async fn resume_enrollment(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
) -> Result<Json<Arc<Enrollment>>, AppError> {
    Ok(Json(state.engine.resume(&id)?))
}

async fn cancel_enrollment(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
) -> Result<Json<Arc<Enrollment>>, AppError> {
    Ok(Json(state.engine.cancel(&id)?))
}

/// POST /api/v1/payments
///
/// `201` when the gateway accepted the push, `502` with the failed attempt
/// when it did not.
async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    let payment = state
        .engine
        .initiate_payment(&request.enrollment_id, &request.phone_number)
        .await?;
    let response = payment.to_response();
    let status = if response.payment_status == PaymentStatus::Failed {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

/// GET /api/v1/payments
async fn list_payments(State(state): State<AppState>) -> Json<Vec<PaymentResponse>> {
    Json(state.engine.payments())
}

/// GET /api/v1/payments/status/{reference}
async fn payment_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    Ok(Json(state.engine.payment_status(&reference)?))
}

/// POST /api/v1/payments/callback
///
/// Takes raw bytes so that no body, not even invalid UTF-8, is rejected
/// before the engine acknowledges it.
async fn payment_callback(State(state): State<AppState>, body: Bytes) -> (StatusCode, &'static str) {
    info!(bytes = body.len(), "Received payment callback");
    let ack = state.engine.process_callback(&String::from_utf8_lossy(&body));
    (StatusCode::OK, ack.message())
}

async fn refund_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<PaymentResponse>, AppError> {
    Ok(Json(state.engine.refund_payment(&reference)?))
}

/// POST /api/v1/progress/videos
async fn video_progress(
    State(state): State<AppState>,
    Json(request): Json<VideoProgressRequest>,
) -> Result<Json<VideoProgressUpdate>, AppError> {
    Ok(Json(state.engine.record_video_progress(
        &request.enrollment_id,
        &request.video_id,
        request.position_seconds,
    )?))
}

/// POST /api/v1/progress/quizzes
async fn quiz_attempt(
    State(state): State<AppState>,
    Json(request): Json<QuizAttemptRequest>,
) -> Result<(StatusCode, Json<QuizAttemptUpdate>), AppError> {
    let update =
        state
            .engine
            .record_quiz_attempt(&request.enrollment_id, &request.quiz_id, request.score)?;
    Ok((StatusCode::CREATED, Json(update)))
}

// === Router ===

pub fn router(engine: Arc<Engine>) -> Router {
    let api = Router::new()
        .route("/enrollments", post(create_enrollment))
        .route("/enrollments/{id}", get(get_enrollment))
        .route("/enrollments/{id}/access", post(access_enrollment))
        .route("/enrollments/{id}/suspend", post(suspend_enrollment))
        .route("/enrollments/{id}/resume", post(resume_enrollment))
        .route("/enrollments/{id}/cancel", post(cancel_enrollment))
        .route("/payments", post(initiate_payment).get(list_payments))
        .route("/payments/status/{reference}", get(payment_status))
        .route("/payments/callback", post(payment_callback))
        .route("/payments/{reference}/refund", post(refund_payment))
        .route("/progress/videos", post(video_progress))
        .route("/progress/quizzes", post(quiz_attempt));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(AppState { engine })
}
