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

//! Content progress and course completion.
//!
//! [`ContentLedger`] is the durable record of what a student has watched and
//! which quizzes they attempted. [`ProgressAggregator`] turns those records
//! into the two enrollment completion flags and finalizes the enrollment once
//! both hold.
//!
//! Flags are always recomputed from the ledger while the enrollment lock is
//! held, never incremented, so concurrent and out-of-order events converge.

use crate::EnrollmentError;
use crate::base::{EnrollmentId, QuizId, VideoId};
use crate::catalog::{Catalog, Course, Quiz, Video};
use crate::enrollment::{Enrollment, EnrollmentData, EnrollmentStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Share of a video (in percent) that must be watched to count as completed.
pub const VIDEO_COMPLETION_THRESHOLD: u64 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgress {
    pub video_id: VideoId,
    /// Furthest position reached, in seconds.
    pub watched_seconds: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl VideoProgress {
    fn new(video_id: VideoId, now: DateTime<Utc>) -> Self {
        Self {
            video_id,
            watched_seconds: 0,
            completed: false,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Advances the watch position. Completion is sticky.
    fn advance(&mut self, video: &Video, position_seconds: u32, now: DateTime<Utc>) -> bool {
        self.watched_seconds = self.watched_seconds.max(position_seconds);
        self.updated_at = now;
        if self.completed {
            return false;
        }
        let watched = u64::from(self.watched_seconds) * 100;
        let needed = u64::from(video.duration_seconds) * VIDEO_COMPLETION_THRESHOLD;
        if watched >= needed {
            self.completed = true;
            self.completed_at = Some(now);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub quiz_id: QuizId,
    /// 1-based.
    pub attempt_number: u32,
    pub score: u8,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Durable per-enrollment content records.
#[derive(Debug, Default)]
pub struct ContentLedger {
    videos: DashMap<(EnrollmentId, VideoId), VideoProgress>,
    quizzes: DashMap<(EnrollmentId, QuizId), Vec<QuizAttempt>>,
}

impl ContentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a watch position. Returns the updated record and whether this
    /// report completed the video.
    pub fn record_video(
        &self,
        enrollment_id: EnrollmentId,
        video: &Video,
        position_seconds: u32,
        now: DateTime<Utc>,
    ) -> (VideoProgress, bool) {
        let mut entry = self
            .videos
            .entry((enrollment_id, video.id))
            .or_insert_with(|| VideoProgress::new(video.id, now));
        let newly_completed = entry.advance(video, position_seconds, now);
        (entry.value().clone(), newly_completed)
    }

    /// Records a numbered quiz attempt.
    ///
    /// # Errors
    ///
    /// - [`EnrollmentError::InvalidScore`] - score above 100.
    /// - [`EnrollmentError::AttemptLimitReached`] - the quiz's attempt cap is used up.
    pub fn record_quiz_attempt(
        &self,
        enrollment_id: EnrollmentId,
        quiz: &Quiz,
        score: u8,
        now: DateTime<Utc>,
    ) -> Result<QuizAttempt, EnrollmentError> {
        if score > 100 {
            return Err(EnrollmentError::InvalidScore);
        }
        let mut attempts = self.quizzes.entry((enrollment_id, quiz.id)).or_default();
        let taken = attempts.len() as u32;
        if quiz.max_attempts.is_some_and(|max| taken >= max) {
            return Err(EnrollmentError::AttemptLimitReached);
        }
        let attempt = QuizAttempt {
            quiz_id: quiz.id,
            attempt_number: taken + 1,
            score,
            passed: score >= quiz.passing_score,
            submitted_at: now,
        };
        attempts.push(attempt.clone());
        Ok(attempt)
    }

    pub fn video_progress(&self, enrollment_id: EnrollmentId, video_id: VideoId) -> Option<VideoProgress> {
        self.videos
            .get(&(enrollment_id, video_id))
            .map(|e| e.value().clone())
    }

    pub fn quiz_attempts(&self, enrollment_id: EnrollmentId, quiz_id: QuizId) -> Vec<QuizAttempt> {
        self.quizzes
            .get(&(enrollment_id, quiz_id))
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Course videos this enrollment has completed.
    pub fn completed_videos(&self, enrollment_id: EnrollmentId, course: &Course) -> u64 {
        course
            .videos
            .iter()
            .filter(|video| {
                self.videos
                    .get(&(enrollment_id, video.id))
                    .is_some_and(|progress| progress.completed)
            })
            .count() as u64
    }

    /// Required course quizzes with at least one passing attempt.
    pub fn passed_required_quizzes(&self, enrollment_id: EnrollmentId, course: &Course) -> u64 {
        course
            .quizzes
            .iter()
            .filter(|quiz| quiz.required)
            .filter(|quiz| {
                self.quizzes
                    .get(&(enrollment_id, quiz.id))
                    .is_some_and(|attempts| attempts.iter().any(|a| a.passed))
            })
            .count() as u64
    }
}

/// Enrollment progress after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub progress_percentage: u8,
    pub videos_completed: bool,
    pub quizzes_completed: bool,
    pub is_completed: bool,
    pub status: EnrollmentStatus,
    /// This update finalized the course.
    pub newly_completed: bool,
}

impl ProgressSnapshot {
    fn of(data: &EnrollmentData, newly_completed: bool) -> Self {
        Self {
            progress_percentage: data.progress_percentage,
            videos_completed: data.videos_completed,
            quizzes_completed: data.quizzes_completed,
            is_completed: data.is_completed,
            status: data.status,
            newly_completed,
        }
    }
}

/// Recomputes completion flags from the content ledger.
pub struct ProgressAggregator {
    catalog: Arc<Catalog>,
    content: Arc<ContentLedger>,
}

impl ProgressAggregator {
    pub fn new(catalog: Arc<Catalog>, content: Arc<ContentLedger>) -> Self {
        Self { catalog, content }
    }

    /// Recomputes `videosCompleted` and progress, then tries to finalize.
    pub fn on_video_progress_update(
        &self,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
    ) -> Result<ProgressSnapshot, EnrollmentError> {
        let course = self.course_of(enrollment)?;
        let mut data = enrollment.lock();
        let completed = self.content.completed_videos(data.id, &course);
        data.apply_video_counts(completed, course.videos.len() as u64, now);
        debug!(
            enrollment_id = %data.id,
            completed,
            total = course.videos.len(),
            progress = data.progress_percentage,
            "Video progress recomputed"
        );
        Ok(self.finalize(&mut data, &course, now))
    }

    /// Recomputes `quizzesCompleted`, then tries to finalize.
    pub fn on_quiz_passed(
        &self,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
    ) -> Result<ProgressSnapshot, EnrollmentError> {
        let course = self.course_of(enrollment)?;
        let mut data = enrollment.lock();
        let passed = self.content.passed_required_quizzes(data.id, &course);
        data.apply_quiz_counts(passed, course.required_quiz_count(), now);
        debug!(
            enrollment_id = %data.id,
            passed,
            required = course.required_quiz_count(),
            "Quiz progress recomputed"
        );
        Ok(self.finalize(&mut data, &course, now))
    }

    fn course_of(&self, enrollment: &Enrollment) -> Result<Course, EnrollmentError> {
        // Resolve before locking the enrollment.
        self.catalog
            .course(&enrollment.course_id())
            .ok_or(EnrollmentError::CourseNotFound)
    }

    fn finalize(&self, data: &mut EnrollmentData, course: &Course, now: DateTime<Utc>) -> ProgressSnapshot {
        if data.is_completed {
            return ProgressSnapshot::of(data, false);
        }
        if course.required_quiz_count() == 0 {
            data.apply_quiz_counts(0, 0, now);
        }
        if !(data.videos_completed && data.quizzes_completed) {
            return ProgressSnapshot::of(data, false);
        }
        if data.status != EnrollmentStatus::Active {
            debug!(
                enrollment_id = %data.id,
                status = %data.status,
                "Completion deferred, enrollment not active"
            );
            return ProgressSnapshot::of(data, false);
        }
        let newly_completed = matches!(data.mark_completed(now), Ok(true));
        if newly_completed {
            info!(
                enrollment_id = %data.id,
                student_id = %data.student_id,
                course_id = %data.course_id,
                "Course completed"
            );
        }
        ProgressSnapshot::of(data, newly_completed)
    }
}
