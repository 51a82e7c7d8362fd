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

//! Enrollment storage with one-enrollment-per-student-per-course enforcement.

use crate::EnrollmentError;
use crate::base::{CourseId, EnrollmentId, StudentId};
use crate::enrollment::Enrollment;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct EnrollmentStore {
    enrollments: DashMap<EnrollmentId, Arc<Enrollment>>,
    /// Uniqueness guard on `(student, course)`.
    by_student_course: DashMap<(StudentId, CourseId), EnrollmentId>,
}

impl EnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new enrollment built by `make`.
    ///
    /// # Errors
    ///
    /// Returns [`EnrollmentError::AlreadyEnrolled`] if the student already has
    /// an enrollment for the course, in any status.
    pub fn insert_unique(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        make: impl FnOnce() -> Enrollment,
    ) -> Result<Arc<Enrollment>, EnrollmentError> {
        match self.by_student_course.entry((student_id, course_id)) {
            Entry::Occupied(_) => Err(EnrollmentError::AlreadyEnrolled),
            Entry::Vacant(slot) => {
                let enrollment = Arc::new(make());
                slot.insert(enrollment.id());
                self.enrollments
                    .insert(enrollment.id(), Arc::clone(&enrollment));
                Ok(enrollment)
            }
        }
    }

    pub fn get(&self, id: &EnrollmentId) -> Option<Arc<Enrollment>> {
        // Clone the Arc out so no shard lock is held while the record is locked.
        self.enrollments.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn find(&self, student_id: &StudentId, course_id: &CourseId) -> Option<Arc<Enrollment>> {
        let id = *self.by_student_course.get(&(*student_id, *course_id))?;
        self.get(&id)
    }

    pub fn for_student(&self, student_id: &StudentId) -> Vec<Arc<Enrollment>> {
        self.by_student_course
            .iter()
            .filter(|e| e.key().0 == *student_id)
            .map(|e| *e.value())
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|id| self.get(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.enrollments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrollments.is_empty()
    }
}
