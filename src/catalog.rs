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

//! Course catalog collaborator.
//!
//! The catalog itself belongs to another subsystem. The engine only needs a
//! course's price and publication state, the shape of its content (videos and
//! required quizzes) and the denormalized enrollment counter.

use crate::base::{CourseId, QuizId, VideoId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn default_true() -> bool {
    true
}

fn default_passing_score() -> u8 {
    70
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Video {
    pub id: VideoId,
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Quiz {
    pub id: QuizId,
    #[serde(default = "default_passing_score")]
    pub passing_score: u8,
    #[serde(default = "default_true")]
    pub required: bool,
    /// `None` means unlimited attempts.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// A purchasable course as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Course {
    pub id: CourseId,
    #[serde(default)]
    pub title: String,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub published: bool,
    /// Days of access granted on activation. `None` is lifetime access.
    #[serde(default)]
    pub access_days: Option<u32>,
    #[serde(default)]
    pub videos: Vec<Video>,
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
}

impl Course {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    pub fn required_quiz_count(&self) -> u64 {
        self.quizzes.iter().filter(|q| q.required).count() as u64
    }
}

#[derive(Debug)]
struct CatalogEntry {
    course: Course,
    /// Shared with every later version of the same course.
    enrollment_count: Arc<AtomicU64>,
}

/// Concurrent course catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    courses: DashMap<CourseId, Arc<CatalogEntry>>,
    videos: DashMap<VideoId, CourseId>,
    quizzes: DashMap<QuizId, CourseId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from a list of courses.
    pub fn with_courses(courses: impl IntoIterator<Item = Course>) -> Self {
        let catalog = Self::new();
        for course in courses {
            catalog.insert(course);
        }
        catalog
    }

    /// Adds or replaces a course. A replaced course keeps its enrollment counter.
    pub fn insert(&self, course: Course) {
        for video in &course.videos {
            self.videos.insert(video.id, course.id);
        }
        for quiz in &course.quizzes {
            self.quizzes.insert(quiz.id, course.id);
        }
        match self.courses.entry(course.id) {
            Entry::Occupied(mut slot) => {
                let enrollment_count = Arc::clone(&slot.get().enrollment_count);
                slot.insert(Arc::new(CatalogEntry {
                    course,
                    enrollment_count,
                }));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(CatalogEntry {
                    course,
                    enrollment_count: Arc::new(AtomicU64::new(0)),
                }));
            }
        }
    }

    pub fn course(&self, id: &CourseId) -> Option<Course> {
        self.entry(id).map(|entry| entry.course.clone())
    }

    /// Looks up a video and the course that owns it.
    pub fn video(&self, id: &VideoId) -> Option<(CourseId, Video)> {
        let course_id = *self.videos.get(id)?;
        let entry = self.entry(&course_id)?;
        let video = entry.course.videos.iter().find(|v| v.id == *id)?.clone();
        Some((course_id, video))
    }

    /// Looks up a quiz and the course that owns it.
    pub fn quiz(&self, id: &QuizId) -> Option<(CourseId, Quiz)> {
        let course_id = *self.quizzes.get(id)?;
        let entry = self.entry(&course_id)?;
        let quiz = entry.course.quizzes.iter().find(|q| q.id == *id)?.clone();
        Some((course_id, quiz))
    }

    pub fn enrollment_count(&self, id: &CourseId) -> Option<u64> {
        self.entry(id)
            .map(|entry| entry.enrollment_count.load(Ordering::SeqCst))
    }

    /// Bumps the denormalized counter.
    ///
    /// Callers must only invoke this on an enrollment's first transition into
    /// `ACTIVE`, while holding that enrollment's lock.
    pub(crate) fn increment_enrollment_count(&self, id: &CourseId) -> Option<u64> {
        self.entry(id)
            .map(|entry| entry.enrollment_count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn entry(&self, id: &CourseId) -> Option<Arc<CatalogEntry>> {
        // Clone the Arc out so no shard lock outlives the lookup.
        self.courses.get(id).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn course(price: Decimal) -> Course {
        Course {
            id: CourseId::new_v4(),
            title: "Rust for Payments".into(),
            price,
            published: true,
            access_days: None,
            videos: vec![
                Video {
                    id: VideoId::new_v4(),
                    duration_seconds: 600,
                },
                Video {
                    id: VideoId::new_v4(),
                    duration_seconds: 300,
                },
            ],
            quizzes: vec![
                Quiz {
                    id: QuizId::new_v4(),
                    passing_score: 70,
                    required: true,
                    max_attempts: None,
                },
                Quiz {
                    id: QuizId::new_v4(),
                    passing_score: 50,
                    required: false,
                    max_attempts: Some(1),
                },
            ],
        }
    }

    #[test]
    fn counts_required_quizzes() {
        let c = course(dec!(2999));
        let catalog = Catalog::with_courses([c.clone()]);
        assert_eq!(catalog.course(&c.id).unwrap().required_quiz_count(), 1);
    }

    #[test]
    fn resolves_content_to_owning_course() {
        let c = course(dec!(10));
        let catalog = Catalog::with_courses([c.clone()]);
        let (owner, video) = catalog.video(&c.videos[1].id).unwrap();
        assert_eq!(owner, c.id);
        assert_eq!(video.duration_seconds, 300);
        let (owner, quiz) = catalog.quiz(&c.quizzes[1].id).unwrap();
        assert_eq!(owner, c.id);
        assert_eq!(quiz.max_attempts, Some(1));
    }

    #[test]
    fn replacing_a_course_keeps_its_counter() {
        let c = course(dec!(10));
        let catalog = Catalog::with_courses([c.clone()]);
        catalog.increment_enrollment_count(&c.id);
        catalog.insert(c.clone());
        assert_eq!(catalog.enrollment_count(&c.id), Some(1));
    }

    #[test]
    fn increments_racing_a_replacement_are_not_lost() {
        let c = course(dec!(10));
        let catalog = Arc::new(Catalog::with_courses([c.clone()]));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let catalog = Arc::clone(&catalog);
                let c = c.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        if (t + i) % 5 == 0 {
                            let mut edited = c.clone();
                            edited.title = format!("Revision {i}");
                            catalog.insert(edited);
                        } else {
                            catalog.increment_enrollment_count(&c.id);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let increments = (0..8)
            .flat_map(|t| (0..500).map(move |i| (t + i) % 5))
            .filter(|r| *r != 0)
            .count() as u64;
        assert_eq!(catalog.enrollment_count(&c.id), Some(increments));
    }

    #[test]
    fn free_course_detection() {
        assert!(course(Decimal::ZERO).is_free());
        assert!(!course(dec!(0.01)).is_free());
    }

    #[test]
    fn deserializes_with_defaults() {
        let yaml = r#"
id: 6f1c5a52-3f52-4f7e-9c39-5f3f2b0c9a11
price: "1500.00"
"#;
        let c: Course = serde_yaml::from_str(yaml).unwrap();
        assert!(c.published);
        assert_eq!(c.price, dec!(1500.00));
        assert!(c.videos.is_empty());
        assert_eq!(c.required_quiz_count(), 0);
    }
}
