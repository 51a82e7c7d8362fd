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

use clap::{Parser, Subcommand};
use course_enrollment_rs::{
    Catalog, Config, CourseId, Engine, QuizId, SimulatedGateway, StudentId, VideoId, http, money,
};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Course enrollment and payment reconciliation service
#[derive(Parser, Debug)]
#[command(name = "course-enrollment-rs")]
#[command(about = "Enrollment lifecycle and M-Pesa payment reconciliation", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,

    /// Replay a CSV of lifecycle events against the simulated gateway
    ///
    /// Expected format: event,student,course,item,value
    /// Example: course-enrollment-rs replay events.csv > enrollments.csv
    Replay {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    match args.command {
        Command::Serve => {
            if let Err(e) = serve(&config).await {
                error!(error = %e, "Server terminated");
                process::exit(1);
            }
        }
        Command::Replay { input } => {
            let file = match File::open(&input) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Error opening file '{}': {}", input.display(), e);
                    process::exit(1);
                }
            };

            let catalog = Arc::new(Catalog::with_courses(config.courses.clone()));
            let engine = Engine::new(catalog, Arc::new(SimulatedGateway::new()))
                .with_payment_config(config.payment.clone());

            let students = match replay_events(&engine, BufReader::new(file)).await {
                Ok(students) => students,
                Err(e) => {
                    eprintln!("Error replaying events: {}", e);
                    process::exit(1);
                }
            };

            if let Err(e) = write_enrollments(&engine, &students, std::io::stdout()) {
                eprintln!("Error writing output: {}", e);
                process::exit(1);
            }
        }
    }
}

/// Logs go to stderr so replay output on stdout stays clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("ENROLLMENT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(Engine::from_config(config)?);
    let app = http::router(engine);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!(%address, courses = config.courses.len(), "Enrollment API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

/// Raw CSV record.
///
/// Fields: `event, student, course, item, value`
#[derive(Debug, Deserialize)]
struct EventRecord {
    event: String,
    /// Free-form label, mapped to a stable id for the run.
    student: String,
    course: CourseId,
    #[serde(default)]
    item: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    value: Option<i64>,
}

/// Replays lifecycle events.
///
/// | event | item | value |
/// |-------|------|-------|
/// | `enroll` | | |
/// | `pay` | phone number | |
/// | `confirm` | receipt (optional) | result code, default `0` |
/// | `watch` | video id | position in seconds |
/// | `quiz` | quiz id | score |
///
/// Malformed rows and rejected events are skipped.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
async fn replay_events<R: Read>(
    engine: &Engine,
    reader: R,
) -> Result<HashMap<String, StudentId>, csv::Error> {
    let mut students: HashMap<String, StudentId> = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<EventRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Skipping malformed row");
                continue;
            }
        };
        let student_id = *students
            .entry(record.student.clone())
            .or_insert_with(StudentId::new_v4);

        if let Err(reason) = apply_event(engine, student_id, &record).await {
            debug!(event = %record.event, student = %record.student, %reason, "Skipping event");
        }
    }

    Ok(students)
}

async fn apply_event(engine: &Engine, student_id: StudentId, record: &EventRecord) -> Result<(), String> {
    let enrollment = || {
        engine
            .enrollment_for(&student_id, &record.course)
            .ok_or_else(|| "not enrolled".to_string())
    };

    match record.event.to_lowercase().as_str() {
        "enroll" => {
            engine
                .enroll(student_id, record.course)
                .map_err(|e| e.to_string())?;
        }
        "pay" => {
            let phone = record.item.as_deref().ok_or("missing phone number")?;
            engine
                .initiate_payment(&enrollment()?.id(), phone)
                .await
                .map_err(|e| e.to_string())?;
        }
        "confirm" => {
            let enrollment = enrollment()?;
            let payment = engine
                .payments_for_enrollment(&enrollment.id())
                .into_iter()
                .next()
                .ok_or("no payment to confirm")?;
            let callback = serde_json::json!({
                "status": true,
                "response": {
                    "ExternalReference": payment.transaction_reference,
                    "CheckoutRequestID": payment.checkout_request_id,
                    "ResultCode": record.value.unwrap_or(0),
                    "ResultDesc": "Replayed",
                    "MpesaReceiptNumber": record.item,
                    "Phone": payment.phone_number,
                }
            });
            engine.process_callback(&callback.to_string());
        }
        "watch" => {
            let video: VideoId = record
                .item
                .as_deref()
                .ok_or("missing video id")?
                .parse()
                .map_err(|e: uuid::Error| e.to_string())?;
            let position = record
                .value
                .and_then(|v| u32::try_from(v).ok())
                .ok_or("missing position")?;
            engine
                .record_video_progress(&enrollment()?.id(), &video, position)
                .map_err(|e| e.to_string())?;
        }
        "quiz" => {
            let quiz: QuizId = record
                .item
                .as_deref()
                .ok_or("missing quiz id")?
                .parse()
                .map_err(|e: uuid::Error| e.to_string())?;
            let score = record
                .value
                .and_then(|v| u32::try_from(v).ok())
                .ok_or("missing score")?;
            engine
                .record_quiz_attempt(&enrollment()?.id(), &quiz, score)
                .map_err(|e| e.to_string())?;
        }
        other => return Err(format!("unknown event '{other}'")),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct EnrollmentRow<'a> {
    student: &'a str,
    course: CourseId,
    enrollment: String,
    status: &'static str,
    price_paid: Decimal,
    progress: u8,
    videos_completed: bool,
    quizzes_completed: bool,
    payments: usize,
}

/// Writes one row per enrollment, ordered by student label.
///
/// # CSV Format
///
/// Columns: `student, course, enrollment, status, price_paid, progress,
/// videos_completed, quizzes_completed, payments`
fn write_enrollments<W: Write>(
    engine: &Engine,
    students: &HashMap<String, StudentId>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut labels: Vec<&String> = students.keys().collect();
    labels.sort();

    for label in labels {
        let mut enrollments = engine.enrollments_for_student(&students[label]);
        enrollments.sort_by_key(|e| e.course_id());
        for enrollment in enrollments {
            wtr.serialize(EnrollmentRow {
                student: label,
                course: enrollment.course_id(),
                enrollment: enrollment.id().to_string(),
                status: enrollment.status().as_str(),
                price_paid: money(enrollment.price_paid()),
                progress: enrollment.progress_percentage(),
                videos_completed: enrollment.videos_completed(),
                quizzes_completed: enrollment.quizzes_completed(),
                payments: engine.payments_for_enrollment(&enrollment.id()).len(),
            })?;
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_enrollment_rs::{Course, Quiz, Video};
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    const COURSE: &str = "6f1c5a52-3f52-4f7e-9c39-5f3f2b0c9a11";
    const VIDEO: &str = "0b8f7a4e-1c2d-4e5f-8a9b-0c1d2e3f4a5b";
    const QUIZ: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

    fn engine() -> Engine {
        let course = Course {
            id: COURSE.parse().unwrap(),
            title: "Replay".into(),
            price: dec!(1500),
            published: true,
            access_days: None,
            videos: vec![Video {
                id: VIDEO.parse().unwrap(),
                duration_seconds: 100,
            }],
            quizzes: vec![Quiz {
                id: QUIZ.parse().unwrap(),
                passing_score: 70,
                required: true,
                max_attempts: None,
            }],
        };
        Engine::new(
            Arc::new(Catalog::with_courses([course])),
            Arc::new(SimulatedGateway::new()),
        )
    }

    fn output(engine: &Engine, students: &HashMap<String, StudentId>) -> String {
        let mut out = Vec::new();
        write_enrollments(engine, students, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn replays_full_purchase_and_completion() {
        let csv = format!(
            "event,student,course,item,value\n\
             enroll,alice,{COURSE},,\n\
             pay,alice,{COURSE},0712345678,\n\
             confirm,alice,{COURSE},RBJ3K9X7M2,0\n\
             watch,alice,{COURSE},{VIDEO},90\n\
             quiz,alice,{COURSE},{QUIZ},85\n"
        );
        let engine = engine();
        let students = replay_events(&engine, Cursor::new(csv)).await.unwrap();

        let out = output(&engine, &students);
        assert!(out.starts_with("student,course,enrollment,status,price_paid,progress"));
        assert!(out.contains("alice"));
        assert!(out.contains("COMPLETED"));
        assert!(out.contains(",1500.00,"));
    }

    #[tokio::test]
    async fn failed_confirmation_leaves_enrollment_pending() {
        let csv = format!(
            "event,student,course,item,value\n\
             enroll,bob,{COURSE},,\n\
             pay,bob,{COURSE},0712345678,\n\
             confirm,bob,{COURSE},,1032\n\
             watch,bob,{COURSE},{VIDEO},90\n"
        );
        let engine = engine();
        let students = replay_events(&engine, Cursor::new(csv)).await.unwrap();
        let out = output(&engine, &students);
        assert!(out.contains("PENDING_PAYMENT"));
    }

    #[tokio::test]
    async fn skips_malformed_and_unknown_rows() {
        let csv = format!(
            "event,student,course,item,value\n\
             enroll,carol,{COURSE},,\n\
             teleport,carol,{COURSE},,\n\
             enroll,dave,not-a-uuid,,\n\
             pay,carol,{COURSE},+1555,\n"
        );
        let engine = engine();
        let students = replay_events(&engine, Cursor::new(csv)).await.unwrap();
        assert_eq!(students.len(), 1);
        assert!(engine.payments().is_empty());
    }
}
