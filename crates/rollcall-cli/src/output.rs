use std::error::Error;
use std::io::{self, Write};

use rollcall_face_core::attendance::{AttendanceOutcome, AttendanceSession};
use serde_json::{json, Value};

use crate::cli::OutputMode;
use crate::errors::{AppError, AppResult};
use crate::workflow::{EnrollOutcome, ExtractOutcome, HistoryOutcome, MarkOutcome};

pub fn render_extract(outcome: &ExtractOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    println!("{line}");
                }
            }
            let bbox = &outcome.bounding_box;
            println!(
                "Signature extracted: {} values (face at {},{} to {},{}; faces detected: {})",
                outcome.dimension,
                bbox.left,
                bbox.top,
                bbox.right,
                bbox.bottom,
                outcome.faces_detected
            );
        }
        OutputMode::Json => write_json(&json!({
            "photo": outcome.photo.display().to_string(),
            "dimension": outcome.dimension,
            "faces_detected": outcome.faces_detected,
            "bounding_box": outcome.bounding_box,
            "image_width": outcome.image_width,
            "image_height": outcome.image_height,
            "signature": outcome.signature,
        }))?,
    }
    Ok(())
}

pub fn render_enroll(outcome: &EnrollOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    println!("{line}");
                }
            }
            println!(
                "Enrollment successful for {}: {}",
                outcome.student,
                outcome.signature_path.display()
            );
        }
        OutputMode::Json => write_json(&json!({
            "student": outcome.student,
            "signature_path": outcome.signature_path.display().to_string(),
            "dimension": outcome.dimension,
            "replaced": outcome.replaced,
        }))?,
    }
    Ok(())
}

pub fn render_mark(outcome: &MarkOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    println!("{line}");
                }
            }
            println!("{}: {}", outcome.student, outcome.outcome.user_message());
            if let Some(session) = outcome.outcome.session() {
                println!("{}", session_line(session));
            }
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&outcome.outcome)?;
            if let Value::Object(map) = &mut payload {
                map.insert("student".into(), json!(outcome.student));
                map.insert("at".into(), json!(outcome.at));
                map.insert("accepted".into(), json!(outcome.outcome.is_accepted()));
                if let AttendanceOutcome::ExtractionFailed { reason } = &outcome.outcome {
                    map.insert("message".into(), json!(reason.user_message()));
                }
            }
            write_json(&payload)?;
        }
    }
    Ok(())
}

pub fn render_history(outcome: &HistoryOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if outcome.sessions.is_empty() {
                match &outcome.student {
                    Some(student) => println!("No attendance recorded for {student}"),
                    None => println!("No attendance recorded"),
                }
            }
            for session in &outcome.sessions {
                println!("{}", session_line(session));
            }
        }
        OutputMode::Json => write_json(&serde_json::to_value(&outcome.sessions)?)?,
    }
    Ok(())
}

pub fn session_line(session: &AttendanceSession) -> String {
    let time_out = session
        .time_out
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    format!(
        "{}  {}  in {}  out {}",
        session.date,
        session.student_id,
        session.time_in.to_rfc3339(),
        time_out
    )
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
        }
    }
}

fn write_json(payload: &Value) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}
