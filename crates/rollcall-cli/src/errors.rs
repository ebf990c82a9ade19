use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use rollcall_config::ConfigError;
use rollcall_face_core::errors::{
    AttendanceError, ExtractionError, InvalidStudentId, InvalidThreshold, InvalidUtcOffset,
    SessionError, SignatureStoreError,
};
use thiserror::Error;

/// Exit status for a photo that was read but not accepted.
pub const REJECTED_EXIT_CODE: u8 = 3;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: &'static str, message: String },

    #[error(transparent)]
    InvalidStudent(#[from] InvalidStudentId),

    #[error(transparent)]
    InvalidThreshold(#[from] InvalidThreshold),

    #[error(transparent)]
    InvalidUtcOffset(#[from] InvalidUtcOffset),

    #[error("photo not found or unreadable: {path}")]
    PhotoRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Attendance(#[from] AttendanceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    SignatureStore(#[from] SignatureStoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config(_) => ExitCode::from(2),
            AppError::InvalidSetting { .. } => ExitCode::from(2),
            AppError::InvalidStudent(_) => ExitCode::from(2),
            AppError::InvalidThreshold(_) => ExitCode::from(2),
            AppError::InvalidUtcOffset(_) => ExitCode::from(2),
            AppError::PhotoRead { .. } => ExitCode::from(2),
            AppError::Extraction(err) if err.is_fatal() => ExitCode::from(4),
            AppError::Extraction(_) => ExitCode::from(REJECTED_EXIT_CODE),
            AppError::Attendance(AttendanceError::CorruptSignature { .. }) => ExitCode::from(4),
            AppError::Attendance(AttendanceError::Session(err)) | AppError::Session(err)
                if is_transient(err) =>
            {
                ExitCode::from(5)
            }
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        match self {
            AppError::Extraction(err) => format!("{} ({err})", err.user_message()),
            AppError::Attendance(AttendanceError::CorruptSignature { student_id, .. }) => {
                format!("stored signature for {student_id} is corrupt; re-enroll the student")
            }
            other => other.to_string(),
        }
    }
}

fn is_transient(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::StorageConflict { .. } | SessionError::ConflictRetryExhausted { .. }
    )
}

pub type AppResult<T> = Result<T, AppError>;
