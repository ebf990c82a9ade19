use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Reasons a photo could not be turned into a face signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("no face detected in photo")]
    NoFaceDetected,

    #[error("{count} faces detected in photo; expected exactly one")]
    MultipleFacesAmbiguous { count: usize },

    #[error("failed to decode photo: {message}")]
    DecodeError { message: String },

    #[error("face recognition model unavailable: {message}")]
    ModelUnavailable {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("face encoder produced an unusable embedding: {message}")]
    InvalidEmbedding { message: String },
}

impl ExtractionError {
    /// Model failures happen while loading, before any request is served.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractionError::ModelUnavailable { .. })
    }

    /// Text meant for the student who submitted the photo.
    pub fn user_message(&self) -> &'static str {
        match self {
            ExtractionError::NoFaceDetected => "No face detected, please retake the photo.",
            ExtractionError::MultipleFacesAmbiguous { .. } => {
                "More than one face is visible, please retake the photo on your own."
            }
            ExtractionError::DecodeError { .. } => {
                "The photo could not be read, please submit a JPEG or PNG image."
            }
            ExtractionError::ModelUnavailable { .. } => {
                "Face recognition is unavailable, please contact an administrator."
            }
            ExtractionError::InvalidEmbedding { .. } => {
                "The photo could not be processed, please retake the photo."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature dimension must be greater than zero")]
    EmptyDimension,

    #[error("signature is corrupt: expected {expected} bytes, found {found}")]
    Corrupt { expected: usize, found: usize },

    #[error("signature dimension mismatch: expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("signature value at index {index} is not finite")]
    NonFinite { index: usize },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("attendance session for {student_id} on {date} changed while it was being updated")]
    StorageConflict { student_id: String, date: NaiveDate },

    #[error("attendance session for {student_id} on {date} is busy; try again")]
    ConflictRetryExhausted { student_id: String, date: NaiveDate },

    #[error("failed to read attendance record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write attendance record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("attendance record {path} is invalid: {message}")]
    InvalidRecord { path: PathBuf, message: String },

    #[error("attendance store lock poisoned")]
    Poisoned,
}

impl SessionError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SessionError::StorageConflict { .. })
    }
}

/// Failures of `mark_attendance` that are not recognition outcomes.
#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("stored signature for {student_id} is unusable: {source}")]
    CorruptSignature {
        student_id: String,
        #[source]
        source: SignatureError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum SignatureStoreError {
    #[error("failed to read signature {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write signature {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid student id '{id}': {message}")]
pub struct InvalidStudentId {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("match threshold must be a finite, non-negative number (got {0})")]
pub struct InvalidThreshold(pub f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("UTC offset of {0} minutes is out of range")]
pub struct InvalidUtcOffset(pub i32);
