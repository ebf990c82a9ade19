use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rollcall_face_core::attendance::{
    AttendanceOutcome, AttendanceService, AttendanceSession, FilesystemSessionStore,
    SessionStore, SessionTracker, StudentId,
};
use rollcall_face_core::errors::ExtractionError;
use rollcall_face_core::faces::{
    BoundingBox, FaceEmbeddingBackend, FilesystemSignatureStore, SignatureExtractor,
};
use tracing::{debug, info};

use crate::cli::{EnrollArgs, ExtractArgs, HistoryArgs, MarkArgs};
use crate::config::{self, RuntimeSettings, SettingsOverrides};
use crate::errors::{AppError, AppResult};

pub type BoxedBackend = Box<dyn FaceEmbeddingBackend>;

#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub photo: PathBuf,
    pub dimension: usize,
    pub faces_detected: usize,
    pub bounding_box: BoundingBox,
    pub image_width: u32,
    pub image_height: u32,
    pub signature: Vec<f64>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub student: StudentId,
    pub signature_path: PathBuf,
    pub dimension: usize,
    pub replaced: bool,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MarkOutcome {
    pub student: StudentId,
    pub at: DateTime<Utc>,
    pub outcome: AttendanceOutcome,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryOutcome {
    pub student: Option<StudentId>,
    pub sessions: Vec<AttendanceSession>,
}

pub fn run_extract(args: &ExtractArgs) -> AppResult<ExtractOutcome> {
    let settings = config::load_settings(&SettingsOverrides::default().with_models(&args.models))?;
    let backend = load_backend(&settings)?;
    run_extract_with(args, &settings, backend)
}

pub fn run_extract_with<B: FaceEmbeddingBackend>(
    args: &ExtractArgs,
    settings: &RuntimeSettings,
    backend: B,
) -> AppResult<ExtractOutcome> {
    let photo = read_photo(&args.photo)?;
    let extractor = SignatureExtractor::new(backend, settings.extraction);
    let extraction = extractor.extract_detailed(&photo)?;

    let mut logs = vec![format!(
        "Decoded {} ({}x{})",
        args.photo.display(),
        extraction.image_width,
        extraction.image_height
    )];
    if extraction.faces_detected > 1 {
        logs.push(format!(
            "{} faces detected; kept the most prominent",
            extraction.faces_detected
        ));
    }

    Ok(ExtractOutcome {
        photo: args.photo.clone(),
        dimension: extraction.signature.dimension(),
        faces_detected: extraction.faces_detected,
        bounding_box: extraction.bounding_box,
        image_width: extraction.image_width,
        image_height: extraction.image_height,
        signature: extraction.signature.values().to_vec(),
        logs,
    })
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<EnrollOutcome> {
    let overrides = SettingsOverrides {
        store_dir: args.store_dir.clone(),
        ..SettingsOverrides::default()
    }
    .with_models(&args.models);
    let settings = config::load_settings(&overrides)?;
    let backend = load_backend(&settings)?;
    run_enroll_with(args, &settings, backend)
}

/// Extracts and persists the reference signature.
///
/// The previous signature, if any, is only replaced once extraction succeeds.
pub fn run_enroll_with<B: FaceEmbeddingBackend>(
    args: &EnrollArgs,
    settings: &RuntimeSettings,
    backend: B,
) -> AppResult<EnrollOutcome> {
    let student = StudentId::parse(args.student.as_str())?;
    let photo = read_photo(&args.photo)?;
    let service = service(settings, backend);

    let signature = service.enroll(&student, &photo)?;
    let signatures = FilesystemSignatureStore::new(&settings.store_dir);
    let replaced = signatures.load(&student)?.is_some();
    let signature_path = signatures.save(&student, &signature)?;
    info!(student = %student, path = %signature_path.display(), replaced, "signature enrolled");

    let mut logs = vec![format!("Extracted signature from {}", args.photo.display())];
    if replaced {
        logs.push(format!("Replaced previous enrollment for {student}"));
    }

    Ok(EnrollOutcome {
        student,
        signature_path,
        dimension: signature.dimension(),
        replaced,
        logs,
    })
}

pub fn run_mark(args: &MarkArgs) -> AppResult<MarkOutcome> {
    let overrides = SettingsOverrides {
        store_dir: args.store_dir.clone(),
        threshold: args.threshold,
        ..SettingsOverrides::default()
    }
    .with_models(&args.models);
    let settings = config::load_settings(&overrides)?;
    let backend = load_backend(&settings)?;
    run_mark_with(args, &settings, backend, Utc::now())
}

pub fn run_mark_with<B: FaceEmbeddingBackend>(
    args: &MarkArgs,
    settings: &RuntimeSettings,
    backend: B,
    now: DateTime<Utc>,
) -> AppResult<MarkOutcome> {
    let student = StudentId::parse(args.student.as_str())?;
    let photo = read_photo(&args.photo)?;
    let stored = FilesystemSignatureStore::new(&settings.store_dir).load(&student)?;
    let service = service(settings, backend);

    let outcome = service.mark_attendance(&student, stored.as_deref(), &photo, now)?;
    let mut logs = Vec::new();
    if let Some(distance) = outcome_distance(&outcome) {
        logs.push(format!(
            "Distance {distance:.4} (threshold {:.4})",
            settings.threshold.value()
        ));
    }
    logs.push(format!(
        "Attendance day {} (UTC{})",
        settings.calendar.day_of(now),
        settings.calendar.offset()
    ));

    Ok(MarkOutcome {
        student,
        at: now,
        outcome,
        logs,
    })
}

pub fn run_history(args: &HistoryArgs) -> AppResult<HistoryOutcome> {
    let overrides = SettingsOverrides {
        store_dir: args.store_dir.clone(),
        ..SettingsOverrides::default()
    };
    let settings = config::load_settings(&overrides)?;
    run_history_with(args, &FilesystemSessionStore::new(&settings.store_dir))
}

pub fn run_history_with<S: SessionStore>(
    args: &HistoryArgs,
    store: &S,
) -> AppResult<HistoryOutcome> {
    let student = args
        .student
        .as_deref()
        .map(StudentId::parse)
        .transpose()?;
    let sessions = match &student {
        Some(student) => store.history(student)?,
        None => store.all()?,
    };
    debug!(count = sessions.len(), "loaded attendance history");
    Ok(HistoryOutcome { student, sessions })
}

fn service<B: FaceEmbeddingBackend>(
    settings: &RuntimeSettings,
    backend: B,
) -> AttendanceService<B, FilesystemSessionStore> {
    AttendanceService::new(
        SignatureExtractor::new(backend, settings.extraction),
        SessionTracker::new(
            FilesystemSessionStore::new(&settings.store_dir),
            settings.calendar,
        ),
        settings.threshold,
    )
}

fn outcome_distance(outcome: &AttendanceOutcome) -> Option<f64> {
    match outcome {
        AttendanceOutcome::TimeInRecorded { distance, .. }
        | AttendanceOutcome::TimeOutRecorded { distance, .. }
        | AttendanceOutcome::AlreadyCompleted { distance, .. }
        | AttendanceOutcome::NoMatch { distance } => Some(*distance),
        AttendanceOutcome::NoEnrollment | AttendanceOutcome::ExtractionFailed { .. } => None,
    }
}

fn read_photo(path: &Path) -> AppResult<Vec<u8>> {
    fs::read(path).map_err(|source| AppError::PhotoRead {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(feature = "dlib")]
pub fn load_backend(settings: &RuntimeSettings) -> Result<BoxedBackend, ExtractionError> {
    use rollcall_face_core::faces::{DlibBackend, EnvModelPathResolver, ModelPathResolver};

    let paths = EnvModelPathResolver.resolve(
        settings.landmark_model.as_deref(),
        settings.encoder_model.as_deref(),
    )?;
    Ok(Box::new(DlibBackend::new(&paths)?))
}

#[cfg(not(feature = "dlib"))]
pub fn load_backend(_settings: &RuntimeSettings) -> Result<BoxedBackend, ExtractionError> {
    Err(ExtractionError::ModelUnavailable {
        path: None,
        message: "rollcall was built without the `dlib` feature".into(),
    })
}
