use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use rollcall_cli::cli::{EnrollArgs, ExtractArgs, HistoryArgs, MarkArgs, ModelArgs};
use rollcall_cli::config::RuntimeSettings;
use rollcall_cli::errors::AppError;
use rollcall_cli::workflow::{
    run_enroll_with, run_extract_with, run_history_with, run_mark_with,
};
use rollcall_face_core::attendance::{AttendanceCalendar, AttendanceOutcome, FilesystemSessionStore};
use rollcall_face_core::errors::ExtractionError;
use rollcall_face_core::faces::{
    BoundingBox, DetectedFace, ExtractionSettings, FaceEmbeddingBackend, MatchThreshold,
};
use tempfile::TempDir;

/// Uses the first pixel row's red channel as the embedding; no red means no face.
struct RedRowBackend;

impl FaceEmbeddingBackend for RedRowBackend {
    fn extract(
        &self,
        image: &RgbImage,
        _num_jitters: u32,
    ) -> Result<Vec<DetectedFace>, ExtractionError> {
        let embedding: Vec<f64> = (0..image.width())
            .map(|x| f64::from(image.get_pixel(x, 0)[0]) / 255.0)
            .collect();
        if embedding.iter().all(|value| *value == 0.0) {
            return Ok(Vec::new());
        }
        Ok(vec![DetectedFace {
            bounding_box: BoundingBox {
                left: 0,
                top: 0,
                right: i64::from(image.width()),
                bottom: i64::from(image.height()),
            },
            embedding,
        }])
    }
}

fn write_photo(dir: &Path, name: &str, row: [u8; 4]) -> PathBuf {
    let image = RgbImage::from_fn(4, 4, |x, _| Rgb([row[x as usize], 0, 0]));
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(image.as_raw(), 4, 4, ColorType::Rgb8)
        .unwrap();
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn settings(store_dir: &Path) -> RuntimeSettings {
    RuntimeSettings {
        store_dir: store_dir.to_path_buf(),
        landmark_model: None,
        encoder_model: None,
        extraction: ExtractionSettings {
            dimension: 4,
            ..ExtractionSettings::default()
        },
        threshold: MatchThreshold::default(),
        calendar: AttendanceCalendar::utc(),
    }
}

fn enroll_args(photo: PathBuf) -> EnrollArgs {
    EnrollArgs {
        student: "s-001".into(),
        photo,
        store_dir: None,
        models: ModelArgs::default(),
    }
}

fn mark_args(photo: PathBuf) -> MarkArgs {
    MarkArgs {
        student: "s-001".into(),
        photo,
        store_dir: None,
        threshold: None,
        models: ModelArgs::default(),
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

#[test]
fn extract_reports_signature_dimension() {
    let tmp = TempDir::new().unwrap();
    let photo = write_photo(tmp.path(), "face.png", [255, 128, 0, 64]);

    let outcome = run_extract_with(
        &ExtractArgs {
            photo: photo.clone(),
            models: ModelArgs::default(),
        },
        &settings(tmp.path()),
        RedRowBackend,
    )
    .unwrap();

    assert_eq!(outcome.photo, photo);
    assert_eq!(outcome.dimension, 4);
    assert_eq!(outcome.faces_detected, 1);
    assert_eq!((outcome.image_width, outcome.image_height), (4, 4));
    assert_eq!(outcome.signature[0], 1.0);
}

#[test]
fn enroll_mark_and_history_share_the_store() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path());
    let face = write_photo(tmp.path(), "face.png", [255, 128, 0, 64]);
    let other = write_photo(tmp.path(), "other.png", [0, 64, 255, 255]);

    let enrolled = run_enroll_with(&enroll_args(face.clone()), &settings, RedRowBackend).unwrap();
    assert!(!enrolled.replaced);
    assert_eq!(enrolled.signature_path, tmp.path().join("signatures/s-001.sig"));
    assert_eq!(fs::read(&enrolled.signature_path).unwrap().len(), 4 * 8);

    let time_in = run_mark_with(&mark_args(face.clone()), &settings, RedRowBackend, at(1, 8))
        .unwrap();
    assert!(matches!(time_in.outcome, AttendanceOutcome::TimeInRecorded { .. }));

    let impostor = run_mark_with(&mark_args(other), &settings, RedRowBackend, at(1, 9)).unwrap();
    assert!(matches!(impostor.outcome, AttendanceOutcome::NoMatch { .. }));
    assert!(!impostor.outcome.is_accepted());

    let time_out = run_mark_with(&mark_args(face), &settings, RedRowBackend, at(1, 15)).unwrap();
    assert!(matches!(time_out.outcome, AttendanceOutcome::TimeOutRecorded { .. }));

    let store = FilesystemSessionStore::new(tmp.path());
    let history = run_history_with(
        &HistoryArgs {
            student: Some("s-001".into()),
            store_dir: None,
        },
        &store,
    )
    .unwrap();
    assert_eq!(history.sessions.len(), 1);
    assert_eq!(history.sessions[0].time_out, Some(at(1, 15)));

    let everyone = run_history_with(
        &HistoryArgs {
            student: None,
            store_dir: None,
        },
        &store,
    )
    .unwrap();
    assert!(everyone.student.is_none());
    assert_eq!(everyone.sessions, history.sessions);
}

#[test]
fn mark_without_enrollment_reports_no_enrollment() {
    let tmp = TempDir::new().unwrap();
    let face = write_photo(tmp.path(), "face.png", [255, 0, 0, 0]);

    let marked = run_mark_with(&mark_args(face), &settings(tmp.path()), RedRowBackend, at(1, 8))
        .unwrap();
    assert_eq!(marked.outcome, AttendanceOutcome::NoEnrollment);
}

#[test]
fn failed_re_enrollment_keeps_previous_signature() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path());
    let face = write_photo(tmp.path(), "face.png", [255, 128, 0, 64]);
    let blank = write_photo(tmp.path(), "blank.png", [0, 0, 0, 0]);

    let first = run_enroll_with(&enroll_args(face.clone()), &settings, RedRowBackend).unwrap();
    let before = fs::read(&first.signature_path).unwrap();

    let err = run_enroll_with(&enroll_args(blank), &settings, RedRowBackend).unwrap_err();
    assert!(matches!(
        err,
        AppError::Extraction(ExtractionError::NoFaceDetected)
    ));
    assert_eq!(fs::read(&first.signature_path).unwrap(), before);

    let again = run_enroll_with(&enroll_args(face), &settings, RedRowBackend).unwrap();
    assert!(again.replaced);
}

#[test]
fn missing_photo_and_bad_student_are_reported() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path());

    let missing = run_enroll_with(
        &enroll_args(tmp.path().join("absent.png")),
        &settings,
        RedRowBackend,
    )
    .unwrap_err();
    assert!(matches!(missing, AppError::PhotoRead { .. }));

    let face = write_photo(tmp.path(), "face.png", [255, 0, 0, 0]);
    let mut args = enroll_args(face);
    args.student = "../escape".into();
    let invalid = run_enroll_with(&args, &settings, RedRowBackend).unwrap_err();
    assert!(matches!(invalid, AppError::InvalidStudent(_)));
}

#[test]
fn corrupt_signature_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path());
    let face = write_photo(tmp.path(), "face.png", [255, 0, 0, 0]);
    fs::create_dir_all(tmp.path().join("signatures")).unwrap();
    fs::write(tmp.path().join("signatures/s-001.sig"), [0u8; 5]).unwrap();

    let err = run_mark_with(&mark_args(face), &settings, RedRowBackend, at(1, 8)).unwrap_err();
    assert!(matches!(err, AppError::Attendance(_)));
}
