//! Request-level flows: enrolling a student and marking attendance from a
//! submitted photo.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::attendance::session::{AttendanceSession, StudentId};
use crate::attendance::store::SessionStore;
use crate::attendance::tracker::{SessionTracker, SessionTransition};
use crate::errors::{AttendanceError, ExtractionError, SessionError};
use crate::faces::extractor::{FaceEmbeddingBackend, SignatureExtractor};
use crate::faces::signature::FaceSignature;
use crate::faces::verifier::{verify, MatchThreshold, VerificationOutcome};

/// Result of one `mark_attendance` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    TimeInRecorded {
        session: AttendanceSession,
        distance: f64,
    },
    TimeOutRecorded {
        session: AttendanceSession,
        distance: f64,
    },
    AlreadyCompleted {
        session: AttendanceSession,
        distance: f64,
    },
    NoMatch {
        distance: f64,
    },
    NoEnrollment,
    ExtractionFailed {
        #[serde(serialize_with = "serialize_extraction_error")]
        reason: ExtractionError,
    },
}

fn serialize_extraction_error<S: serde::Serializer>(
    err: &ExtractionError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&err.to_string())
}

impl AttendanceOutcome {
    /// True when the request wrote a time-in or time-out.
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            AttendanceOutcome::TimeInRecorded { .. } | AttendanceOutcome::TimeOutRecorded { .. }
        )
    }

    /// True when the student was recognised, whether or not anything was written.
    pub fn is_accepted(&self) -> bool {
        self.is_recorded() || matches!(self, AttendanceOutcome::AlreadyCompleted { .. })
    }

    pub fn session(&self) -> Option<&AttendanceSession> {
        match self {
            AttendanceOutcome::TimeInRecorded { session, .. }
            | AttendanceOutcome::TimeOutRecorded { session, .. }
            | AttendanceOutcome::AlreadyCompleted { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            AttendanceOutcome::TimeInRecorded { .. } => "Time-in recorded.",
            AttendanceOutcome::TimeOutRecorded { .. } => "Time-out recorded.",
            AttendanceOutcome::AlreadyCompleted { .. } => {
                "Attendance for today is already complete."
            }
            AttendanceOutcome::NoMatch { .. } => "Face does not match the enrolled student.",
            AttendanceOutcome::NoEnrollment => "No face enrolled for this student.",
            AttendanceOutcome::ExtractionFailed { reason } => reason.user_message(),
        }
    }

    fn from_transition(transition: SessionTransition, distance: f64) -> Self {
        match transition {
            SessionTransition::TimeInRecorded(session) => {
                AttendanceOutcome::TimeInRecorded { session, distance }
            }
            SessionTransition::TimeOutRecorded(session) => {
                AttendanceOutcome::TimeOutRecorded { session, distance }
            }
            SessionTransition::AlreadyCompleted(session) => {
                AttendanceOutcome::AlreadyCompleted { session, distance }
            }
        }
    }
}

/// Composes extraction, verification and session tracking.
///
/// Signature persistence stays with the caller: `enroll` hands back the
/// signature to store, `mark_attendance` takes the stored bytes.
pub struct AttendanceService<B, S> {
    extractor: SignatureExtractor<B>,
    tracker: SessionTracker<S>,
    threshold: MatchThreshold,
}

impl<B, S> AttendanceService<B, S>
where
    B: FaceEmbeddingBackend,
    S: SessionStore,
{
    pub fn new(
        extractor: SignatureExtractor<B>,
        tracker: SessionTracker<S>,
        threshold: MatchThreshold,
    ) -> Self {
        Self {
            extractor,
            tracker,
            threshold,
        }
    }

    pub fn extractor(&self) -> &SignatureExtractor<B> {
        &self.extractor
    }

    pub fn tracker(&self) -> &SessionTracker<S> {
        &self.tracker
    }

    pub fn threshold(&self) -> MatchThreshold {
        self.threshold
    }

    pub fn enroll(
        &self,
        student: &StudentId,
        photo: &[u8],
    ) -> Result<FaceSignature, ExtractionError> {
        let signature = self.extractor.extract(photo)?;
        info!(student = %student, dimension = signature.dimension(), "enrollment signature extracted");
        Ok(signature)
    }

    /// Verifies `photo` against the stored signature and advances today's
    /// session on a match.
    ///
    /// Recognition results come back as [`AttendanceOutcome`]; only a corrupt
    /// stored signature or a session store failure is an `Err`.
    pub fn mark_attendance(
        &self,
        student: &StudentId,
        stored: Option<&[u8]>,
        photo: &[u8],
        now: DateTime<Utc>,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        let Some(bytes) = stored else {
            info!(student = %student, "attendance rejected: no enrollment");
            return Ok(AttendanceOutcome::NoEnrollment);
        };

        let dimension = self.extractor.settings().dimension;
        let enrolled = FaceSignature::from_bytes(bytes, dimension).map_err(|source| {
            AttendanceError::CorruptSignature {
                student_id: student.to_string(),
                source,
            }
        })?;

        let candidate = match self.extractor.extract(photo) {
            Ok(signature) => signature,
            Err(reason) => {
                info!(student = %student, %reason, "attendance rejected: extraction failed");
                return Ok(AttendanceOutcome::ExtractionFailed { reason });
            }
        };

        let distance = match verify(Some(&enrolled), &candidate, self.threshold) {
            VerificationOutcome::Match { distance } => distance,
            VerificationOutcome::NoMatch { distance } => {
                info!(student = %student, distance, "attendance rejected: face mismatch");
                return Ok(AttendanceOutcome::NoMatch { distance });
            }
            VerificationOutcome::NoEnrollment => return Ok(AttendanceOutcome::NoEnrollment),
        };
        debug!(student = %student, distance, threshold = self.threshold.value(), "face matched");

        let transition = self.tracker.apply_match(student, now)?;
        Ok(AttendanceOutcome::from_transition(transition, distance))
    }

    pub fn history(&self, student: &StudentId) -> Result<Vec<AttendanceSession>, SessionError> {
        self.tracker.store().history(student)
    }

    pub fn all_sessions(&self) -> Result<Vec<AttendanceSession>, SessionError> {
        self.tracker.store().all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use chrono::TimeZone;
    use image::codecs::png::PngEncoder;
    use image::{ColorType, ImageEncoder, Rgb, RgbImage};

    use crate::attendance::session::AttendanceCalendar;
    use crate::attendance::store::InMemorySessionStore;
    use crate::faces::extractor::{BoundingBox, DetectedFace, ExtractionSettings};

    /// Reads the embedding from the red channel of the first pixel row.
    struct RowBackend {
        calls: Cell<usize>,
    }

    impl FaceEmbeddingBackend for RowBackend {
        fn extract(
            &self,
            image: &RgbImage,
            _num_jitters: u32,
        ) -> Result<Vec<DetectedFace>, ExtractionError> {
            self.calls.set(self.calls.get() + 1);
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

    fn photo(row: [u8; 4]) -> Vec<u8> {
        let image = RgbImage::from_fn(4, 2, |x, _| Rgb([row[x as usize], 0, 0]));
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(image.as_raw(), 4, 2, ColorType::Rgb8)
            .unwrap();
        bytes
    }

    fn service() -> AttendanceService<RowBackend, InMemorySessionStore> {
        let settings = ExtractionSettings {
            dimension: 4,
            ..ExtractionSettings::default()
        };
        AttendanceService::new(
            SignatureExtractor::new(
                RowBackend {
                    calls: Cell::new(0),
                },
                settings,
            ),
            SessionTracker::new(InMemorySessionStore::new(), AttendanceCalendar::utc()),
            MatchThreshold::default(),
        )
    }

    fn student() -> StudentId {
        StudentId::parse("s-001").unwrap()
    }

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn enrolled_face_records_time_in() {
        let service = service();
        let enrolled = service.enroll(&student(), &photo([255, 0, 128, 64])).unwrap();

        let outcome = service
            .mark_attendance(
                &student(),
                Some(&enrolled.to_bytes()),
                &photo([255, 0, 128, 64]),
                morning(),
            )
            .unwrap();

        assert!(outcome.is_recorded());
        assert!(matches!(
            outcome,
            AttendanceOutcome::TimeInRecorded { distance, .. } if distance == 0.0
        ));
    }

    #[test]
    fn different_face_is_rejected_without_writing() {
        let service = service();
        let enrolled = service.enroll(&student(), &photo([255, 255, 0, 0])).unwrap();

        let outcome = service
            .mark_attendance(
                &student(),
                Some(&enrolled.to_bytes()),
                &photo([0, 0, 255, 255]),
                morning(),
            )
            .unwrap();

        assert!(matches!(outcome, AttendanceOutcome::NoMatch { distance } if distance > 0.6));
        assert!(service.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn missing_enrollment_skips_extraction() {
        let service = service();
        let outcome = service
            .mark_attendance(&student(), None, &photo([255, 0, 0, 0]), morning())
            .unwrap();

        assert_eq!(outcome, AttendanceOutcome::NoEnrollment);
        assert_eq!(service.extractor().backend().calls.get(), 0);
    }

    #[test]
    fn faceless_photo_reports_extraction_failure() {
        let service = service();
        let enrolled = service.enroll(&student(), &photo([255, 0, 0, 0])).unwrap();

        let outcome = service
            .mark_attendance(
                &student(),
                Some(&enrolled.to_bytes()),
                &photo([0, 0, 0, 0]),
                morning(),
            )
            .unwrap();

        assert_eq!(
            outcome,
            AttendanceOutcome::ExtractionFailed {
                reason: ExtractionError::NoFaceDetected
            }
        );
        assert_eq!(outcome.user_message(), "No face detected, please retake the photo.");
        assert!(service.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn truncated_signature_is_an_error() {
        let service = service();
        let err = service
            .mark_attendance(&student(), Some(&[0u8; 7]), &photo([255, 0, 0, 0]), morning())
            .unwrap_err();
        assert!(matches!(err, AttendanceError::CorruptSignature { .. }));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(AttendanceOutcome::NoMatch { distance: 0.75 }).unwrap();
        assert_eq!(json["outcome"], "no_match");
        assert_eq!(json["distance"], 0.75);

        let failed = serde_json::to_value(AttendanceOutcome::ExtractionFailed {
            reason: ExtractionError::NoFaceDetected,
        })
        .unwrap();
        assert_eq!(failed["outcome"], "extraction_failed");
        assert_eq!(failed["reason"], "no face detected in photo");
    }
}
