use std::cmp::Ordering;
use std::env;
use std::path::{Path, PathBuf};

#[cfg(feature = "dlib")]
use dlib_face_recognition::{
    FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
    LandmarkPredictor, LandmarkPredictorTrait,
};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ExtractionError, SignatureError};
use crate::faces::signature::{FaceSignature, DEFAULT_EMBEDDING_DIMENSION};

pub const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
pub const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";
pub const DEFAULT_JITTERS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

pub trait ModelPathResolver {
    fn resolve(
        &self,
        landmark: Option<&Path>,
        encoder: Option<&Path>,
    ) -> Result<FaceModelPaths, ExtractionError>;
}

/// Explicit paths win, then `$DLIB_LANDMARK_MODEL` / `$DLIB_ENCODER_MODEL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvModelPathResolver;

impl ModelPathResolver for EnvModelPathResolver {
    fn resolve(
        &self,
        landmark: Option<&Path>,
        encoder: Option<&Path>,
    ) -> Result<FaceModelPaths, ExtractionError> {
        let landmark = landmark
            .map(Path::to_path_buf)
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or_else(|| ExtractionError::ModelUnavailable {
                path: None,
                message: format!(
                    "missing landmark predictor model; set landmark_model or ${LANDMARK_ENV}"
                ),
            })?;

        let encoder = encoder
            .map(Path::to_path_buf)
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or_else(|| ExtractionError::ModelUnavailable {
                path: None,
                message: format!(
                    "missing face encoding network; set encoder_model or ${ENCODER_ENV}"
                ),
            })?;

        Ok(FaceModelPaths { landmark, encoder })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundingBox {
    pub fn area(&self) -> i64 {
        let width = (self.right - self.left).max(0);
        let height = (self.bottom - self.top).max(0);
        width.saturating_mul(height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub embedding: Vec<f64>,
}

pub trait FaceEmbeddingBackend {
    fn extract(
        &self,
        image: &RgbImage,
        num_jitters: u32,
    ) -> Result<Vec<DetectedFace>, ExtractionError>;
}

impl<T: FaceEmbeddingBackend + ?Sized> FaceEmbeddingBackend for Box<T> {
    fn extract(
        &self,
        image: &RgbImage,
        num_jitters: u32,
    ) -> Result<Vec<DetectedFace>, ExtractionError> {
        (**self).extract(image, num_jitters)
    }
}

/// What to do when a photo contains more than one face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Keep the largest bounding box; ties go to the topmost, then leftmost,
    /// then first-detected face.
    #[default]
    Largest,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSettings {
    pub dimension: usize,
    pub multi_face_policy: MultiFacePolicy,
    pub jitters: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            multi_face_policy: MultiFacePolicy::default(),
            jitters: DEFAULT_JITTERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub signature: FaceSignature,
    pub bounding_box: BoundingBox,
    pub faces_detected: usize,
    pub image_width: u32,
    pub image_height: u32,
}

pub struct SignatureExtractor<B> {
    backend: B,
    settings: ExtractionSettings,
}

impl<B: FaceEmbeddingBackend> SignatureExtractor<B> {
    pub fn new(backend: B, settings: ExtractionSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    pub fn extract(&self, image_bytes: &[u8]) -> Result<FaceSignature, ExtractionError> {
        self.extract_detailed(image_bytes)
            .map(|extraction| extraction.signature)
    }

    pub fn extract_detailed(&self, image_bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let rgb = decode_photo(image_bytes)?;
        debug!(width = rgb.width(), height = rgb.height(), "decoded photo");

        let faces = self.backend.extract(&rgb, self.settings.jitters)?;
        let faces_detected = faces.len();
        debug!(faces = faces_detected, "face detection finished");

        let face = select_face(faces, self.settings.multi_face_policy)?;
        let signature = FaceSignature::new(face.embedding, self.settings.dimension)
            .map_err(invalid_embedding)?;

        Ok(Extraction {
            signature,
            bounding_box: face.bounding_box,
            faces_detected,
            image_width: rgb.width(),
            image_height: rgb.height(),
        })
    }
}

fn decode_photo(bytes: &[u8]) -> Result<RgbImage, ExtractionError> {
    let format = image::guess_format(bytes).map_err(|err| ExtractionError::DecodeError {
        message: err.to_string(),
    })?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(ExtractionError::DecodeError {
            message: format!("unsupported image format {format:?}; expected JPEG or PNG"),
        });
    }

    let image = image::load_from_memory_with_format(bytes, format).map_err(|err| {
        ExtractionError::DecodeError {
            message: err.to_string(),
        }
    })?;
    Ok(image.to_rgb8())
}

pub fn select_face(
    faces: Vec<DetectedFace>,
    policy: MultiFacePolicy,
) -> Result<DetectedFace, ExtractionError> {
    let count = faces.len();
    if count > 1 && policy == MultiFacePolicy::Reject {
        return Err(ExtractionError::MultipleFacesAmbiguous { count });
    }

    faces
        .into_iter()
        .enumerate()
        .min_by(|(lhs_idx, lhs), (rhs_idx, rhs)| prominence(lhs, *lhs_idx, rhs, *rhs_idx))
        .map(|(_, face)| face)
        .ok_or(ExtractionError::NoFaceDetected)
}

// Most prominent face sorts first.
fn prominence(
    lhs: &DetectedFace,
    lhs_idx: usize,
    rhs: &DetectedFace,
    rhs_idx: usize,
) -> Ordering {
    let (a, b) = (&lhs.bounding_box, &rhs.bounding_box);
    b.area()
        .cmp(&a.area())
        .then(a.top.cmp(&b.top))
        .then(a.left.cmp(&b.left))
        .then(lhs_idx.cmp(&rhs_idx))
}

fn invalid_embedding(err: SignatureError) -> ExtractionError {
    ExtractionError::InvalidEmbedding {
        message: err.to_string(),
    }
}

#[cfg(feature = "dlib")]
pub struct DlibBackend {
    detector: FaceDetector,
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
}

#[cfg(feature = "dlib")]
impl DlibBackend {
    pub fn new(models: &FaceModelPaths) -> Result<Self, ExtractionError> {
        debug!(path = %models.landmark.display(), "loading landmark model");
        let predictor = LandmarkPredictor::open(&models.landmark).map_err(|message| {
            ExtractionError::ModelUnavailable {
                path: Some(models.landmark.clone()),
                message,
            }
        })?;
        debug!(path = %models.encoder.display(), "loading encoder model");
        let encoder = FaceEncoderNetwork::open(&models.encoder).map_err(|message| {
            ExtractionError::ModelUnavailable {
                path: Some(models.encoder.clone()),
                message,
            }
        })?;
        let detector = FaceDetector::new();

        Ok(Self {
            detector,
            predictor,
            encoder,
        })
    }
}

#[cfg(feature = "dlib")]
impl FaceEmbeddingBackend for DlibBackend {
    fn extract(
        &self,
        image: &RgbImage,
        num_jitters: u32,
    ) -> Result<Vec<DetectedFace>, ExtractionError> {
        let matrix = ImageMatrix::from_image(image);
        let locations = self.detector.face_locations(&matrix);

        let mut landmarks = Vec::with_capacity(locations.len());
        for rect in locations.iter() {
            landmarks.push(self.predictor.face_landmarks(&matrix, rect));
        }

        let encodings = self
            .encoder
            .get_face_encodings(&matrix, &landmarks, num_jitters);

        let mut faces = Vec::with_capacity(locations.len());
        for (rect, encoding) in locations.iter().zip(encodings.iter()) {
            faces.push(DetectedFace {
                bounding_box: BoundingBox {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                },
                embedding: encoding.as_ref().to_vec(),
            });
        }

        Ok(faces)
    }
}
