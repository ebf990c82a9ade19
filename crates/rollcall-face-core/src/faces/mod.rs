pub mod extractor;
pub mod signature;
pub mod store;
pub mod verifier;

#[cfg(feature = "dlib")]
pub use extractor::DlibBackend;
pub use extractor::{
    select_face, BoundingBox, DetectedFace, DEFAULT_JITTERS, EnvModelPathResolver, Extraction,
    ExtractionSettings, FaceEmbeddingBackend, FaceModelPaths, ModelPathResolver,
    MultiFacePolicy, SignatureExtractor,
};

pub use signature::{
    euclidean_distance, FaceSignature, DEFAULT_EMBEDDING_DIMENSION, MAX_EMBEDDING_DIMENSION,
};

pub use store::FilesystemSignatureStore;

pub use verifier::{verify, MatchThreshold, VerificationOutcome, DEFAULT_MATCH_THRESHOLD};
