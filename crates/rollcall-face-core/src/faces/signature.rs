use std::mem::size_of;

use crate::errors::SignatureError;

/// Output size of the dlib ResNet face encoder.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 128;

/// Largest dimension a deployment may configure.
pub const MAX_EMBEDDING_DIMENSION: usize = 4096;

const ELEMENT_BYTES: usize = size_of::<f64>();

/// Fixed-length face embedding. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSignature {
    values: Box<[f64]>,
}

impl FaceSignature {
    pub fn new(values: Vec<f64>, dimension: usize) -> Result<Self, SignatureError> {
        if dimension == 0 {
            return Err(SignatureError::EmptyDimension);
        }
        if values.len() != dimension {
            return Err(SignatureError::DimensionMismatch {
                expected: dimension,
                found: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|value| !value.is_finite()) {
            return Err(SignatureError::NonFinite { index });
        }

        Ok(Self {
            values: values.into_boxed_slice(),
        })
    }

    /// Decodes the persisted form: `dimension` little-endian `f64` values.
    pub fn from_bytes(bytes: &[u8], dimension: usize) -> Result<Self, SignatureError> {
        if dimension == 0 {
            return Err(SignatureError::EmptyDimension);
        }
        // No slice can be usize::MAX bytes long, so saturating still mismatches.
        let expected = dimension.checked_mul(ELEMENT_BYTES).unwrap_or(usize::MAX);
        if bytes.len() != expected {
            return Err(SignatureError::Corrupt {
                expected,
                found: bytes.len(),
            });
        }

        let values = bytes
            .chunks_exact(ELEMENT_BYTES)
            .map(|chunk| {
                let mut raw = [0u8; ELEMENT_BYTES];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Self::new(values, dimension)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.values.len() * ELEMENT_BYTES);
        for value in self.values.iter() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn distance(&self, other: &FaceSignature) -> Result<f64, SignatureError> {
        if self.dimension() != other.dimension() {
            return Err(SignatureError::DimensionMismatch {
                expected: self.dimension(),
                found: other.dimension(),
            });
        }
        Ok(euclidean_distance(&self.values, &other.values))
    }
}

pub fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(l, r)| (l - r) * (l - r))
        .sum::<f64>()
        .sqrt()
}
