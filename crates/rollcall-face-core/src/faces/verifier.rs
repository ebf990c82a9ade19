use serde::Serialize;

use crate::errors::InvalidThreshold;
use crate::faces::signature::{euclidean_distance, FaceSignature};

/// Usual cut-off for 128-dimensional dlib embeddings.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Largest Euclidean distance still accepted as the same person.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct MatchThreshold(f64);

impl MatchThreshold {
    pub fn new(value: f64) -> Result<Self, InvalidThreshold> {
        if value.is_finite() && value >= 0.0 {
            Ok(Self(value))
        } else {
            Err(InvalidThreshold(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for MatchThreshold {
    fn default() -> Self {
        Self(DEFAULT_MATCH_THRESHOLD)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Match { distance: f64 },
    NoMatch { distance: f64 },
    NoEnrollment,
}

impl VerificationOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, VerificationOutcome::Match { .. })
    }

    pub fn distance(&self) -> Option<f64> {
        match self {
            VerificationOutcome::Match { distance } | VerificationOutcome::NoMatch { distance } => {
                Some(*distance)
            }
            VerificationOutcome::NoEnrollment => None,
        }
    }
}

/// Compares a candidate against the enrolled signature.
///
/// A missing enrollment short-circuits to [`VerificationOutcome::NoEnrollment`].
/// Signatures of different dimensionality can never match and report an
/// infinite distance.
pub fn verify(
    stored: Option<&FaceSignature>,
    candidate: &FaceSignature,
    threshold: MatchThreshold,
) -> VerificationOutcome {
    let Some(stored) = stored else {
        return VerificationOutcome::NoEnrollment;
    };

    let distance = if stored.dimension() == candidate.dimension() {
        euclidean_distance(stored.values(), candidate.values())
    } else {
        f64::INFINITY
    };

    if distance <= threshold.value() {
        VerificationOutcome::Match { distance }
    } else {
        VerificationOutcome::NoMatch { distance }
    }
}
