use faceverify_core::{BoundingBox, DetectorBackend, DistanceMetric, MatchOutcome, ModelId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a failed or incomplete verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    AcquisitionFailed,
    DecodeFailed,
    NoFaceFound,
    EmbeddingBackendFault,
}

/// Which side of the pair a message or failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageRole {
    Registered,
    Captured,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageRole::Registered => "registered",
            ImageRole::Captured => "captured",
        })
    }
}

/// Face regions in original-image coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacialAreas {
    pub registered: Option<BoundingBox>,
    pub captured: Option<BoundingBox>,
}

/// Settings the verdict was reached under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub threshold: Option<f32>,
    pub model: Option<ModelId>,
    pub detector_backend: DetectorBackend,
    pub similarity_metric: Option<DistanceMetric>,
}

/// Outcome of one verification, serialized as the response payload.
///
/// When `matched` is false exactly one of `distance` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub matched: bool,
    pub distance: Option<f32>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    #[serde(flatten)]
    pub metadata: ResultMetadata,
    pub facial_areas: FacialAreas,
    pub time_ms: u64,
}

impl VerificationResult {
    /// Both faces embedded and compared.
    pub fn verdict(outcome: MatchOutcome, metadata: ResultMetadata, facial_areas: FacialAreas) -> Self {
        Self {
            matched: outcome.matched,
            distance: Some(outcome.distance),
            error: None,
            error_kind: None,
            metadata,
            facial_areas,
            time_ms: 0,
        }
    }

    /// At least one image had no face; the pair was not compared.
    pub fn no_face(
        registered_found: bool,
        captured_found: bool,
        metadata: ResultMetadata,
        facial_areas: FacialAreas,
    ) -> Self {
        let which = match (registered_found, captured_found) {
            (false, false) => "both images",
            (false, true) => "registered image",
            _ => "captured image",
        };
        Self {
            facial_areas,
            ..Self::failure(
                ErrorKind::NoFaceFound,
                format!("face not detected in {which}"),
                metadata,
            )
        }
    }

    pub fn failure(kind: ErrorKind, message: String, metadata: ResultMetadata) -> Self {
        Self {
            matched: false,
            distance: None,
            error: Some(message),
            error_kind: Some(kind),
            metadata,
            facial_areas: FacialAreas::default(),
            time_ms: 0,
        }
    }

    pub fn with_elapsed(self, time_ms: u64) -> Self {
        Self { time_ms, ..self }
    }

    /// True when the pair could not be evaluated at all. A missing face is a
    /// verdict, not an error.
    pub fn is_error(&self) -> bool {
        matches!(self.error_kind, Some(kind) if kind != ErrorKind::NoFaceFound)
    }
}
