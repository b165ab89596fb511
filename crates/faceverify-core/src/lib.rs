//! faceverify-core: Face localization, embedding and matching.
//!
//! Uses SCRFD for face detection and ArcFace or FaceNet512 for recognition,
//! both running via ONNX Runtime for CPU inference. Embeddings are compared
//! with a calibrated distance metric and a strict threshold.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use embedder::{EmbedError, EmbedderOptions, Extraction, FaceEmbedder, OnnxEmbedder};
pub use matcher::{Calibration, DistanceMatcher, DistanceMetric, MatchError, MatchOutcome, Matcher};
pub use types::{BoundingBox, DetectionPolicy, DetectorBackend, Embedding, ModelId, ParseNameError};
