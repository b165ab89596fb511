use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a textual model, backend, or policy name is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseNameError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl ParseNameError {
    pub(crate) fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

/// Bounding box for a localized face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// A box covering the whole frame. Used when the embedding is taken
    /// without localization.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            confidence: 0.0,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|points| points.map(|(x, y)| (x * factor, y * factor))),
        }
    }

    /// Intersection-over-Union with another box, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Face recognition model that produced an embedding.
///
/// Embeddings from different models live in different spaces; they are never
/// compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "arcface", alias = "ArcFace")]
    ArcFace,
    #[serde(rename = "facenet512", alias = "Facenet512")]
    FaceNet512,
}

impl ModelId {
    pub const ALL: [ModelId; 2] = [ModelId::ArcFace, ModelId::FaceNet512];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelId::ArcFace => "arcface",
            ModelId::FaceNet512 => "facenet512",
        }
    }

    /// Dimensionality of the embeddings this model emits.
    pub fn embedding_dim(self) -> usize {
        match self {
            ModelId::ArcFace | ModelId::FaceNet512 => 512,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arcface" => Ok(ModelId::ArcFace),
            "facenet512" => Ok(ModelId::FaceNet512),
            _ => Err(ParseNameError::new("model", s, "arcface, facenet512")),
        }
    }
}

/// Face localization backend used before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// SCRFD detector with five-point landmarks.
    #[default]
    Scrfd,
    /// No localization: every input is treated as an already-cropped face.
    Skip,
}

impl DetectorBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorBackend::Scrfd => "scrfd",
            DetectorBackend::Skip => "skip",
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorBackend {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrfd" => Ok(DetectorBackend::Scrfd),
            "skip" => Ok(DetectorBackend::Skip),
            _ => Err(ParseNameError::new("detector backend", s, "scrfd, skip")),
        }
    }
}

/// What to do when no face can be confidently localized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionPolicy {
    /// Report "no face found"; the pair is not evaluated.
    #[default]
    Strict,
    /// Embed the full frame as a best effort.
    Relaxed,
}

impl DetectionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionPolicy::Strict => "strict",
            DetectionPolicy::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for DetectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionPolicy {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "true" => Ok(DetectionPolicy::Strict),
            "relaxed" | "false" => Ok(DetectionPolicy::Relaxed),
            _ => Err(ParseNameError::new("detection policy", s, "strict, relaxed")),
        }
    }
}

/// Face embedding vector, tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub model: ModelId,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model: ModelId) -> Self {
        Self { values, model }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}
