//! Pairwise embedding comparison.
//!
//! A [`Calibration`] pairs a distance metric with the threshold tuned for it;
//! a pair is a match only when its distance is strictly below the threshold.

use crate::types::{Embedding, ModelId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embeddings come from different models: {left} vs {right}")]
    ModelMismatch { left: ModelId, right: ModelId },
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("threshold must be a finite positive number, got {0}")]
    InvalidThreshold(f32),
}

/// Distance function applied to a pair of embeddings. Lower = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in [0, 2].
    Cosine,
    /// L2 norm of `a - b`.
    Euclidean,
    /// L2 norm of the difference of the unit-normalized vectors, in [0, 2].
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }

    /// Distance between two equal-length vectors.
    ///
    /// Accumulates in f64. Identical inputs are at distance exactly 0.0.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        if a == b {
            return 0.0;
        }
        let d = match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => euclidean(a.iter().copied(), b.iter().copied()),
            DistanceMetric::EuclideanL2 => {
                let (na, nb) = (norm(a), norm(b));
                euclidean(
                    a.iter().map(|&x| unit(x, na)),
                    b.iter().map(|&x| unit(x, nb)),
                )
            }
        };
        d as f32
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = crate::types::ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        DistanceMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == lowered)
            .ok_or_else(|| {
                crate::types::ParseNameError::new("distance metric", s, "cosine, euclidean, euclidean_l2")
            })
    }
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

fn unit(x: f32, norm: f64) -> f32 {
    if norm > 0.0 {
        (x as f64 / norm) as f32
    } else {
        0.0
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut sq_a = 0.0f64;
    let mut sq_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        sq_a += x * x;
        sq_b += y * y;
    }
    let denom = sq_a.sqrt() * sq_b.sqrt();
    if denom > 0.0 {
        (1.0 - dot / denom).clamp(0.0, 2.0)
    } else {
        // A zero vector carries no direction; treat it as orthogonal.
        1.0
    }
}

fn euclidean(a: impl Iterator<Item = f32>, b: impl Iterator<Item = f32>) -> f64 {
    a.zip(b)
        .map(|(x, y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// A distance metric together with the threshold calibrated for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub metric: DistanceMetric,
    pub threshold: f32,
}

impl Calibration {
    pub fn new(metric: DistanceMetric, threshold: f32) -> Result<Self, MatchError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        Ok(Self { metric, threshold })
    }

    /// Pre-tuned threshold for `model` under `metric`.
    pub fn default_for(model: ModelId, metric: DistanceMetric) -> Self {
        let threshold = match (model, metric) {
            (ModelId::ArcFace, DistanceMetric::Cosine) => 0.68,
            (ModelId::ArcFace, DistanceMetric::Euclidean) => 4.15,
            (ModelId::ArcFace, DistanceMetric::EuclideanL2) => 1.13,
            (ModelId::FaceNet512, DistanceMetric::Cosine) => 0.3754,
            (ModelId::FaceNet512, DistanceMetric::Euclidean) => 17.3474,
            (ModelId::FaceNet512, DistanceMetric::EuclideanL2) => 0.8346,
        };
        Self { metric, threshold }
    }
}

/// Distance and verdict for one pair of embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub distance: f32,
    pub matched: bool,
}

/// Strategy for deciding whether two embeddings belong to the same identity.
pub trait Matcher {
    fn compare(&self, a: &Embedding, b: &Embedding) -> Result<MatchOutcome, MatchError>;
}

/// Threshold matcher over a single [`Calibration`].
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    calibration: Calibration,
}

impl DistanceMatcher {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, a: &Embedding, b: &Embedding) -> Result<MatchOutcome, MatchError> {
        if a.model != b.model {
            return Err(MatchError::ModelMismatch {
                left: a.model,
                right: b.model,
            });
        }
        if a.dim() != b.dim() {
            return Err(MatchError::DimensionMismatch {
                left: a.dim(),
                right: b.dim(),
            });
        }
        if a.values.is_empty() {
            return Err(MatchError::EmptyEmbedding);
        }

        let distance = self.calibration.metric.distance(&a.values, &b.values);
        Ok(MatchOutcome {
            distance,
            matched: distance < self.calibration.threshold,
        })
    }
}
