//! Face recognizers via ONNX Runtime.
//!
//! One [`FaceRecognizer`] type serves every supported model; a
//! [`RecognizerProfile`] carries the per-model input size, tensor layout and
//! pixel normalization.

use crate::types::{Embedding, ModelId};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (place the {1} ONNX export in the model directory)")]
    ModelNotFound(String, ModelId),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout the model expects for its image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[1, 3, H, W]` (PyTorch / InsightFace exports)
    Nchw,
    /// `[1, H, W, 3]` (Keras exports)
    Nhwc,
}

/// Pixel normalization applied before inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// `(x - mean) / std` with fixed constants.
    Fixed { mean: f32, std: f32 },
    /// Per-image standardization: zero mean, unit variance over all values.
    Standardize,
}

/// Static description of one recognition model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizerProfile {
    pub model: ModelId,
    /// File name inside the model directory.
    pub file_name: &'static str,
    /// Side of the square input crop.
    pub input_size: u32,
    pub layout: InputLayout,
    pub normalization: Normalization,
    pub embedding_dim: usize,
}

impl RecognizerProfile {
    pub fn for_model(model: ModelId) -> Self {
        match model {
            ModelId::ArcFace => Self {
                model,
                file_name: "w600k_r50.onnx",
                input_size: 112,
                layout: InputLayout::Nchw,
                normalization: Normalization::Fixed { mean: 127.5, std: 127.5 },
                embedding_dim: model.embedding_dim(),
            },
            ModelId::FaceNet512 => Self {
                model,
                file_name: "facenet512.onnx",
                input_size: 160,
                layout: InputLayout::Nhwc,
                normalization: Normalization::Standardize,
                embedding_dim: model.embedding_dim(),
            },
        }
    }
}

/// ONNX-backed face recognizer for a single model.
pub struct FaceRecognizer {
    session: Session,
    profile: RecognizerProfile,
}

impl FaceRecognizer {
    /// Load the recognition model described by `profile` from `model_path`.
    pub fn load(
        model_path: &Path,
        profile: RecognizerProfile,
        intra_threads: usize,
    ) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(
                model_path.display().to_string(),
                profile.model,
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %profile.model,
            inputs = ?session.inputs().iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, profile })
    }

    pub fn profile(&self) -> &RecognizerProfile {
        &self.profile
    }

    /// Extract an embedding from a face crop.
    ///
    /// The crop should already be aligned; it is resized if it does not match
    /// the model's input size. The raw model output is returned unnormalized so
    /// that each distance metric sees the vector its threshold was tuned on.
    pub fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = to_tensor(face, &self.profile);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.profile.embedding_dim {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {}-dim embedding from {}, got {}",
                self.profile.embedding_dim,
                self.profile.model,
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RecognizerError::InferenceFailed(format!(
                "{} produced a non-finite embedding",
                self.profile.model
            )));
        }

        Ok(Embedding::new(raw.to_vec(), self.profile.model))
    }
}

/// Convert an RGB crop to the model's input tensor.
pub(crate) fn to_tensor(face: &RgbImage, profile: &RecognizerProfile) -> Array4<f32> {
    let size = profile.input_size;
    let resized;
    let face = if face.dimensions() == (size, size) {
        face
    } else {
        resized = imageops::resize(face, size, size, FilterType::Triangle);
        &resized
    };

    let (mean, std) = match profile.normalization {
        Normalization::Fixed { mean, std } => (mean, std),
        Normalization::Standardize => pixel_statistics(face),
    };

    let side = size as usize;
    let mut tensor = match profile.layout {
        InputLayout::Nchw => Array4::<f32>::zeros((1, 3, side, side)),
        InputLayout::Nhwc => Array4::<f32>::zeros((1, side, side, 3)),
    };
    for (x, y, pixel) in face.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = (pixel.0[c] as f32 - mean) / std;
            match profile.layout {
                InputLayout::Nchw => tensor[[0, c, y, x]] = value,
                InputLayout::Nhwc => tensor[[0, y, x, c]] = value,
            }
        }
    }
    tensor
}

/// Mean and standard deviation over every channel value, with the standard
/// deviation floored at `1/sqrt(n)` so flat images stay finite.
fn pixel_statistics(face: &RgbImage) -> (f32, f32) {
    let raw = face.as_raw();
    let n = raw.len().max(1) as f64;
    let mean = raw.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = raw.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt().max(1.0 / n.sqrt());
    (mean as f32, std as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_arcface_tensor_shape_and_normalization() {
        let profile = RecognizerProfile::for_model(ModelId::ArcFace);
        let face = RgbImage::from_pixel(112, 112, Rgb([255, 127, 0]));
        let tensor = to_tensor(&face, &profile);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (127.0 - 127.5) / 127.5).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_facenet_tensor_is_nhwc_and_standardized() {
        let profile = RecognizerProfile::for_model(ModelId::FaceNet512);
        let face = RgbImage::from_fn(160, 160, |x, _| if x < 80 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
        let tensor = to_tensor(&face, &profile);
        assert_eq!(tensor.shape(), &[1, 160, 160, 3]);

        let n = tensor.len() as f32;
        let mean = tensor.iter().sum::<f32>() / n;
        let var = tensor.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-4, "mean = {mean}");
        assert!((var - 1.0).abs() < 1e-3, "var = {var}");
        assert!(tensor[[0, 0, 0, 0]] < 0.0 && tensor[[0, 0, 159, 0]] > 0.0);
    }

    #[test]
    fn test_flat_image_standardizes_to_zero() {
        let profile = RecognizerProfile::for_model(ModelId::FaceNet512);
        let face = RgbImage::from_pixel(160, 160, Rgb([90, 90, 90]));
        let tensor = to_tensor(&face, &profile);
        assert!(tensor.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_crop_is_resized_to_input() {
        let profile = RecognizerProfile::for_model(ModelId::ArcFace);
        let face = RgbImage::from_pixel(300, 200, Rgb([10, 20, 30]));
        assert_eq!(to_tensor(&face, &profile).shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_tensor_is_deterministic() {
        let profile = RecognizerProfile::for_model(ModelId::FaceNet512);
        let face = RgbImage::from_fn(173, 151, |x, y| Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 256) as u8]));
        assert_eq!(to_tensor(&face, &profile), to_tensor(&face, &profile));
    }

    #[test]
    fn test_profiles_match_model_dimensions() {
        for model in ModelId::ALL {
            let profile = RecognizerProfile::for_model(model);
            assert_eq!(profile.model, model);
            assert_eq!(profile.embedding_dim, model.embedding_dim());
            assert!(profile.file_name.ends_with(".onnx"));
        }
    }

    #[test]
    fn test_load_missing_model() {
        let profile = RecognizerProfile::for_model(ModelId::ArcFace);
        let err = FaceRecognizer::load(Path::new("/nonexistent/w600k_r50.onnx"), profile, 1)
            .err()
            .expect("missing model must fail");
        assert!(matches!(err, RecognizerError::ModelNotFound(_, ModelId::ArcFace)));
    }
}
