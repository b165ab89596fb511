//! Image to embedding: localize, align, recognize.

use crate::alignment::{align_face, crop_region};
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, RecognizerProfile};
use crate::types::{BoundingBox, DetectionPolicy, DetectorBackend, Embedding, ModelId};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// SCRFD model file expected in the model directory.
pub const DETECTOR_FILE_NAME: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0} lock poisoned by an earlier panic")]
    Poisoned(&'static str),
}

/// Outcome of embedding one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// An embedding, plus the region it was taken from in the analyzed image.
    Face { embedding: Embedding, region: BoundingBox },
    /// No face localized and the policy forbids a fallback.
    NoFace,
}

/// Turns a decoded image into a face embedding.
///
/// Implementations are shared between concurrent verifications and must be
/// safe to call from several threads.
pub trait FaceEmbedder: Send + Sync {
    /// Model whose embedding space this embedder produces.
    fn model(&self) -> ModelId;

    fn detector_backend(&self) -> DetectorBackend;

    /// Blocking; callers on an async runtime should move this onto a
    /// blocking thread.
    fn embed(&self, image: &RgbImage, policy: DetectionPolicy) -> Result<Extraction, EmbedError>;
}

/// Where to read models from and which ones to load.
#[derive(Debug, Clone)]
pub struct EmbedderOptions {
    pub model_dir: PathBuf,
    pub model: ModelId,
    pub detector_backend: DetectorBackend,
    pub intra_threads: usize,
}

/// How a single image is turned into a recognizer crop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CropPlan {
    /// Similarity-align on the detection's landmarks.
    Aligned(BoundingBox),
    /// Crop the detection's box without alignment.
    Region(BoundingBox),
    /// Use the whole image.
    FullFrame,
    NoFace,
}

/// Decide how to crop given the backend, policy and best detection.
pub(crate) fn plan_crop(
    backend: DetectorBackend,
    policy: DetectionPolicy,
    detection: Option<&BoundingBox>,
) -> CropPlan {
    if backend == DetectorBackend::Skip {
        return CropPlan::FullFrame;
    }
    match (detection, policy) {
        (Some(face), _) if face.landmarks.is_some() => CropPlan::Aligned(face.clone()),
        (Some(face), _) => CropPlan::Region(face.clone()),
        (None, DetectionPolicy::Strict) => CropPlan::NoFace,
        (None, DetectionPolicy::Relaxed) => CropPlan::FullFrame,
    }
}

/// ONNX Runtime embedder: optional SCRFD detector plus one recognizer.
///
/// Sessions need exclusive access to run, so each sits behind its own mutex.
pub struct OnnxEmbedder {
    profile: RecognizerProfile,
    backend: DetectorBackend,
    detector: Option<Mutex<FaceDetector>>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxEmbedder {
    /// Load every model the options call for. Fails if any file is missing.
    pub fn load(options: &EmbedderOptions) -> Result<Self, EmbedError> {
        let profile = RecognizerProfile::for_model(options.model);

        let detector = match options.detector_backend {
            DetectorBackend::Scrfd => Some(Mutex::new(FaceDetector::load(
                &options.model_dir.join(DETECTOR_FILE_NAME),
                options.intra_threads,
            )?)),
            DetectorBackend::Skip => None,
        };
        let recognizer = FaceRecognizer::load(
            &options.model_dir.join(profile.file_name),
            profile,
            options.intra_threads,
        )?;

        tracing::info!(
            model = %options.model,
            detector_backend = %options.detector_backend,
            model_dir = %options.model_dir.display(),
            "embedder ready"
        );

        Ok(Self {
            profile,
            backend: options.detector_backend,
            detector,
            recognizer: Mutex::new(recognizer),
        })
    }

    fn localize(&self, image: &RgbImage) -> Result<Option<BoundingBox>, EmbedError> {
        let Some(detector) = &self.detector else {
            return Ok(None);
        };
        let mut detector = detector.lock().map_err(|_| EmbedError::Poisoned("detector"))?;
        let faces = detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "detection complete");
        Ok(faces.into_iter().next())
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn model(&self) -> ModelId {
        self.profile.model
    }

    fn detector_backend(&self) -> DetectorBackend {
        self.backend
    }

    fn embed(&self, image: &RgbImage, policy: DetectionPolicy) -> Result<Extraction, EmbedError> {
        let detection = self.localize(image)?;
        let size = self.profile.input_size;

        let (crop, region) = match plan_crop(self.backend, policy, detection.as_ref()) {
            CropPlan::NoFace => return Ok(Extraction::NoFace),
            CropPlan::Aligned(face) => match face.landmarks {
                Some(landmarks) => (align_face(image, &landmarks, size), face),
                None => (crop_region(image, &face, size), face),
            },
            CropPlan::Region(face) => (crop_region(image, &face, size), face),
            CropPlan::FullFrame => {
                let frame = BoundingBox::full_frame(image.width(), image.height());
                (crop_region(image, &frame, size), frame)
            }
        };

        let embedding = self
            .recognizer
            .lock()
            .map_err(|_| EmbedError::Poisoned("recognizer"))?
            .embed(&crop)?;

        Ok(Extraction::Face { embedding, region })
    }
}
