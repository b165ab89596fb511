#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use faceverify_core::{
    BoundingBox, Calibration, DetectionPolicy, DetectorBackend, DistanceMetric, EmbedError,
    Embedding, Extraction, FaceEmbedder, ModelId,
};
use faceverify_engine::{Engine, VerificationConfig};
use faceverify_source::{FetchError, ImageFetcher, ImageReference};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

pub const ALICE_1: &str = "https://img.test/alice-1.png";
pub const ALICE_2: &str = "https://img.test/alice-2.png";
pub const BOB: &str = "https://img.test/bob.png";
pub const NO_FACE: &str = "https://img.test/empty-room.png";
pub const BROKEN_MODEL: &str = "https://img.test/crashes-model.png";
pub const NOT_AN_IMAGE: &str = "https://img.test/page.html";
pub const HANGS: &str = "https://img.test/slow.png";
pub const FAILS_LATE: &str = "https://img.test/gone.png";

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);

pub fn png(image: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn solid(color: Rgb<u8>) -> Vec<u8> {
    png(RgbImage::from_pixel(32, 24, color))
}

/// Counts concurrent fetches; decrements when the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory fetcher keyed by the reference's display form.
#[derive(Default)]
pub struct StubFetcher {
    images: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub completed: AtomicUsize,
}

impl StubFetcher {
    pub fn with_fixtures() -> Self {
        let mut fetcher = Self::default();
        fetcher.insert(ALICE_1, solid(RED));
        fetcher.insert(ALICE_2, solid(GREEN));
        fetcher.insert(BOB, solid(BLUE));
        fetcher.insert(NO_FACE, solid(BLACK));
        fetcher.insert(BROKEN_MODEL, solid(MAGENTA));
        fetcher.insert(NOT_AN_IMAGE, b"<html>moved</html>".to_vec());
        fetcher
    }

    pub fn insert(&mut self, key: &str, bytes: Vec<u8>) {
        self.images.insert(key.to_string(), bytes);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight);
        let key = reference.to_string();

        match key.as_str() {
            HANGS => std::future::pending::<()>().await,
            FAILS_LATE => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                return Err(FetchError::Status {
                    url: key.clone(),
                    status: 410,
                });
            }
            _ => {}
        }

        let bytes = self.images.get(&key).cloned().ok_or(FetchError::Status {
            url: key,
            status: 404,
        })?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }
}

pub fn fixture_embedding(values: [f32; 4]) -> Embedding {
    Embedding::new(values.to_vec(), ModelId::ArcFace)
}

/// Embeds by the color of the top-left pixel.
///
/// Red and green are the same person at Euclidean distance 0.45; blue is a
/// different person at 0.82 from red. Black has no face (embedded as red
/// under the relaxed policy). Magenta makes the backend fail.
pub struct ColorEmbedder;

impl FaceEmbedder for ColorEmbedder {
    fn model(&self) -> ModelId {
        ModelId::ArcFace
    }

    fn detector_backend(&self) -> DetectorBackend {
        DetectorBackend::Scrfd
    }

    fn embed(&self, image: &RgbImage, policy: DetectionPolicy) -> Result<Extraction, EmbedError> {
        let pixel = *image.get_pixel(0, 0);
        let values = if pixel == RED {
            [1.0, 0.0, 0.0, 0.0]
        } else if pixel == GREEN {
            [1.0, 0.45, 0.0, 0.0]
        } else if pixel == BLUE {
            [1.0, 0.0, 0.82, 0.0]
        } else if pixel == MAGENTA {
            return Err(EmbedError::Poisoned("recognizer"));
        } else if policy == DetectionPolicy::Relaxed {
            [1.0, 0.0, 0.0, 0.0]
        } else {
            return Ok(Extraction::NoFace);
        };
        Ok(Extraction::Face {
            embedding: fixture_embedding(values),
            region: BoundingBox {
                x: 4.0,
                y: 2.0,
                width: 20.0,
                height: 18.0,
                confidence: 0.99,
                landmarks: None,
            },
        })
    }
}

/// Euclidean distance, threshold 0.6, strict policy.
pub fn euclidean_config() -> VerificationConfig {
    VerificationConfig {
        detection_policy: DetectionPolicy::Strict,
        calibration: Calibration::new(DistanceMetric::Euclidean, 0.6).unwrap(),
        model: ModelId::ArcFace,
        fetch_timeout: Duration::from_secs(5),
        downsample_max_side: None,
    }
}

pub fn engine_with(fetcher: Arc<StubFetcher>, embedder: Arc<dyn FaceEmbedder>) -> Engine {
    Engine::new(fetcher, embedder, euclidean_config())
}

pub fn fixture_engine() -> (Engine, Arc<StubFetcher>) {
    let fetcher = Arc::new(StubFetcher::with_fixtures());
    (engine_with(fetcher.clone(), Arc::new(ColorEmbedder)), fetcher)
}
