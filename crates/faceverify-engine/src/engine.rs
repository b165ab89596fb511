//! Pairwise verification orchestrator.
//!
//! Each request runs two independent branches (acquire, then embed) joined
//! with `try_join!`. The first failing branch ends the request and drops the
//! other, cancelling any fetch still in flight.

use crate::config::{ConfigError, EngineConfig, VerificationConfig};
use crate::request::VerifyRequest;
use crate::result::{ErrorKind, FacialAreas, ImageRole, ResultMetadata, VerificationResult};
use faceverify_core::{
    BoundingBox, DetectionPolicy, DetectorBackend, DistanceMatcher, EmbedError, Embedding,
    Extraction, FaceEmbedder, MatchError, MatchOutcome, Matcher, ModelId, OnnxEmbedder,
};
use faceverify_source::{
    acquire, AcquireError, AcquireOptions, FetchError, ImageFetcher, ImageReference,
    ReferenceError, SourceFetcher,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;

/// Startup failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("embedder: {0}")]
    Embed(#[from] EmbedError),
    #[error("fetcher: {0}")]
    Fetch(#[from] FetchError),
}

/// Reasons a verification ends without a verdict.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid {role} image reference: {source}")]
    Reference {
        role: ImageRole,
        #[source]
        source: ReferenceError,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{role} image: {source}")]
    Acquire {
        role: ImageRole,
        #[source]
        source: AcquireError,
    },
    #[error("{role} image: embedding failed: {source}")]
    Embed {
        role: ImageRole,
        #[source]
        source: EmbedError,
    },
    #[error("{role} image: embedding task did not complete: {reason}")]
    Interrupted { role: ImageRole, reason: String },
    #[error("embeddings not comparable: {0}")]
    Match(#[from] MatchError),
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyError::Reference { .. } | VerifyError::Config(_) => ErrorKind::InvalidRequest,
            VerifyError::Acquire {
                source: AcquireError::Decode(_),
                ..
            } => ErrorKind::DecodeFailed,
            VerifyError::Acquire { .. } => ErrorKind::AcquisitionFailed,
            VerifyError::Embed { .. } | VerifyError::Interrupted { .. } | VerifyError::Match(_) => {
                ErrorKind::EmbeddingBackendFault
            }
        }
    }
}

/// A face found in one image: its embedding and where it was, in source coordinates.
struct Located {
    embedding: Embedding,
    region: BoundingBox,
}

/// Verification engine. Cheap to share behind an `Arc`; holds no per-request state.
pub struct Engine {
    fetcher: Arc<dyn ImageFetcher>,
    embedder: Arc<dyn FaceEmbedder>,
    defaults: VerificationConfig,
}

impl Engine {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        embedder: Arc<dyn FaceEmbedder>,
        defaults: VerificationConfig,
    ) -> Self {
        Self {
            fetcher,
            embedder,
            defaults,
        }
    }

    /// Load models and build the default fetcher. Fails if the configuration
    /// is invalid or any model file is missing.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let defaults = config.verification()?;
        let embedder = OnnxEmbedder::load(&config.embedder_options())?;
        defaults.validate_for(embedder.model())?;
        let fetcher = SourceFetcher::new(&config.fetch_options())?;
        Ok(Self::new(Arc::new(fetcher), Arc::new(embedder), defaults))
    }

    pub fn defaults(&self) -> &VerificationConfig {
        &self.defaults
    }

    pub fn model(&self) -> ModelId {
        self.embedder.model()
    }

    pub fn detector_backend(&self) -> DetectorBackend {
        self.embedder.detector_backend()
    }

    /// Verify a request, applying its overrides to the engine defaults.
    pub async fn handle(&self, request: &VerifyRequest) -> VerificationResult {
        let config = self.defaults.with_overrides(&request.overrides);
        self.execute(&request.registered_url, &request.captured_url, config)
            .await
    }

    /// Verify a pair of image locators under an explicit configuration.
    pub async fn verify(
        &self,
        registered: &str,
        captured: &str,
        config: &VerificationConfig,
    ) -> VerificationResult {
        self.execute(registered, captured, Ok(*config)).await
    }

    async fn execute(
        &self,
        registered: &str,
        captured: &str,
        config: Result<VerificationConfig, ConfigError>,
    ) -> VerificationResult {
        let started = Instant::now();
        let span = tracing::info_span!("verify", request_id = %uuid::Uuid::new_v4());

        async {
            let metadata = match &config {
                Ok(config) => ResultMetadata {
                    threshold: Some(config.calibration.threshold),
                    model: Some(config.model),
                    detector_backend: self.detector_backend(),
                    similarity_metric: Some(config.calibration.metric),
                },
                Err(_) => ResultMetadata {
                    threshold: None,
                    model: Some(self.model()),
                    detector_backend: self.detector_backend(),
                    similarity_metric: None,
                },
            };

            let result = match self.run(registered, captured, config).await {
                Ok(Compared {
                    registered,
                    captured,
                    outcome,
                }) => {
                    let areas = FacialAreas {
                        registered: Some(registered.region),
                        captured: Some(captured.region),
                    };
                    VerificationResult::verdict(outcome, metadata, areas)
                }
                Err(Stop::NoFace { registered, captured }) => {
                    let areas = FacialAreas {
                        registered: registered.as_ref().map(|f| f.region.clone()),
                        captured: captured.as_ref().map(|f| f.region.clone()),
                    };
                    tracing::info!(
                        registered_found = registered.is_some(),
                        captured_found = captured.is_some(),
                        "face not detected"
                    );
                    VerificationResult::no_face(registered.is_some(), captured.is_some(), metadata, areas)
                }
                Err(Stop::Failed(err)) => {
                    let kind = err.kind();
                    match kind {
                        ErrorKind::EmbeddingBackendFault => {
                            tracing::error!(error = %err, ?kind, "verification failed")
                        }
                        ErrorKind::InvalidRequest => {
                            tracing::info!(error = %err, ?kind, "request rejected")
                        }
                        _ => tracing::warn!(error = %err, ?kind, "verification failed"),
                    }
                    VerificationResult::failure(kind, err.to_string(), metadata)
                }
            };

            let elapsed = started.elapsed().as_millis() as u64;
            if let Some(distance) = result.distance {
                tracing::info!(matched = result.matched, distance, time_ms = elapsed, "verification complete");
            }
            result.with_elapsed(elapsed)
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        registered: &str,
        captured: &str,
        config: Result<VerificationConfig, ConfigError>,
    ) -> Result<Compared, Stop> {
        let registered = ImageReference::parse(registered).map_err(|source| VerifyError::Reference {
            role: ImageRole::Registered,
            source,
        })?;
        let captured = ImageReference::parse(captured).map_err(|source| VerifyError::Reference {
            role: ImageRole::Captured,
            source,
        })?;
        let config = config.map_err(VerifyError::from)?;
        config.validate_for(self.embedder.model()).map_err(VerifyError::from)?;

        tracing::debug!(%registered, %captured, policy = %config.detection_policy, "starting verification");

        let options = config.acquire_options();
        let policy = config.detection_policy;
        let (reg, cap) = tokio::try_join!(
            self.branch(ImageRole::Registered, &registered, &options, policy),
            self.branch(ImageRole::Captured, &captured, &options, policy),
        )?;

        match (reg, cap) {
            (Some(registered), Some(captured)) => {
                let outcome = DistanceMatcher::new(config.calibration)
                    .compare(&registered.embedding, &captured.embedding)
                    .map_err(VerifyError::from)?;
                Ok(Compared {
                    registered,
                    captured,
                    outcome,
                })
            }
            (registered, captured) => Err(Stop::NoFace { registered, captured }),
        }
    }

    /// Acquire one image and embed it on the blocking pool.
    async fn branch(
        &self,
        role: ImageRole,
        reference: &ImageReference,
        options: &AcquireOptions,
        policy: DetectionPolicy,
    ) -> Result<Option<Located>, VerifyError> {
        let frame = acquire(self.fetcher.as_ref(), reference, options)
            .await
            .map_err(|source| VerifyError::Acquire { role, source })?;
        let scale = frame.source_scale();

        let embedder = Arc::clone(&self.embedder);
        let extraction = tokio::task::spawn_blocking(move || embedder.embed(&frame.image, policy))
            .await
            .map_err(|e| VerifyError::Interrupted {
                role,
                reason: e.to_string(),
            })?
            .map_err(|source| VerifyError::Embed { role, source })?;

        Ok(match extraction {
            Extraction::Face { embedding, region } => Some(Located {
                embedding,
                region: region.scaled(scale),
            }),
            Extraction::NoFace => {
                tracing::debug!(%role, "no face localized");
                None
            }
        })
    }
}

/// Both faces found and compared.
struct Compared {
    registered: Located,
    captured: Located,
    outcome: MatchOutcome,
}

/// Early exits from [`Engine::run`].
enum Stop {
    NoFace {
        registered: Option<Located>,
        captured: Option<Located>,
    },
    Failed(VerifyError),
}

impl From<VerifyError> for Stop {
    fn from(err: VerifyError) -> Self {
        Stop::Failed(err)
    }
}
