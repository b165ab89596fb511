//! Engine configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `FACEVERIFY_*` environment variables. Per-request overrides are applied on
//! top of the resulting [`VerificationConfig`].

use crate::request::ConfigOverrides;
use faceverify_core::{
    Calibration, DetectionPolicy, DetectorBackend, DistanceMetric, EmbedderOptions, MatchError,
    ModelId,
};
use faceverify_source::fetch::DEFAULT_MAX_IMAGE_BYTES;
use faceverify_source::{AcquireOptions, FetchOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "FACEVERIFY_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("model swap between images: registered uses {registered}, captured uses {captured}")]
    ModelMismatch {
        registered: ModelId,
        captured: ModelId,
    },
    #[error("model {requested} requested but the engine has {loaded} loaded")]
    ModelNotLoaded { requested: ModelId, loaded: ModelId },
}

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub model: ModelId,
    pub detector_backend: DetectorBackend,
    pub detection_policy: DetectionPolicy,
    pub metric: DistanceMetric,
    /// Explicit threshold; `None` uses the calibration table for (model, metric).
    pub threshold: Option<f32>,
    pub fetch_timeout_secs: u64,
    pub max_image_bytes: usize,
    /// Shrink images larger than this before embedding.
    pub downsample_max_side: Option<u32>,
    /// ONNX Runtime intra-op threads. Fixed so results are reproducible.
    pub intra_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            model: ModelId::ArcFace,
            detector_backend: DetectorBackend::Scrfd,
            detection_policy: DetectionPolicy::Strict,
            metric: DistanceMetric::Cosine,
            threshold: None,
            fetch_timeout_secs: 30,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            downsample_max_side: None,
            intra_threads: 1,
        }
    }
}

/// On-disk form; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    model_dir: Option<PathBuf>,
    model: Option<ModelId>,
    detector_backend: Option<DetectorBackend>,
    detection_policy: Option<DetectionPolicy>,
    metric: Option<DistanceMetric>,
    threshold: Option<f32>,
    fetch_timeout_secs: Option<u64>,
    max_image_bytes: Option<usize>,
    downsample_max_side: Option<u32>,
    intra_threads: Option<usize>,
}

impl EngineConfig {
    /// Load configuration from an optional TOML file and the process environment.
    ///
    /// Without `path`, the file named by `FACEVERIFY_CONFIG` is used if set.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(path) = path {
            config.merge_file(&path)?;
        }
        config.merge_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document and overlay its keys.
    pub fn merge_toml(&mut self, source: &str, path: &Path) -> Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(source).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.detector_backend {
            self.detector_backend = v;
        }
        if let Some(v) = file.detection_policy {
            self.detection_policy = v;
        }
        if let Some(v) = file.metric {
            self.metric = v;
        }
        if file.threshold.is_some() {
            self.threshold = file.threshold;
        }
        if let Some(v) = file.fetch_timeout_secs {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = file.max_image_bytes {
            self.max_image_bytes = v;
        }
        if file.downsample_max_side.is_some() {
            self.downsample_max_side = file.downsample_max_side;
        }
        if let Some(v) = file.intra_threads {
            self.intra_threads = v;
        }
        Ok(())
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_toml(&source, path)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(())
    }

    /// Overlay `FACEVERIFY_*` variables read through `lookup`.
    ///
    /// Unparsable values are logged and ignored.
    pub fn merge_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEVERIFY_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        env_parse(&lookup, "FACEVERIFY_MODEL", &mut self.model);
        env_parse(&lookup, "FACEVERIFY_DETECTOR_BACKEND", &mut self.detector_backend);
        env_parse(&lookup, "FACEVERIFY_DETECTION_POLICY", &mut self.detection_policy);
        env_parse(&lookup, "FACEVERIFY_METRIC", &mut self.metric);
        let mut threshold = f32::NAN;
        if env_parse(&lookup, "FACEVERIFY_THRESHOLD", &mut threshold) {
            self.threshold = Some(threshold);
        }
        env_parse(&lookup, "FACEVERIFY_FETCH_TIMEOUT_SECS", &mut self.fetch_timeout_secs);
        env_parse(&lookup, "FACEVERIFY_MAX_IMAGE_BYTES", &mut self.max_image_bytes);
        let mut side = 0u32;
        if env_parse(&lookup, "FACEVERIFY_DOWNSAMPLE_MAX_SIDE", &mut side) {
            self.downsample_max_side = (side > 0).then_some(side);
        }
        env_parse(&lookup, "FACEVERIFY_INTRA_THREADS", &mut self.intra_threads);
    }

    /// Default per-request settings derived from this config.
    pub fn verification(&self) -> Result<VerificationConfig, ConfigError> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "fetch_timeout_secs",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let calibration = match self.threshold {
            Some(threshold) => Calibration::new(self.metric, threshold)?,
            None => Calibration::default_for(self.model, self.metric),
        };
        Ok(VerificationConfig {
            detection_policy: self.detection_policy,
            calibration,
            model: self.model,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            downsample_max_side: self.downsample_max_side,
        })
    }

    pub fn embedder_options(&self) -> EmbedderOptions {
        EmbedderOptions {
            model_dir: self.model_dir.clone(),
            model: self.model,
            detector_backend: self.detector_backend,
            intra_threads: self.intra_threads.max(1),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_bytes: self.max_image_bytes,
            ..FetchOptions::default()
        }
    }
}

/// Settings that govern a single verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationConfig {
    pub detection_policy: DetectionPolicy,
    pub calibration: Calibration,
    pub model: ModelId,
    pub fetch_timeout: Duration,
    pub downsample_max_side: Option<u32>,
}

impl VerificationConfig {
    /// Apply request overrides.
    ///
    /// Changing the metric or model without an explicit threshold re-derives
    /// the threshold from the calibration table.
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let model = match &overrides.model {
            Some(selection) => selection.resolve()?,
            None => self.model,
        };
        let metric = overrides.metric.unwrap_or(self.calibration.metric);

        let calibration = match overrides.threshold {
            Some(threshold) => Calibration::new(metric, threshold)?,
            None if metric != self.calibration.metric || model != self.model => {
                Calibration::default_for(model, metric)
            }
            None => self.calibration,
        };

        let fetch_timeout = match overrides.timeout_ms {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "timeout_ms",
                    value: "0".into(),
                    reason: "must be at least 1".into(),
                })
            }
            Some(ms) => Duration::from_millis(ms),
            None => self.fetch_timeout,
        };

        Ok(Self {
            detection_policy: overrides.detection_policy.unwrap_or(self.detection_policy),
            calibration,
            model,
            fetch_timeout,
            downsample_max_side: self.downsample_max_side,
        })
    }

    /// Reject settings the loaded embedder cannot honor.
    pub fn validate_for(&self, loaded: ModelId) -> Result<(), ConfigError> {
        if self.model != loaded {
            return Err(ConfigError::ModelNotLoaded {
                requested: self.model,
                loaded,
            });
        }
        Calibration::new(self.calibration.metric, self.calibration.threshold)?;
        Ok(())
    }

    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            timeout: self.fetch_timeout,
            downsample_max_side: self.downsample_max_side,
        }
    }
}

/// `$XDG_DATA_HOME/faceverify/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceverify/models")
}

/// Parse `key` into `slot` if set. Returns whether `slot` was updated.
fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> bool
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.parse() {
        Ok(value) => {
            *slot = value;
            true
        }
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring unparsable environment value");
            false
        }
    }
}
