use crate::config::ConfigError;
use faceverify_core::{DetectionPolicy, DistanceMetric, ModelId};
use serde::{Deserialize, Serialize};

/// A verification request as received from the entry surface.
///
/// Missing locators deserialize as empty strings and are rejected during
/// validation, so a malformed request still produces a result payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub registered_url: String,
    #[serde(default)]
    pub captured_url: String,
    #[serde(flatten)]
    pub overrides: ConfigOverrides,
}

/// Optional per-request settings layered over the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_policy: Option<DetectionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<DistanceMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Model choice: one id for both images, or one per image.
///
/// The per-image form exists so callers can state what each stored image was
/// enrolled with; the two must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSelection {
    Single(ModelId),
    PerImage { registered: ModelId, captured: ModelId },
}

impl ModelSelection {
    pub fn resolve(self) -> Result<ModelId, ConfigError> {
        match self {
            ModelSelection::Single(model) => Ok(model),
            ModelSelection::PerImage {
                registered,
                captured,
            } if registered == captured => Ok(registered),
            ModelSelection::PerImage {
                registered,
                captured,
            } => Err(ConfigError::ModelMismatch {
                registered,
                captured,
            }),
        }
    }
}
