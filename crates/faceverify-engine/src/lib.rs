//! faceverify-engine: Pairwise face verification.
//!
//! Takes two image locators, acquires and embeds both concurrently, and
//! returns a [`VerificationResult`] with the match verdict, the distance, or
//! a categorized error.

pub mod config;
pub mod engine;
pub mod request;
pub mod result;

pub use config::{ConfigError, EngineConfig, VerificationConfig};
pub use engine::{Engine, EngineError, VerifyError};
pub use request::{ConfigOverrides, ModelSelection, VerifyRequest};
pub use result::{ErrorKind, FacialAreas, ImageRole, ResultMetadata, VerificationResult};
