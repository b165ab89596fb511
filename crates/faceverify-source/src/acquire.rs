use crate::fetch::{FetchError, ImageFetcher};
use crate::frame::{decode, DecodeError, Frame};
use crate::reference::ImageReference;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("decode task did not complete: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Upper bound on the fetch, connection included.
    pub timeout: Duration,
    pub downsample_max_side: Option<u32>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            downsample_max_side: None,
        }
    }
}

/// Fetch and decode one image.
///
/// Makes a single fetch attempt bounded by `options.timeout`; decoding runs on
/// the blocking pool.
pub async fn acquire(
    fetcher: &dyn ImageFetcher,
    reference: &ImageReference,
    options: &AcquireOptions,
) -> Result<Frame, AcquireError> {
    let bytes = tokio::time::timeout(options.timeout, fetcher.fetch(reference))
        .await
        .map_err(|_| AcquireError::Timeout(options.timeout))??;

    let downsample = options.downsample_max_side;
    let frame = tokio::task::spawn_blocking(move || decode(&bytes, downsample))
        .await
        .map_err(|e| AcquireError::Interrupted(e.to_string()))??;

    tracing::debug!(
        %reference,
        width = frame.width(),
        height = frame.height(),
        "acquired image"
    );
    Ok(frame)
}
