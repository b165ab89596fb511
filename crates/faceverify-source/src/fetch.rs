//! Retrieval of raw image bytes.
//!
//! Fetchers make exactly one attempt. Time limits for a whole acquisition are
//! applied by the caller (see [`crate::acquire`]); dropping the returned future
//! aborts an in-flight request.

use crate::reference::ImageReference;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default cap on the size of a single image.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{location} exceeds the {limit}-byte image limit")]
    TooLarge { location: String, limit: usize },
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Async capability that turns an [`ImageReference`] into bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_bytes: usize,
    pub connect_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Fetches `http`/`https` images with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .user_agent(concat!("faceverify/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            max_bytes: options.max_bytes,
        })
    }

    pub async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let too_large = || FetchError::TooLarge {
            location: url.to_string(),
            limit: self.max_bytes,
        };

        let mut response = self.client.get(url.clone()).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(http_err)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(%url, bytes = body.len(), "fetched remote image");
        Ok(body)
    }
}

/// Reads images from the local filesystem.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    max_bytes: usize,
}

impl FileFetcher {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
        let io_err = |source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };

        let metadata = tokio::fs::metadata(path).await.map_err(io_err)?;
        if metadata.len() > self.max_bytes as u64 {
            return Err(FetchError::TooLarge {
                location: path.display().to_string(),
                limit: self.max_bytes,
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "read local image");
        Ok(bytes)
    }
}

/// Dispatches each reference to the HTTP or file fetcher.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl SourceFetcher {
    pub fn new(options: &FetchOptions) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(options)?,
            file: FileFetcher::new(options.max_bytes),
        })
    }
}

#[async_trait]
impl ImageFetcher for SourceFetcher {
    async fn fetch(&self, reference: &ImageReference) -> Result<Vec<u8>, FetchError> {
        match reference {
            ImageReference::Remote(url) => self.http.get(url).await,
            ImageReference::Local(path) => self.file.read(path).await,
        }
    }
}
