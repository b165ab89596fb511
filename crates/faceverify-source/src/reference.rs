use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,
    #[error("invalid image URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported URL scheme '{0}' (expected http, https or file)")]
    UnsupportedScheme(String),
}

/// Where an image lives: a remote URL or a local file.
///
/// Built only through [`ImageReference::parse`], so an empty locator never
/// reaches a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Remote(Url),
    Local(PathBuf),
}

impl ImageReference {
    /// Parse a locator string.
    ///
    /// `http://` and `https://` become [`ImageReference::Remote`]; `file://`
    /// URLs and anything without a scheme are local paths.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let Some((scheme, _)) = raw.split_once("://") else {
            return Ok(ImageReference::Local(PathBuf::from(raw)));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Url::parse(raw).map(ImageReference::Remote).map_err(|e| {
                ReferenceError::InvalidUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                }
            }),
            "file" => {
                let url = Url::parse(raw).map_err(|e| ReferenceError::InvalidUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
                url.to_file_path()
                    .map(ImageReference::Local)
                    .map_err(|()| ReferenceError::InvalidUrl {
                        url: raw.to_string(),
                        reason: "not an absolute local path".to_string(),
                    })
            }
            other => Err(ReferenceError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageReference::Remote(_))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageReference::Remote(url) => write!(f, "{url}"),
            ImageReference::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
