//! faceverify-source: Image acquisition.
//!
//! Parses image locators, fetches bytes over HTTP or from disk, and decodes
//! them into RGB8 frames ready for embedding.

pub mod acquire;
pub mod fetch;
pub mod frame;
pub mod reference;

pub use acquire::{acquire, AcquireError, AcquireOptions};
pub use fetch::{FetchError, FetchOptions, FileFetcher, HttpFetcher, ImageFetcher, SourceFetcher};
pub use frame::{decode, DecodeError, Frame};
pub use reference::{ImageReference, ReferenceError};
