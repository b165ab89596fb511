use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("not a decodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// A decoded RGB8 frame plus the dimensions it had before downsampling.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub source_width: u32,
    pub source_height: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Factor that maps coordinates in `image` back to the source image.
    pub fn source_scale(&self) -> f32 {
        if self.image.width() == 0 {
            return 1.0;
        }
        self.source_width as f32 / self.image.width() as f32
    }
}

/// Decode bytes into an RGB8 frame.
///
/// With `downsample = Some(max_side)`, images larger than `max_side` on
/// either axis are shrunk to fit, keeping their aspect ratio. Smaller images
/// are left alone.
pub fn decode(bytes: &[u8], downsample: Option<u32>) -> Result<Frame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded = image::load_from_memory(bytes)?;
    let (source_width, source_height) = (decoded.width(), decoded.height());

    let decoded = match downsample {
        Some(max_side) if max_side > 0 && source_width.max(source_height) > max_side => {
            tracing::debug!(source_width, source_height, max_side, "downsampling frame");
            decoded.resize(max_side, max_side, FilterType::Triangle)
        }
        _ => decoded,
    };

    Ok(Frame {
        image: decoded.to_rgb8(),
        source_width,
        source_height,
    })
}
