//! Image decoding with content-based format detection.

use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;

use crate::error::ImageError;

use super::validate::Validator;

/// Largest accepted width or height.
pub const DEFAULT_MAX_DIMENSION: u32 = 20_000;

/// Image decoder with a dimension limit.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    max_dimension: u32,
}

/// Result of decoding an image.
pub struct DecodedImage {
    /// The decoded image data
    pub image: DynamicImage,
    /// Detected image format
    pub format: ImageFormat,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImageDecoder {
    /// Create a new decoder with the given dimension limit.
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Structural validation: recognizable signature, detectable format,
    /// parseable header. Pixel data is not decoded.
    pub fn inspect(&self, bytes: &[u8]) -> Result<ImageFormat, ImageError> {
        Validator::check(bytes)?;
        let reader = Self::reader(bytes)?;
        let format = reader.format().ok_or(ImageError::UnsupportedFormat)?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        self.check_dimensions(width, height)?;
        tracing::debug!("'{}' image loaded: {}x{}", format_extension(format), width, height);
        Ok(format)
    }

    /// Fully decode an image on the blocking thread pool.
    pub async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedImage, ImageError> {
        let decoder = self.clone();
        tokio::task::spawn_blocking(move || decoder.decode_sync(&bytes))
            .await
            .map_err(|e| ImageError::Decode(format!("Task join error: {}", e)))?
    }

    /// Synchronous decode (runs in spawn_blocking).
    pub fn decode_sync(&self, bytes: &[u8]) -> Result<DecodedImage, ImageError> {
        Validator::check(bytes)?;
        let reader = Self::reader(bytes)?;
        let format = reader.format().ok_or(ImageError::UnsupportedFormat)?;
        let image = reader
            .decode()
            .map_err(|e| ImageError::Decode(e.to_string()))?;

        let (width, height) = image.dimensions();
        self.check_dimensions(width, height)?;
        Ok(DecodedImage {
            image,
            format,
            width,
            height,
        })
    }

    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, ImageError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::Decode(format!("Cannot detect image format: {}", e)))
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::Decode(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ImageError::TooLarge {
                width,
                height,
                max_dim: self.max_dimension,
            });
        }
        Ok(())
    }
}

/// File extension for an image format.
pub fn format_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        ImageFormat::Pnm => "pnm",
        ImageFormat::Avif => "avif",
        _ => "img",
    }
}

/// Encode an image to bytes in the given format (test images, demos).
pub fn encode_image(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .map_err(|e| ImageError::Decode(e.to_string()))?;
    Ok(buf.into_inner())
}
