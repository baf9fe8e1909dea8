// pixpack/src/processors/compressor.rs
use crate::core::TransformError;
use image::DynamicImage;
use webp::{Encoder, WebPConfig};

/// libwebp `method`: 0 is fastest, 6 packs smallest.
const MAX_EFFORT: i32 = 6;

#[derive(Debug, Clone)]
pub struct Compressor {
    quality: u8,
    method: i32,
}

impl Compressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            method: MAX_EFFORT,
        }
    }

    /// Lossy WebP at the configured quality.
    pub fn encode_webp(&self, image: &DynamicImage) -> Result<Vec<u8>, TransformError> {
        // libwebp only takes 8-bit RGB or RGBA.
        let converted;
        let source = match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
            _ if image.color().has_alpha() => {
                converted = DynamicImage::ImageRgba8(image.to_rgba8());
                &converted
            }
            _ => {
                converted = DynamicImage::ImageRgb8(image.to_rgb8());
                &converted
            }
        };

        let encoder =
            Encoder::from_image(source).map_err(|e| TransformError::EncodeFailed(e.to_string()))?;

        let mut config = WebPConfig::new().map_err(|_| {
            TransformError::EncodeFailed("Failed to initialise WebP config".to_string())
        })?;
        config.lossless = 0;
        config.quality = self.quality as f32;
        config.method = self.method;

        let memory = encoder
            .encode_advanced(&config)
            .map_err(|e| TransformError::EncodeFailed(format!("{:?}", e)))?;

        log::debug!(
            "Encoded {}x{} image to WebP, quality: {}, {} bytes",
            source.width(),
            source.height(),
            self.quality,
            memory.len()
        );

        Ok(memory.to_vec())
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(75)
    }
}
