// pixpack/src/processors/loader.rs
use crate::core::{MimeType, TransformError};
use image::{DynamicImage, GenericImageView, ImageFormat};

#[derive(Debug, Clone)]
pub struct Loader {
    max_dimensions: Option<(u32, u32)>,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            max_dimensions: Some((100_000, 100_000)),
        }
    }

    /// Identifies the buffer from its magic bytes. Only JPEG and PNG pass.
    pub fn sniff(&self, data: &[u8]) -> Result<MimeType, TransformError> {
        if data.is_empty() {
            return Err(TransformError::UnsupportedInput("empty buffer".to_string()));
        }

        match image::guess_format(data) {
            Ok(ImageFormat::Jpeg) => Ok(MimeType::Jpeg),
            Ok(ImageFormat::Png) => Ok(MimeType::Png),
            Ok(other) => Err(TransformError::UnsupportedInput(format!(
                "{:?} is not an accepted input format",
                other
            ))),
            Err(e) => Err(TransformError::UnsupportedInput(e.to_string())),
        }
    }

    pub fn load_from_bytes(&self, data: &[u8]) -> Result<DynamicImage, TransformError> {
        let format = match self.sniff(data)? {
            MimeType::Jpeg => ImageFormat::Jpeg,
            MimeType::Png => ImageFormat::Png,
        };

        let image = image::load_from_memory_with_format(data, format)
            .map_err(|e| TransformError::DecodeFailed(e.to_string()))?;

        let (width, height) = image.dimensions();
        if let Some((max_w, max_h)) = self.max_dimensions {
            if width > max_w || height > max_h {
                return Err(TransformError::UnsupportedInput(format!(
                    "Image dimensions {}x{} exceed maximum {}x{}",
                    width, height, max_w, max_h
                )));
            }
        }

        log::debug!(
            "Loaded image: {}x{} pixels, color: {:?}",
            width,
            height,
            image.color()
        );

        Ok(image)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
