// pixpack/src/core/processor.rs
use super::{PipelineConfig, ResizeAlgorithm, TransformError, TransformOptions, TransformResult, UploadedImage};
use crate::processors::{Compressor, Loader, Resizer};
use crate::utils::output_name;

/// Resize-then-encode for a single buffer. Holds no per-call state, so one
/// instance is shared by every worker thread.
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    loader: Loader,
    resizer: Resizer,
    compressor: Compressor,
}

impl ImageTransformer {
    pub fn new(algorithm: ResizeAlgorithm, quality: u8) -> Self {
        Self {
            loader: Loader::new(),
            resizer: Resizer::new(algorithm),
            compressor: Compressor::new(quality),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.algorithm, config.quality)
    }

    pub fn transform(
        &self,
        bytes: &[u8],
        options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError> {
        let mut image = self.loader.load_from_bytes(bytes)?;

        if options.resizes() {
            image = self.resizer.fit_width(image, options.max_width);
            image = self.resizer.trim(image);
        }

        let encoded = self.compressor.encode_webp(&image)?;

        log::debug!(
            "Transformed {} bytes into {} bytes ({}x{})",
            bytes.len(),
            encoded.len(),
            image.width(),
            image.height()
        );

        Ok(encoded)
    }

    /// Transforms an upload and names the result after it. The name is not
    /// de-duplicated here; that is the orchestrator's job.
    pub fn transform_image(
        &self,
        upload: &UploadedImage,
        options: &TransformOptions,
    ) -> Result<TransformResult, TransformError> {
        let encoded_bytes = self.transform(&upload.raw_bytes, options)?;

        Ok(TransformResult {
            id: upload.id,
            output_name: output_name(&upload.original_name),
            encoded_bytes,
        })
    }
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
