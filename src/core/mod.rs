// pixpack/src/core/mod.rs
pub mod processor;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

pub use processor::ImageTransformer;

/// Target extension for every archive entry.
pub const OUTPUT_EXTENSION: &str = "webp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeAlgorithm {
    Nearest,
    Bilinear,
    Bicubic,
    #[default]
    Lanczos3,
}

/// What the orchestrator does when a single item fails to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure, skip the item and keep going.
    #[default]
    Isolate,
    /// Cancel the remaining items and fail the batch.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
    Jpeg,
    Png,
}

impl MimeType {
    /// Maps an upload's declared content type. Anything other than JPEG or PNG is `None`.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// One uploaded file, owned by its batch until it has been transformed.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub id: usize,
    pub original_name: String,
    pub mime_type: MimeType,
    pub raw_bytes: Bytes,
}

impl UploadedImage {
    pub fn new(
        id: usize,
        original_name: impl Into<String>,
        mime_type: MimeType,
        raw_bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            original_name: original_name.into(),
            mime_type,
            raw_bytes: raw_bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// `0` disables resizing; the image is only re-encoded.
    pub max_width: u32,
}

impl TransformOptions {
    pub fn new(max_width: u32) -> Self {
        Self { max_width }
    }

    pub fn resizes(&self) -> bool {
        self.max_width > 0
    }
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub id: usize,
    pub output_name: String,
    pub encoded_bytes: Vec<u8>,
}

/// Published once per item that made it into the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "file")]
    pub file_name: String,
    #[serde(rename = "processedFiles")]
    pub processed_count: usize,
    #[serde(rename = "totalFiles")]
    pub total_count: usize,
}

/// Lifecycle of one batch: `Idle` until the first item is dispatched, then
/// `Running` until the archive is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub file_name: String,
    pub reason: String,
}

/// Terminal summary of one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub state: BatchState,
    pub total_count: usize,
    pub processed_count: usize,
    /// Archive entry names in the order they were appended.
    pub entries: Vec<String>,
    pub skipped: Vec<SkippedItem>,
    pub total_size_before: u64,
    pub total_size_after: u64,
    /// Most transforms that were running at the same moment.
    pub peak_in_flight: usize,
    /// Set when `state` is `Failed`.
    pub failure: Option<PipelineError>,
}

impl BatchReport {
    pub fn is_completed(&self) -> bool {
        self.state == BatchState::Completed
    }

    pub fn savings_percent(&self) -> f64 {
        if self.total_size_before == 0 {
            return 0.0;
        }

        let savings = (self.total_size_before as f64 - self.total_size_after as f64)
            / self.total_size_before as f64
            * 100.0;
        savings.clamp(0.0, 100.0)
    }

    /// Converts a `Failed` report into its error.
    pub fn into_result(self) -> Result<BatchReport> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on transforms holding decoded or encoded buffers at once.
    pub max_in_flight: usize,
    /// Codec thread pool size, `0` for the rayon default.
    pub threads: usize,
    pub failure_policy: FailurePolicy,
    pub algorithm: ResizeAlgorithm,
    pub quality: u8,
    pub max_files: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            threads: 0,
            failure_policy: FailurePolicy::Isolate,
            algorithm: ResizeAlgorithm::Lanczos3,
            quality: 75,
            max_files: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        if self.quality == 0 || self.quality > 100 {
            return Err(PipelineError::InvalidConfig(
                "Quality must be between 1 and 100".to_string(),
            ));
        }

        if self.max_files == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_files must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Duplicate archive entry: {0}")]
    DuplicateName(String),

    #[error("Archive write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("Batch has not started")]
    NotStarted,

    #[error("Archive already finalized")]
    Finalized,

    #[error("Archive finalize failed: {0}")]
    Finalize(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No files uploaded!")]
    EmptyBatch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Batch aborted on {file}: {source}")]
    Aborted {
        file: String,
        #[source]
        source: TransformError,
    },

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
