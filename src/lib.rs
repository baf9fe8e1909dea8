pub mod archive;
pub mod cli;
mod core;
mod processors;
pub mod progress;
pub mod server;
mod utils;

pub use crate::archive::{ArchiveStreamer, ChannelSink};
pub use crate::cli::{Algorithm, Cli, Commands, PipelineArgs, Policy};
pub use crate::core::{
    ArchiveError, BatchReport, BatchState, FailurePolicy, ImageTransformer, MimeType,
    PipelineConfig, PipelineError, ProgressEvent, ResizeAlgorithm, Result, SkippedItem,
    TransformError, TransformOptions, TransformResult, UploadedImage, OUTPUT_EXTENSION,
};
pub use crate::processors::{
    collect_batch, collect_uploads, BatchPipeline, Compressor, Loader, Resizer,
};
pub use crate::progress::{ProgressBroadcaster, Subscriber};
pub use crate::server::{router, serve, ApiError, AppState, ServerConfig};
pub use crate::utils::{dedupe_name, format_file_size, output_name};

pub mod prelude {
    pub use crate::{
        BatchPipeline, FailurePolicy, ImageTransformer, PipelineConfig, ProgressBroadcaster,
        TransformOptions, UploadedImage,
    };
}

// Re-export commonly used types
pub use image::DynamicImage;
