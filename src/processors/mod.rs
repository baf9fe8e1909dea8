// pixpack/src/processors/mod.rs
mod batch;
mod compressor;
mod loader;
mod resizer;

pub use batch::{collect_batch, collect_uploads, BatchPipeline};
pub use compressor::Compressor;
pub use loader::Loader;
pub use resizer::Resizer;
