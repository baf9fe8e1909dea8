// pixpack/src/cli.rs
use crate::core::{FailurePolicy, PipelineConfig, ResizeAlgorithm};
use crate::server::{ServerConfig, DEFAULT_MAX_UPLOAD_BYTES};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pixpack")]
#[command(author, version, about = "Batch image resizer and WebP packer", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service (POST /mix, GET /progress)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8081")]
        bind: SocketAddr,

        /// Largest accepted request body in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
        max_upload_bytes: usize,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Pack a directory of JPEG/PNG images into a zip of WebP files
    Pack {
        /// Input directory
        input: PathBuf,

        /// Output zip file
        #[arg(short, long, default_value = "optimized_images.zip")]
        output: PathBuf,

        /// Maximum output width (0 = keep original width)
        #[arg(short = 'w', long, default_value_t = 0)]
        max_width: u32,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

/// Knobs shared by both subcommands.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Images transformed concurrently
    #[arg(long, default_value_t = 8)]
    pub max_in_flight: usize,

    /// Codec threads (0 = number of CPUs)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// What to do when one image fails
    #[arg(long, value_enum, default_value_t = Policy::Isolate)]
    pub on_error: Policy,

    /// Resize algorithm
    #[arg(short, long, value_enum, default_value_t = Algorithm::Lanczos3)]
    pub algorithm: Algorithm,

    /// WebP quality (1-100)
    #[arg(short, long, default_value_t = 75)]
    pub quality: u8,

    /// Most images accepted in one batch
    #[arg(long, default_value_t = 1000)]
    pub max_files: usize,
}

impl From<PipelineArgs> for PipelineConfig {
    fn from(args: PipelineArgs) -> Self {
        Self {
            max_in_flight: args.max_in_flight,
            threads: args.threads,
            failure_policy: args.on_error.into(),
            algorithm: args.algorithm.into(),
            quality: args.quality,
            max_files: args.max_files,
        }
    }
}

impl Commands {
    pub fn server_config(&self) -> Option<ServerConfig> {
        match self {
            Commands::Serve {
                bind,
                max_upload_bytes,
                ..
            } => Some(ServerConfig {
                bind: *bind,
                max_upload_bytes: *max_upload_bytes,
            }),
            Commands::Pack { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Algorithm {
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl From<Algorithm> for ResizeAlgorithm {
    fn from(algo: Algorithm) -> Self {
        match algo {
            Algorithm::Nearest => ResizeAlgorithm::Nearest,
            Algorithm::Bilinear => ResizeAlgorithm::Bilinear,
            Algorithm::Bicubic => ResizeAlgorithm::Bicubic,
            Algorithm::Lanczos3 => ResizeAlgorithm::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Policy {
    /// Skip the failed image and keep going
    Isolate,
    /// Stop the batch
    Abort,
}

impl From<Policy> for FailurePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Isolate => FailurePolicy::Isolate,
            Policy::Abort => FailurePolicy::Abort,
        }
    }
}
