use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use pixpack::{
    collect_batch, format_file_size, AppState, BatchPipeline, Cli, Commands, PipelineConfig,
    ProgressBroadcaster, ServerConfig, TransformOptions,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let server_config = cli.command.server_config();
    match cli.command {
        Commands::Serve { pipeline, .. } => {
            // `server_config` is always set for `serve`.
            let config = server_config.unwrap_or_default();
            run_server(config, pipeline.into()).await?;
        }
        Commands::Pack {
            input,
            output,
            max_width,
            recursive,
            pipeline,
        } => {
            run_pack(input, output, max_width, recursive, pipeline.into()).await?;
        }
    }

    Ok(())
}

async fn run_server(config: ServerConfig, pipeline: PipelineConfig) -> anyhow::Result<()> {
    let pipeline = BatchPipeline::new(pipeline, ProgressBroadcaster::new())?;
    let state = AppState::new(pipeline);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    let cancel = CancellationToken::new();
    let server = tokio::spawn(pixpack::serve(
        listener,
        state,
        config.max_upload_bytes,
        cancel.clone(),
    ));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    server.await??;
    Ok(())
}

async fn run_pack(
    input: PathBuf,
    output: PathBuf,
    max_width: u32,
    recursive: bool,
    config: PipelineConfig,
) -> anyhow::Result<()> {
    let uploads = collect_batch(&input, recursive, config.max_files)?;

    let file = File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let broadcaster = ProgressBroadcaster::new();
    let pipeline = BatchPipeline::new(config, broadcaster.clone())?;

    let bar = ProgressBar::new(uploads.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut subscriber = broadcaster.subscribe();
    let progress = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while let Some(event) = subscriber.recv().await {
                bar.set_position(event.processed_count as u64);
                bar.set_message(event.file_name);
            }
        })
    };

    let report = pipeline
        .run(uploads, TransformOptions::new(max_width), BufWriter::new(file))
        .await;
    broadcaster.close();
    let _ = progress.await;
    bar.finish_and_clear();

    let report = report?;
    for item in &report.skipped {
        println!("Skipped {}: {}", item.file_name, item.reason);
    }
    let report = report.into_result()?;

    println!(
        "Packed {}/{} images into {} ({} -> {}, {:.1}% smaller)",
        report.processed_count,
        report.total_count,
        output.display(),
        format_file_size(report.total_size_before),
        format_file_size(report.total_size_after),
        report.savings_percent()
    );

    Ok(())
}
