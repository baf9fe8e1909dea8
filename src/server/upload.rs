// pixpack/src/server/upload.rs
use super::{ApiError, AppState};
use crate::archive::ChannelSink;
use crate::core::{
    BatchReport, MimeType, PipelineError, SkippedItem, TransformOptions, UploadedImage,
};
use axum::{
    body::Body,
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use std::io::{self, BufWriter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const IMAGES_FIELD: &str = "images";
const MAX_WIDTH_FIELD: &str = "maxWidth";
const ARCHIVE_FILE_NAME: &str = "optimized_images.zip";

/// Size of each body chunk handed to the client.
const CHUNK_SIZE: usize = 64 * 1024;
const BODY_CHANNEL_CAPACITY: usize = 16;
/// Chunks held back before the response is committed. An archive with no
/// entries is always a single chunk, so a batch that produced nothing is
/// still decided before anything is sent.
const COMMIT_AFTER_CHUNKS: usize = 2;

type Chunk = io::Result<Bytes>;

struct BatchForm {
    images: Vec<UploadedImage>,
    max_width: u32,
}

/// `POST /mix`: transforms the uploaded images and streams them back as a zip.
pub(super) async fn submit_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart, state.pipeline.config().max_files).await?;
    if form.images.is_empty() {
        return Err(PipelineError::EmptyBatch.into());
    }

    let options = TransformOptions::new(form.max_width);
    let (sink, mut body_rx) = ChannelSink::channel(BODY_CHANNEL_CAPACITY);
    let abort_tx = sink.sender();
    let writer = BufWriter::with_capacity(CHUNK_SIZE, sink);

    let pipeline = Arc::clone(&state.pipeline);
    let mut batch =
        tokio::spawn(async move { pipeline.run(form.images, options, writer).await });

    let mut held: Vec<Chunk> = Vec::with_capacity(COMMIT_AFTER_CHUNKS);
    while held.len() < COMMIT_AFTER_CHUNKS {
        tokio::select! {
            biased;
            joined = &mut batch => {
                let report = settle(joined).map_err(ApiError::processing)?;
                if report.processed_count == 0 {
                    return Err(ApiError::processing(describe_skipped(&report.skipped)));
                }

                drop(abort_tx);
                return Ok(zip_response(held, body_rx));
            }
            chunk = body_rx.recv() => match chunk {
                Some(chunk) => held.push(chunk),
                // Unreachable while `abort_tx` is alive.
                None => break,
            },
        }
    }

    log::debug!("Archive stream committed");
    tokio::spawn(watch_committed(batch, abort_tx));

    Ok(zip_response(held, body_rx))
}

async fn read_form(mut multipart: Multipart, max_files: usize) -> Result<BatchForm, ApiError> {
    let mut images = Vec::new();
    let mut max_width = 0;
    let mut received = 0;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            IMAGES_FIELD => {
                received += 1;
                if received > max_files {
                    return Err(ApiError::bad_request("Too many files uploaded!"));
                }

                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await?;

                match MimeType::from_content_type(&content_type) {
                    Some(mime_type) => images.push(UploadedImage::new(
                        images.len(),
                        file_name,
                        mime_type,
                        data,
                    )),
                    None => log::warn!(
                        "Dropping {} with unsupported type '{}'",
                        file_name,
                        content_type
                    ),
                }
            }
            MAX_WIDTH_FIELD => {
                let value = field.text().await?;
                max_width = parse_max_width(&value)?;
            }
            other => log::debug!("Ignoring form field '{}'", other),
        }
    }

    log::info!(
        "Received {} images ({} accepted), max width {}",
        received,
        images.len(),
        max_width
    );

    Ok(BatchForm { images, max_width })
}

fn parse_max_width(value: &str) -> Result<u32, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }

    value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid maxWidth: '{}'", value)))
}

/// Folds the batch task's outcome into a report, or the reason it failed.
fn settle(
    joined: Result<crate::core::Result<BatchReport>, tokio::task::JoinError>,
) -> Result<BatchReport, String> {
    match joined {
        Ok(Ok(report)) => match report.failure {
            Some(failure) => Err(failure.to_string()),
            None => Ok(report),
        },
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("Batch task failed: {}", e)),
    }
}

fn describe_skipped(skipped: &[SkippedItem]) -> String {
    let reasons: Vec<String> = skipped
        .iter()
        .map(|item| format!("{}: {}", item.file_name, item.reason))
        .collect();
    format!("No image could be processed ({})", reasons.join("; "))
}

/// Once bytes are out, a failure can only cut the stream short.
async fn watch_committed(
    batch: JoinHandle<crate::core::Result<BatchReport>>,
    abort_tx: mpsc::Sender<Chunk>,
) {
    if let Err(reason) = settle(batch.await) {
        log::error!("Aborting archive stream: {}", reason);
        let _ = abort_tx.send(Err(io::Error::other(reason))).await;
    }
}

fn zip_response(held: Vec<Chunk>, rest: mpsc::Receiver<Chunk>) -> Response {
    let body = futures::stream::iter(held).chain(ReceiverStream::new(rest));
    let disposition = format!("attachment; filename={}", ARCHIVE_FILE_NAME);

    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
