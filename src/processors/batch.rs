// pixpack/src/processors/batch.rs
use crate::archive::ArchiveStreamer;
use crate::core::{
    ArchiveError, BatchReport, BatchState, FailurePolicy, ImageTransformer, MimeType,
    PipelineConfig, PipelineError, ProgressEvent, Result, SkippedItem, TransformError,
    TransformOptions, TransformResult, UploadedImage,
};
use crate::progress::ProgressBroadcaster;
use crate::utils::{dedupe_name, format_file_size};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Runs batches: transforms on a bounded rayon pool, appends each finished
/// image to the batch's archive and publishes progress as it goes.
///
/// Entries and events follow completion order, which differs between runs of
/// the same input.
pub struct BatchPipeline {
    config: PipelineConfig,
    transformer: Arc<ImageTransformer>,
    thread_pool: Arc<rayon::ThreadPool>,
    broadcaster: ProgressBroadcaster,
}

/// Everything a batch mutates after a transform completes. One lock guards
/// the archive and the counter so appends and events stay in step.
struct BatchArchive<W: Write> {
    archive: ArchiveStreamer<W>,
    state: BatchState,
    total_count: usize,
    processed_count: usize,
    entries: Vec<String>,
    total_size_after: u64,
}

impl<W: Write> BatchArchive<W> {
    fn new(sink: W, total_count: usize) -> Self {
        Self {
            archive: ArchiveStreamer::open(sink),
            state: BatchState::Idle,
            total_count,
            processed_count: 0,
            entries: Vec::with_capacity(total_count),
            total_size_after: 0,
        }
    }

    fn begin(&mut self) {
        if self.state == BatchState::Idle {
            self.state = BatchState::Running;
        }
    }

    fn commit(
        &mut self,
        result: TransformResult,
        file_name: &str,
        broadcaster: &ProgressBroadcaster,
    ) -> std::result::Result<(), ArchiveError> {
        match self.state {
            BatchState::Running => {}
            BatchState::Idle => return Err(ArchiveError::NotStarted),
            BatchState::Completed | BatchState::Failed => return Err(ArchiveError::Finalized),
        }

        let name = dedupe_name(&result.output_name, |n| self.archive.contains(n));
        self.archive.append(&name, &result.encoded_bytes)?;

        self.processed_count += 1;
        self.total_size_after += result.encoded_bytes.len() as u64;
        self.entries.push(name);

        broadcaster.publish(ProgressEvent {
            file_name: file_name.to_string(),
            processed_count: self.processed_count,
            total_count: self.total_count,
        });

        Ok(())
    }

    /// Finalizes the archive and settles the terminal state. A finalize error
    /// fails the batch even if every item went in.
    fn finish(&mut self, failed: bool) -> std::result::Result<(), ArchiveError> {
        let finalized = self.archive.finalize();
        self.state = if failed || finalized.is_err() {
            BatchState::Failed
        } else {
            BatchState::Completed
        };
        finalized
    }
}

/// Number of transforms currently on the codec pool, and the most seen at once.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ItemOutcome {
    Appended { size_before: u64 },
    TransformFailed { file_name: String, error: TransformError },
    ArchiveFailed(ArchiveError),
    Cancelled,
}

impl BatchPipeline {
    pub fn new(config: PipelineConfig, broadcaster: ProgressBroadcaster) -> Result<Self> {
        config.validate()?;

        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("pixpack-codec-{}", i))
            .panic_handler(|_| log::error!("Codec worker panicked; item dropped"));
        if config.threads > 0 {
            builder = builder.num_threads(config.threads);
        }
        let pool = builder.build().map_err(|e| {
            PipelineError::Worker(format!("Failed to create thread pool: {}", e))
        })?;

        Ok(Self {
            transformer: Arc::new(ImageTransformer::from_config(&config)),
            thread_pool: Arc::new(pool),
            config,
            broadcaster,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Transforms `images` into a zip written to `sink`.
    ///
    /// Returns `Err` only when the batch never started (empty input). Once
    /// running, the archive is finalized exactly once and the outcome is
    /// carried by the report's `state`; a `Failed` archive is incomplete.
    pub async fn run<W>(
        &self,
        images: Vec<UploadedImage>,
        options: TransformOptions,
        sink: W,
    ) -> Result<BatchReport>
    where
        W: Write + Send + 'static,
    {
        if images.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let total_count = images.len();
        log::info!(
            "Processing {} images (max width: {}, in flight: {})",
            total_count,
            options.max_width,
            self.config.max_in_flight
        );

        let batch = Arc::new(Mutex::new(BatchArchive::new(sink, total_count)));
        batch.lock().begin();

        let in_flight = Arc::new(InFlight::default());
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut tasks = JoinSet::new();

        for image in images {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let permit = permit.map_err(|e| PipelineError::Worker(e.to_string()))?;

            let pool = Arc::clone(&self.thread_pool);
            let transformer = Arc::clone(&self.transformer);
            let batch = Arc::clone(&batch);
            let broadcaster = self.broadcaster.clone();
            let in_flight = Arc::clone(&in_flight);
            let cancel = cancel.clone();
            let policy = self.config.failure_policy;

            tasks.spawn(async move {
                let _permit = permit;
                let file_name = image.original_name.clone();
                let size_before = image.raw_bytes.len() as u64;

                let transformed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ItemOutcome::Cancelled,
                    result = transform_on_pool(&pool, transformer, in_flight, image, options) => result,
                };

                let result = match transformed {
                    Ok(result) => result,
                    Err(error) => {
                        if policy == FailurePolicy::Abort {
                            cancel.cancel();
                        }
                        return ItemOutcome::TransformFailed { file_name, error };
                    }
                };

                if cancel.is_cancelled() {
                    return ItemOutcome::Cancelled;
                }

                let committed = tokio::task::spawn_blocking(move || {
                    batch.lock().commit(result, &file_name, &broadcaster)
                })
                .await;

                match committed {
                    Ok(Ok(())) => ItemOutcome::Appended { size_before },
                    Ok(Err(e)) => {
                        cancel.cancel();
                        ItemOutcome::ArchiveFailed(e)
                    }
                    Err(e) => {
                        cancel.cancel();
                        ItemOutcome::ArchiveFailed(ArchiveError::Write(std::io::Error::other(
                            e.to_string(),
                        )))
                    }
                }
            });
        }

        let mut skipped = Vec::new();
        let mut failure: Option<PipelineError> = None;
        let mut total_size_before = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ItemOutcome::Appended { size_before }) => total_size_before += size_before,
                Ok(ItemOutcome::TransformFailed { file_name, error }) => {
                    log::warn!("Skipping {}: {}", file_name, error);
                    match self.config.failure_policy {
                        FailurePolicy::Isolate => skipped.push(SkippedItem {
                            file_name,
                            reason: error.to_string(),
                        }),
                        FailurePolicy::Abort => {
                            failure.get_or_insert(PipelineError::Aborted {
                                file: file_name,
                                source: error,
                            });
                        }
                    }
                }
                Ok(ItemOutcome::ArchiveFailed(e)) => {
                    log::error!("Archive write failed: {}", e);
                    failure.get_or_insert(PipelineError::Archive(e));
                }
                Ok(ItemOutcome::Cancelled) => {}
                Err(e) => {
                    cancel.cancel();
                    failure.get_or_insert(PipelineError::Worker(e.to_string()));
                }
            }
        }

        let failed = failure.is_some();
        let finalize_batch = Arc::clone(&batch);
        let finalized = tokio::task::spawn_blocking(move || finalize_batch.lock().finish(failed))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))
            .and_then(|r| r.map_err(PipelineError::from));

        if let Err(e) = finalized {
            match failure {
                Some(_) => log::warn!("Finalizing failed batch: {}", e),
                None => failure = Some(e),
            }
        }

        let (state, processed_count, entries, total_size_after) = {
            let mut guard = batch.lock();
            // A panicked finalize task never settled the state.
            if guard.state == BatchState::Running {
                guard.state = BatchState::Failed;
            }
            (
                guard.state,
                guard.processed_count,
                std::mem::take(&mut guard.entries),
                guard.total_size_after,
            )
        };

        let report = BatchReport {
            state,
            total_count,
            processed_count,
            entries,
            skipped,
            total_size_before,
            total_size_after,
            peak_in_flight: in_flight.peak(),
            failure,
        };

        match &report.failure {
            Some(e) => log::error!(
                "Batch failed after {}/{} images: {}",
                report.processed_count,
                report.total_count,
                e
            ),
            None => log::info!(
                "Processed {}/{} images, {} skipped ({} -> {}, {:.1}% size reduction, peak {} in flight)",
                report.processed_count,
                report.total_count,
                report.skipped.len(),
                format_file_size(report.total_size_before),
                format_file_size(report.total_size_after),
                report.savings_percent(),
                report.peak_in_flight
            ),
        }

        Ok(report)
    }
}

async fn transform_on_pool(
    pool: &rayon::ThreadPool,
    transformer: Arc<ImageTransformer>,
    in_flight: Arc<InFlight>,
    image: UploadedImage,
    options: TransformOptions,
) -> std::result::Result<TransformResult, TransformError> {
    let (tx, rx) = oneshot::channel();
    pool.spawn(move || {
        // Leave the gauge before the result can release the item's permit.
        let result = {
            let _active = in_flight.enter();
            transformer.transform_image(&image, &options)
        };
        let _ = tx.send(result);
    });

    rx.await.unwrap_or_else(|_| {
        Err(TransformError::DecodeFailed(
            "codec worker stopped before finishing".to_string(),
        ))
    })
}

/// Reads every JPEG/PNG under `input_dir` into memory as a batch.
pub fn collect_uploads(input_dir: &Path, recursive: bool) -> Result<Vec<UploadedImage>> {
    validate_input_dir(input_dir)?;

    let mut uploads = Vec::new();
    for path in collect_image_paths(input_dir, recursive) {
        let Some(mime_type) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(MimeType::from_extension)
        else {
            continue;
        };

        let raw_bytes = std::fs::read(&path)?;
        let original_name = path
            .strip_prefix(input_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();

        uploads.push(UploadedImage::new(uploads.len(), original_name, mime_type, raw_bytes));
    }

    Ok(uploads)
}

/// [`collect_uploads`] plus the checks a batch needs before any output is
/// created: at least one image, and no more than `max_files`.
pub fn collect_batch(
    input_dir: &Path,
    recursive: bool,
    max_files: usize,
) -> Result<Vec<UploadedImage>> {
    let uploads = collect_uploads(input_dir, recursive)?;

    if uploads.is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "No JPEG or PNG images found in {}",
            input_dir.display()
        )));
    }

    if uploads.len() > max_files {
        return Err(PipelineError::InvalidInput(format!(
            "Found {} images, more than the limit of {}",
            uploads.len(),
            max_files
        )));
    }

    Ok(uploads)
}

fn collect_image_paths(input_dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(input_dir)
    } else {
        WalkDir::new(input_dir).max_depth(1)
    };

    let mut paths: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(MimeType::from_extension)
                .is_some()
        })
        .map(|entry| entry.into_path())
        .collect();

    paths.sort();
    paths
}

fn validate_input_dir(input_dir: &Path) -> Result<()> {
    if !input_dir.exists() {
        return Err(PipelineError::InvalidInput(format!(
            "Input directory does not exist: {}",
            input_dir.display()
        )));
    }

    if !input_dir.is_dir() {
        return Err(PipelineError::InvalidInput(format!(
            "Input path is not a directory: {}",
            input_dir.display()
        )));
    }

    Ok(())
}
