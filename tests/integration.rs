#[cfg(test)]
mod tests {
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use pixpack::{
        collect_batch, collect_uploads, BatchPipeline, BatchState, FailurePolicy, MimeType,
        PipelineConfig, PipelineError, ProgressBroadcaster, TransformOptions, UploadedImage,
    };
    use std::fs;
    use std::io::{self, Cursor, Read, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts `left` bytes, then fails every write.
    struct FailAfter {
        left: usize,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.left == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.left);
            self.left -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 2) as u8, (y * 3) as u8, 128])
        }))
    }

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn jpeg(id: usize, name: &str, width: u32, height: u32) -> UploadedImage {
        let bytes = encode(&gradient(width, height), ImageFormat::Jpeg);
        UploadedImage::new(id, name, MimeType::Jpeg, bytes)
    }

    fn corrupt(id: usize, name: &str) -> UploadedImage {
        UploadedImage::new(id, name, MimeType::Jpeg, b"definitely not a jpeg".to_vec())
    }

    fn pipeline(config: PipelineConfig) -> (BatchPipeline, ProgressBroadcaster) {
        let broadcaster = ProgressBroadcaster::new();
        let pipeline = BatchPipeline::new(config, broadcaster.clone()).unwrap();
        (pipeline, broadcaster)
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            max_in_flight: 2,
            threads: 2,
            ..Default::default()
        }
    }

    fn read_archive(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    fn sorted_names(entries: &[(String, Vec<u8>)]) -> Vec<String> {
        let mut names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }

    fn webp_width(bytes: &[u8]) -> u32 {
        image::load_from_memory_with_format(bytes, ImageFormat::WebP)
            .unwrap()
            .width()
    }

    #[tokio::test]
    async fn test_three_jpegs_become_three_webp_entries() {
        let (pipeline, broadcaster) = pipeline(small_config());
        let mut subscriber = broadcaster.subscribe();
        let sink = SharedSink::default();

        let images = vec![
            jpeg(0, "a.jpg", 64, 48),
            jpeg(1, "b.jpg", 64, 48),
            jpeg(2, "c.jpeg", 64, 48),
        ];
        let report = pipeline
            .run(images, TransformOptions::default(), sink.clone())
            .await
            .unwrap();

        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.processed_count, 3);
        assert!(report.skipped.is_empty());

        let entries = read_archive(sink.bytes());
        assert_eq!(sorted_names(&entries), vec!["a.webp", "b.webp", "c.webp"]);

        let mut appended = report.entries.clone();
        appended.sort();
        assert_eq!(appended, sorted_names(&entries));

        let events: Vec<_> = std::iter::from_fn(|| subscriber.try_recv()).collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.total_count == 3));

        let mut counts: Vec<usize> = events.iter().map(|e| e.processed_count).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_max_width_keeps_original_width() {
        let (pipeline, _) = pipeline(small_config());
        let sink = SharedSink::default();

        pipeline
            .run(vec![jpeg(0, "wide.jpg", 120, 80)], TransformOptions::new(0), sink.clone())
            .await
            .unwrap();

        let entries = read_archive(sink.bytes());
        assert_eq!(webp_width(&entries[0].1), 120);
    }

    #[tokio::test]
    async fn test_max_width_shrinks_but_never_enlarges() {
        let (pipeline, _) = pipeline(small_config());

        let sink = SharedSink::default();
        pipeline
            .run(vec![jpeg(0, "wide.jpg", 120, 80)], TransformOptions::new(50), sink.clone())
            .await
            .unwrap();
        let width = webp_width(&read_archive(sink.bytes())[0].1);
        assert!(width > 0 && width <= 50, "width {} not within 50", width);

        let sink = SharedSink::default();
        pipeline
            .run(vec![jpeg(0, "wide.jpg", 120, 80)], TransformOptions::new(500), sink.clone())
            .await
            .unwrap();
        let width = webp_width(&read_archive(sink.bytes())[0].1);
        assert!(width <= 120, "width {} grew past 120", width);
    }

    #[tokio::test]
    async fn test_colliding_names_are_deduplicated() {
        let (pipeline, _) = pipeline(small_config());
        let sink = SharedSink::default();

        let png = encode(&gradient(32, 32), ImageFormat::Png);
        let images = vec![
            jpeg(0, "photo.jpg", 32, 32),
            UploadedImage::new(1, "photo.png", MimeType::Png, png),
            jpeg(2, "nested/photo.jpg", 32, 32),
        ];
        pipeline
            .run(images, TransformOptions::default(), sink.clone())
            .await
            .unwrap();

        let entries = read_archive(sink.bytes());
        assert_eq!(
            sorted_names(&entries),
            vec!["photo-1.webp", "photo-2.webp", "photo.webp"]
        );
    }

    #[tokio::test]
    async fn test_corrupt_item_is_isolated() {
        let (pipeline, broadcaster) = pipeline(small_config());
        let mut subscriber = broadcaster.subscribe();
        let sink = SharedSink::default();

        let images = vec![
            jpeg(0, "good-1.jpg", 40, 40),
            corrupt(1, "broken.jpg"),
            jpeg(2, "good-2.jpg", 40, 40),
        ];
        let report = pipeline
            .run(images, TransformOptions::default(), sink.clone())
            .await
            .unwrap();

        assert!(report.is_completed());
        assert_eq!(report.processed_count, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].file_name, "broken.jpg");

        let entries = read_archive(sink.bytes());
        assert_eq!(sorted_names(&entries), vec!["good-1.webp", "good-2.webp"]);

        let events: Vec<_> = std::iter::from_fn(|| subscriber.try_recv()).collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.total_count == 3));
    }

    #[tokio::test]
    async fn test_abort_policy_fails_batch_and_still_finalizes() {
        let (pipeline, _) = pipeline(PipelineConfig {
            failure_policy: FailurePolicy::Abort,
            ..small_config()
        });
        let sink = SharedSink::default();

        let images = vec![
            corrupt(0, "broken.jpg"),
            jpeg(1, "good-1.jpg", 40, 40),
            jpeg(2, "good-2.jpg", 40, 40),
        ];
        let report = pipeline
            .run(images, TransformOptions::default(), sink.clone())
            .await
            .unwrap();

        assert_eq!(report.state, BatchState::Failed);
        assert!(matches!(
            &report.failure,
            Some(PipelineError::Aborted { file, .. }) if file == "broken.jpg"
        ));
        assert!(report.processed_count < 3);

        // Whatever made it in is a well-formed archive.
        let entries = read_archive(sink.bytes());
        assert_eq!(entries.len(), report.processed_count);
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_sink_failure_fails_batch() {
        let (pipeline, broadcaster) = pipeline(small_config());
        let mut subscriber = broadcaster.subscribe();

        let images = (0..4)
            .map(|i| jpeg(i, &format!("img-{}.jpg", i), 64, 64))
            .collect();
        let report = pipeline
            .run(images, TransformOptions::default(), FailAfter { left: 100 })
            .await
            .unwrap();

        assert_eq!(report.state, BatchState::Failed);
        assert!(matches!(report.failure, Some(PipelineError::Archive(_))));
        assert!(report.processed_count < 4);

        // Only appended items were announced.
        let events: Vec<_> = std::iter::from_fn(|| subscriber.try_recv()).collect();
        assert_eq!(events.len(), report.processed_count);
    }

    #[tokio::test]
    async fn test_in_flight_transforms_stay_bounded() {
        for max_in_flight in [1, 3] {
            let (pipeline, _) = pipeline(PipelineConfig {
                max_in_flight,
                threads: 6,
                ..Default::default()
            });

            let images = (0..12)
                .map(|i| jpeg(i, &format!("img-{}.jpg", i), 96, 64))
                .collect();
            let report = pipeline
                .run(images, TransformOptions::new(48), SharedSink::default())
                .await
                .unwrap();

            assert_eq!(report.processed_count, 12);
            assert!(report.peak_in_flight >= 1);
            assert!(
                report.peak_in_flight <= max_in_flight,
                "{} transforms ran at once with a limit of {}",
                report.peak_in_flight,
                max_in_flight
            );
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let (pipeline, _) = pipeline(small_config());
        let sink = SharedSink::default();

        let result = pipeline
            .run(Vec::new(), TransformOptions::default(), sink.clone())
            .await;

        assert!(matches!(result, Err(PipelineError::EmptyBatch)));
        assert!(sink.bytes().is_empty());
    }

    #[tokio::test]
    async fn test_departing_subscriber_does_not_affect_batch() {
        let (pipeline, broadcaster) = pipeline(small_config());
        let mut quitter = broadcaster.subscribe();
        let listener = tokio::spawn(async move {
            let first = quitter.recv().await;
            drop(quitter);
            first
        });

        let images = (0..6)
            .map(|i| jpeg(i, &format!("img-{}.jpg", i), 48, 32))
            .collect();
        let report = pipeline
            .run(images, TransformOptions::new(24), SharedSink::default())
            .await
            .unwrap();

        assert!(report.is_completed());
        assert_eq!(report.processed_count, 6);
        assert!(listener.await.unwrap().is_some());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = BatchPipeline::new(
            PipelineConfig {
                max_in_flight: 0,
                ..Default::default()
            },
            ProgressBroadcaster::new(),
        );

        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_collect_uploads_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        gradient(16, 16).save(temp_dir.child("a.jpg").path()).unwrap();
        gradient(16, 16).save(temp_dir.child("b.png").path()).unwrap();
        temp_dir.child("notes.txt").write_str("not an image").unwrap();
        temp_dir.child("sub").create_dir_all().unwrap();
        gradient(16, 16).save(temp_dir.child("sub/c.png").path()).unwrap();

        let flat = collect_uploads(temp_dir.path(), false).unwrap();
        let names: Vec<&str> = flat.iter().map(|u| u.original_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
        assert_eq!(flat[0].mime_type, MimeType::Jpeg);
        assert_eq!(flat[1].mime_type, MimeType::Png);

        let deep = collect_uploads(temp_dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);

        assert!(collect_uploads(&temp_dir.path().join("missing"), false).is_err());

        assert_eq!(collect_batch(temp_dir.path(), true, 3).unwrap().len(), 3);
        assert!(matches!(
            collect_batch(temp_dir.path(), true, 2),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_collect_batch_rejects_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        temp_dir.child("readme.txt").write_str("no images here").unwrap();

        let result = collect_batch(temp_dir.path(), true, 10);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_pack_directory_into_zip_file() {
        let temp_dir = TempDir::new().unwrap();
        gradient(30, 20).save(temp_dir.child("one.jpg").path()).unwrap();
        gradient(30, 20).save(temp_dir.child("two.png").path()).unwrap();

        let uploads = collect_batch(temp_dir.path(), false, 10).unwrap();
        let output = temp_dir.child("out.zip");
        let file = fs::File::create(output.path()).unwrap();

        let (pipeline, _) = pipeline(small_config());
        let report = pipeline
            .run(uploads, TransformOptions::default(), io::BufWriter::new(file))
            .await
            .unwrap();
        assert_eq!(report.processed_count, 2);

        let entries = read_archive(fs::read(output.path()).unwrap());
        assert_eq!(sorted_names(&entries), vec!["one.webp", "two.webp"]);
        assert!(entries.iter().all(|(_, data)| data.starts_with(b"RIFF")));
    }
}
