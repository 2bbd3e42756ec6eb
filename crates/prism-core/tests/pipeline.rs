//! End-to-end: Scanner → Compute → Sorter and Correlator over one in-process
//! broker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use prism_core::broker::{Connector, ExchangeKind};
use prism_core::pipeline::encode_image;
use prism_core::{Config, CorrelationError, InMemoryBroker, Prism};
use tokio_util::sync::CancellationToken;

fn png(color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)));
    encode_image(&img, ImageFormat::Png).unwrap()
}

fn config(watch: &Path, target: &Path) -> Config {
    let mut config = Config::default();
    config.scanner.dirs = vec![watch.to_path_buf()];
    config.sorter.target_dir = Some(target.to_path_buf());
    config.correlator.timeout_secs = 5;
    config.correlator.poll_interval_ms = 20;
    config.broker.retry_delay_ms = 10;
    config
}

/// Compute and Sorter running in the background.
struct Stages {
    shutdown: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<prism_core::Result<()>>>,
}

impl Stages {
    async fn start(prism: &Prism, broker: &InMemoryBroker) -> Self {
        let shutdown = CancellationToken::new();
        let compute = prism.compute();
        let sorter = prism.sorter().unwrap();

        let token = shutdown.clone();
        let compute = tokio::spawn(async move { compute.run(token).await });
        let token = shutdown.clone();
        let sorter = tokio::spawn(async move { sorter.run(token).await });

        // Both stages have bound their queues once two exist.
        for _ in 0..400 {
            if broker.queue_count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(broker.queue_count(), 2);

        Self {
            shutdown,
            handles: vec![compute, sorter],
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            handle.await.unwrap().unwrap();
        }
    }
}

async fn wait_for_files(dir: &Path, count: usize) -> Vec<PathBuf> {
    for _ in 0..600 {
        let files = list(dir);
        if files.len() >= count {
            return files;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    list(dir)
}

fn list(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut files: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
            files.sort();
            files
        }
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_scanned_images_are_sorted_by_colour() {
    let watch = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    std::fs::write(watch.path().join("red.png"), png([255, 0, 0])).unwrap();
    std::fs::write(watch.path().join("blue.png"), png([0, 0, 255])).unwrap();

    let broker = InMemoryBroker::new();
    let prism = Prism::with_connector(
        config(watch.path(), target.path()),
        Arc::new(broker.clone()),
    );
    let stages = Stages::start(&prism, &broker).await;

    let mut scanner = prism.scanner().unwrap();
    scanner.declare().await.unwrap();
    let report = scanner.run_cycle().await;
    assert_eq!(report.published, 2);

    let red = wait_for_files(&target.path().join("#ff0000"), 1).await;
    let blue = wait_for_files(&target.path().join("#0000ff"), 1).await;
    assert_eq!(red.len(), 1);
    assert_eq!(blue.len(), 1);
    assert_eq!(red[0].extension().unwrap(), "png");
    assert_eq!(std::fs::read(&red[0]).unwrap(), png([255, 0, 0]));

    // Nothing new: a second cycle publishes nothing and nothing new is filed.
    assert_eq!(scanner.run_cycle().await.published, 0);

    stages.stop().await;
}

#[tokio::test]
async fn test_correlator_round_trip_through_compute() {
    let watch = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    let broker = InMemoryBroker::new();
    let prism = Prism::with_connector(
        config(watch.path(), target.path()),
        Arc::new(broker.clone()),
    );
    let stages = Stages::start(&prism, &broker).await;
    let correlator = prism.correlator();

    let green = correlator.submit(png([0, 255, 0])).unwrap();
    let translucent = {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 128])));
        correlator
            .submit(encode_image(&img, ImageFormat::Png).unwrap())
            .unwrap()
    };

    assert_eq!(correlator.wait(&green).await.unwrap().as_str(), "#00ff00");
    assert_eq!(
        correlator.wait(&translucent).await.unwrap().as_str(),
        "#00000080"
    );

    // The Sorter sees every result, including correlated ones.
    let filed = wait_for_files(&target.path().join("#00ff00"), 1).await;
    assert_eq!(filed, vec![target.path().join("#00ff00").join(format!("{}.png", green))]);

    stages.stop().await;
}

#[tokio::test]
async fn test_bad_messages_do_not_stop_the_pipeline() {
    let watch = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    let broker = InMemoryBroker::new();
    let prism = Prism::with_connector(
        config(watch.path(), target.path()),
        Arc::new(broker.clone()),
    );
    let stages = Stages::start(&prism, &broker).await;

    let routing = prism.config().routing.clone();
    let channel = broker.connect().await.unwrap();
    channel
        .declare_exchange(&routing.request_exchange, ExchangeKind::Direct)
        .await
        .unwrap();
    channel
        .publish(&routing.request_exchange, &routing.request_routing_key, b"garbage")
        .await
        .unwrap();
    channel
        .publish(
            &routing.request_exchange,
            &routing.request_routing_key,
            br#"{"id":"x","image":"bm90IGFuIGltYWdl"}"#,
        )
        .await
        .unwrap();
    channel.close().await;

    // A non-image file in the watched directory is published, then dropped.
    std::fs::write(watch.path().join("notes.txt"), b"not an image").unwrap();
    std::fs::write(watch.path().join("ok.png"), png([1, 2, 3])).unwrap();
    let mut scanner = prism.scanner().unwrap();
    scanner.declare().await.unwrap();
    assert_eq!(scanner.run_cycle().await.published, 2);

    let filed = wait_for_files(&target.path().join("#010203"), 1).await;
    assert_eq!(filed.len(), 1);
    assert_eq!(list(target.path()).len(), 1);

    stages.stop().await;
}

#[tokio::test]
async fn test_correlator_times_out_without_compute() {
    let watch = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let mut config = config(watch.path(), target.path());
    config.correlator.timeout_secs = 1;

    let broker = InMemoryBroker::new();
    let prism = Prism::with_connector(config, Arc::new(broker.clone()));
    let correlator = prism.correlator();

    let id = correlator.submit(png([9, 9, 9])).unwrap();
    let err = correlator.wait(&id).await.unwrap_err();
    assert_eq!(
        err,
        CorrelationError::Timeout {
            id: id.to_string(),
            timeout_ms: 1000
        }
    );
    assert_eq!(broker.queue_count(), 0);
}
