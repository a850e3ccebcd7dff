mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use covergen_core::config::FetchConfig;
use covergen_core::processor::RemoteImageFetcher;
use covergen_core::{
    CoverError, CoverOutcome, CoverPipeline, CoverProcessor, CoverSource, InMemoryCoordinationStore,
    JobProcessor, PipelineConfig, VideoId,
};
use support::{FakeGenerator, FakeRecords, fast_config, png_bytes};
use tempfile::TempDir;

/// Serves `/covers/V1.png`, a CDN poster under `/videos/` and a handful of
/// bodies that must not be accepted as images; everything else is a 404.
async fn spawn_image_server() -> SocketAddr {
    let png = png_bytes();
    let poster = png.clone();
    let mut oversized = png.clone();
    oversized.resize(4096, 0);
    let app = Router::new()
        .route(
            "/covers/V1.png",
            get(move || {
                let png = png.clone();
                async move { ([(CONTENT_TYPE, "image/png")], png) }
            }),
        )
        .route(
            "/videos/poster.jpg",
            get(move || {
                let poster = poster.clone();
                async move { ([(CONTENT_TYPE, "image/jpeg")], poster) }
            }),
        )
        .route("/fetch/text", get(|| async { "hello" }))
        .route(
            "/fetch/json",
            get(|| async { ([(CONTENT_TYPE, "application/json")], "{}") }),
        )
        .route(
            "/fetch/oversized",
            get(move || {
                let body = oversized.clone();
                async move { ([(CONTENT_TYPE, "image/png")], body) }
            }),
        )
        .route(
            "/fetch/garbage",
            get(|| async {
                (
                    [(CONTENT_TYPE, "application/octet-stream")],
                    b"definitely not an image".to_vec(),
                )
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn config_in(dir: &TempDir) -> PipelineConfig {
    let mut config = fast_config();
    config.covers.directory = dir.path().to_path_buf();
    config.fetch.timeout_ms = 2_000;
    config.fetch.heuristic_timeout_ms = 1_000;
    config
}

#[tokio::test]
async fn known_cover_url_is_cached_without_generation() {
    let addr = spawn_image_server().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let records = Arc::new(FakeRecords::default().with_video(
        "V1",
        Some(&format!("http://{addr}/videos/V1.mp4")),
        Some(&format!("http://{addr}/covers/V1.png")),
    ));
    let generator = Arc::new(FakeGenerator::default());
    let processor =
        CoverProcessor::new(&config_in(&dir), records.clone(), generator.clone()).expect("processor");

    let outcome = processor.process(&VideoId::new("V1")).await.expect("process");

    assert_eq!(
        outcome,
        CoverOutcome::Resolved {
            reference: "/uploads/covers/V1.avif".into(),
            source: CoverSource::KnownUrl,
        }
    );
    assert_eq!(records.cover_of("V1").as_deref(), Some("/uploads/covers/V1.avif"));
    assert!(dir.path().join("V1.avif").is_file());
    assert_eq!(generator.resolve_calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.encode_calls.load(Ordering::SeqCst), 1);

    // No staging leftovers next to the cover.
    let mut entries = tokio::fs::read_dir(dir.path()).await.expect("read_dir");
    while let Some(entry) = entries.next_entry().await.expect("entry") {
        let name = entry.file_name();
        assert!(!name.to_string_lossy().starts_with('.'), "leftover {name:?}");
    }
}

#[tokio::test]
async fn cdn_poster_next_to_the_video_is_used_before_generation() {
    let addr = spawn_image_server().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let records = Arc::new(FakeRecords::default().with_video(
        "V5",
        Some(&format!("http://{addr}/videos/V5.mp4")),
        None,
    ));
    let generator = Arc::new(FakeGenerator::default());
    let processor =
        CoverProcessor::new(&config_in(&dir), records.clone(), generator.clone()).expect("processor");

    let outcome = processor.process(&VideoId::new("V5")).await.expect("process");

    assert_eq!(
        outcome,
        CoverOutcome::Resolved {
            reference: "/uploads/covers/V5.avif".into(),
            source: CoverSource::CdnGuess,
        }
    );
    assert!(dir.path().join("V5.avif").is_file());
    assert_eq!(records.cover_of("V5").as_deref(), Some("/uploads/covers/V5.avif"));
    assert_eq!(generator.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fetcher_accepts_only_successful_image_bodies_within_the_limit() {
    let addr = spawn_image_server().await;
    let config = FetchConfig {
        max_bytes: 1024,
        ..FetchConfig::default()
    };
    let fetcher = RemoteImageFetcher::new(&config).expect("fetcher");
    let timeout = Duration::from_secs(2);

    let image = fetcher
        .fetch(&format!("http://{addr}/covers/V1.png"), timeout)
        .await
        .expect("png is accepted");
    assert_eq!(image.format, image::ImageFormat::Png);

    for (path, expected) in [
        ("/missing.png", "HTTP 404"),
        ("/fetch/text", "text/plain"),
        ("/fetch/json", "application/json"),
        ("/fetch/oversized", "exceeds"),
        ("/fetch/garbage", "not a recognised image"),
    ] {
        let err = fetcher
            .fetch(&format!("http://{addr}{path}"), timeout)
            .await
            .expect_err(path);
        match err {
            CoverError::InvalidImage(message) => {
                assert!(message.contains(expected), "{path}: {message}")
            }
            other => panic!("{path}: unexpected error {other:?}"),
        }
    }
}

#[tokio::test]
async fn missing_cover_is_generated_from_source_media() {
    let addr = spawn_image_server().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let records = Arc::new(FakeRecords::default().with_video(
        "V2",
        Some(&format!("http://{addr}/videos/V2.mp4")),
        None,
    ));
    let generator = Arc::new(FakeGenerator::default());

    let mut config = config_in(&dir);
    config.worker.max_items = Some(1);
    let pipeline = CoverPipeline::with_cover_processor(
        config,
        Arc::new(InMemoryCoordinationStore::new()),
        records.clone(),
        generator.clone(),
    )
    .expect("pipeline");

    assert!(pipeline.enqueue(&VideoId::new("V2")).await);
    pipeline.start().await;
    tokio::time::timeout(Duration::from_secs(15), pipeline.wait_for_workers())
        .await
        .expect("worker finishes V2");

    assert!(dir.path().join("V2.avif").is_file());
    assert_eq!(records.cover_of("V2").as_deref(), Some("/uploads/covers/V2.avif"));
    assert_eq!(generator.resolve_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.stats().succeeded, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn double_enqueue_yields_one_queue_entry() {
    let store = InMemoryCoordinationStore::new();
    let pipeline = CoverPipeline::new(
        fast_config(),
        Arc::new(store.clone()),
        Arc::new(FakeRecords::default()),
        Arc::new(support::SucceedingProcessor::default()),
    )
    .expect("pipeline");

    let id = VideoId::new("V3");
    assert!(pipeline.enqueue(&id).await);
    assert!(!pipeline.enqueue(&id).await);
    assert_eq!(pipeline.queue_depth().await.expect("depth"), 1);
}

#[tokio::test]
async fn existing_local_file_short_circuits_the_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    tokio::fs::write(dir.path().join("V4.webp"), b"webp")
        .await
        .expect("seed cover");
    let records = Arc::new(FakeRecords::default().with_video(
        "V4",
        Some("https://cdn.invalid/V4.mp4"),
        Some("https://img.invalid/V4.jpg"),
    ));
    let generator = Arc::new(FakeGenerator::default());
    let processor =
        CoverProcessor::new(&config_in(&dir), records.clone(), generator.clone()).expect("processor");

    let outcome = processor.process(&VideoId::new("V4")).await.expect("process");

    assert_eq!(
        outcome,
        CoverOutcome::Resolved {
            reference: "/uploads/covers/V4.webp".into(),
            source: CoverSource::LocalFile,
        }
    );
    assert_eq!(generator.encode_calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deleted_video_is_dropped_quietly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let processor = CoverProcessor::new(
        &config_in(&dir),
        Arc::new(FakeRecords::default()),
        Arc::new(FakeGenerator::default()),
    )
    .expect("processor");

    let outcome = processor.process(&VideoId::new("gone")).await.expect("process");
    assert_eq!(outcome, CoverOutcome::VideoMissing);
}

#[tokio::test]
async fn video_without_any_source_exhausts_the_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records = Arc::new(FakeRecords::default().with_video("bare", None, None));
    let processor = CoverProcessor::new(&config_in(&dir), records, Arc::new(FakeGenerator::default()))
        .expect("processor");

    let err = processor
        .process(&VideoId::new("bare"))
        .await
        .expect_err("nothing to work with");
    assert!(matches!(err, CoverError::Exhausted(id) if id.as_str() == "bare"));
}
