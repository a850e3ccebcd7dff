#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use covergen_core::{
    CoordinationStore, CoverError, CoverOutcome, CoverSource, GenerateOptions,
    InMemoryCoordinationStore, JobProcessor, MediaGenerator, PipelineConfig, Result,
    VideoCoverSource, VideoId, VideoRecords,
};

/// Pipeline config tuned for tests: short polls, no backfill timer.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.worker.concurrency = 1;
    config.worker.pop_timeout_ms = 50;
    config.worker.error_backoff_base_ms = 10;
    config.worker.error_backoff_max_ms = 50;
    config.retry.retry_delay_ms = 10;
    config.backfill.enabled = false;
    config
}

/// A small solid PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode png");
    buf
}

/// In-memory store whose push and pop can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryCoordinationStore,
    pub fail_push: AtomicBool,
    pub fail_pop: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryCoordinationStore) -> Self {
        Self {
            inner,
            fail_push: AtomicBool::new(false),
            fail_pop: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CoordinationStore for FlakyStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.set_if_absent(key, ttl).await
    }

    async fn set_if_absent_many(&self, keys: &[String], ttl: Duration) -> Result<Vec<bool>> {
        self.inner.set_if_absent_many(keys, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.inner.expire(key, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.inner.delete(keys).await
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.inner.incr_with_ttl(key, ttl).await
    }

    async fn push_tail(&self, list: &str, values: &[String]) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(CoverError::Store("push refused".into()));
        }
        self.inner.push_tail(list, values).await
    }

    async fn pop_head_blocking(&self, list: &str, timeout: Duration) -> Result<Option<String>> {
        if self.fail_pop.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            return Err(CoverError::Store("pop refused".into()));
        }
        self.inner.pop_head_blocking(list, timeout).await
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        self.inner.list_len(list).await
    }
}

/// Record store backed by a map.
#[derive(Debug, Default)]
pub struct FakeRecords {
    videos: Mutex<HashMap<VideoId, VideoCoverSource>>,
    pub missing_queries: AtomicUsize,
}

impl FakeRecords {
    pub fn with_video(self, id: &str, source_url: Option<&str>, cover_url: Option<&str>) -> Self {
        self.videos.lock().expect("records lock").insert(
            VideoId::new(id),
            VideoCoverSource {
                source_url: source_url.map(str::to_string),
                cover_url: cover_url.map(str::to_string),
            },
        );
        self
    }

    pub fn cover_of(&self, id: &str) -> Option<String> {
        self.videos
            .lock()
            .expect("records lock")
            .get(&VideoId::new(id))
            .and_then(|video| video.cover_url.clone())
    }
}

#[async_trait]
impl VideoRecords for FakeRecords {
    async fn find_videos_missing_cover(&self, limit: usize) -> Result<Vec<VideoId>> {
        self.missing_queries.fetch_add(1, Ordering::SeqCst);
        let videos = self.videos.lock().expect("records lock");
        let mut ids: Vec<VideoId> = videos
            .iter()
            .filter(|(_, video)| {
                video
                    .cover_url
                    .as_deref()
                    .is_none_or(|cover| cover.trim().is_empty() || cover.starts_with("http"))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids.truncate(limit);
        Ok(ids)
    }

    async fn cover_source(&self, video_id: &VideoId) -> Result<Option<VideoCoverSource>> {
        Ok(self.videos.lock().expect("records lock").get(video_id).cloned())
    }

    async fn set_video_cover(&self, video_id: &VideoId, cover_path: &str) -> Result<()> {
        let mut videos = self.videos.lock().expect("records lock");
        let video = videos
            .get_mut(video_id)
            .ok_or_else(|| CoverError::NotFound(video_id.to_string()))?;
        video.cover_url = Some(cover_path.to_string());
        Ok(())
    }
}

/// Media tool stand-in that writes `{id}.avif` without touching ffmpeg.
#[derive(Debug, Default)]
pub struct FakeGenerator {
    pub resolve_calls: AtomicUsize,
    pub encode_calls: AtomicUsize,
}

#[async_trait]
impl MediaGenerator for FakeGenerator {
    async fn resolve_or_generate_cover(
        &self,
        _source_url: &str,
        video_id: &VideoId,
        output_dir: &Path,
        _options: &GenerateOptions,
    ) -> Result<Option<String>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(output_dir).await?;
        let file_name = format!("{video_id}.avif");
        tokio::fs::write(output_dir.join(&file_name), b"generated").await?;
        Ok(Some(file_name))
    }

    async fn encode_still(
        &self,
        input: &Path,
        video_id: &VideoId,
        output_dir: &Path,
        _options: &GenerateOptions,
    ) -> Result<Option<String>> {
        self.encode_calls.fetch_add(1, Ordering::SeqCst);
        let file_name = format!("{video_id}.avif");
        tokio::fs::copy(input, output_dir.join(&file_name)).await?;
        Ok(Some(file_name))
    }
}

/// Processor that always fails and counts how often it ran.
#[derive(Debug, Default)]
pub struct FailingProcessor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl JobProcessor for FailingProcessor {
    async fn process(&self, video_id: &VideoId) -> Result<CoverOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoverError::Exhausted(video_id.clone()))
    }
}

/// Processor that always succeeds.
#[derive(Debug, Default)]
pub struct SucceedingProcessor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl JobProcessor for SucceedingProcessor {
    async fn process(&self, video_id: &VideoId) -> Result<CoverOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CoverOutcome::Resolved {
            reference: format!("/uploads/covers/{video_id}.avif"),
            source: CoverSource::LocalFile,
        })
    }
}

/// Processor that panics on every call.
#[derive(Debug, Default)]
pub struct PanickingProcessor;

#[async_trait]
impl JobProcessor for PanickingProcessor {
    async fn process(&self, _video_id: &VideoId) -> Result<CoverOutcome> {
        panic!("processor blew up");
    }
}

/// Processor that takes `delay` before succeeding.
#[derive(Debug)]
pub struct SlowProcessor {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowProcessor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobProcessor for SlowProcessor {
    async fn process(&self, video_id: &VideoId) -> Result<CoverOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(CoverOutcome::Resolved {
            reference: format!("/uploads/covers/{video_id}.avif"),
            source: CoverSource::Generated,
        })
    }
}
