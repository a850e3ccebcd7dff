//! Cover resolution for a single video.
//!
//! Strategies run cheapest first and stop at the first success:
//!
//! 1. a `{videoId}.{format}` file already in the cover directory
//! 2. the video's known external cover URL, downloaded and cached
//! 3. thumbnails the source CDN may host next to the video
//! 4. frames sampled from the source media by the [`MediaGenerator`]
//!
//! A failing strategy only logs and falls through. Running out of
//! strategies is the one failure the worker pool sees.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CoverStorageConfig, FetchConfig, PipelineConfig};
use crate::error::{CoverError, Result};
use crate::media::{GenerateOptions, MediaGenerator};
use crate::records::VideoRecords;
use crate::types::{CoverFormat, VideoId};

pub mod fetch;
pub mod heuristics;

pub use fetch::{FetchedImage, RemoteImageFetcher};
pub use heuristics::thumbnail_candidates;

/// Which strategy produced the cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverSource {
    LocalFile,
    KnownUrl,
    CdnGuess,
    Generated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoverOutcome {
    /// The record now references `reference`.
    Resolved {
        reference: String,
        source: CoverSource,
    },
    /// The video was deleted before its job ran; nothing to do.
    VideoMissing,
}

/// What the worker pool runs for each claimed video.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, video_id: &VideoId) -> Result<CoverOutcome>;
}

pub struct CoverProcessor {
    records: Arc<dyn VideoRecords>,
    generator: Arc<dyn MediaGenerator>,
    fetcher: RemoteImageFetcher,
    storage: CoverStorageConfig,
    fetch: FetchConfig,
    options: GenerateOptions,
}

impl fmt::Debug for CoverProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverProcessor")
            .field("cover_dir", &self.storage.directory)
            .field("records", &"dyn VideoRecords")
            .field("generator", &"dyn MediaGenerator")
            .finish()
    }
}

impl CoverProcessor {
    pub fn new(
        config: &PipelineConfig,
        records: Arc<dyn VideoRecords>,
        generator: Arc<dyn MediaGenerator>,
    ) -> Result<Self> {
        Ok(Self {
            records,
            generator,
            fetcher: RemoteImageFetcher::new(&config.fetch)?,
            storage: config.covers.clone(),
            fetch: config.fetch.clone(),
            options: GenerateOptions::from_config(config),
        })
    }

    /// First `{videoId}.{format}` present on disk, in format priority order.
    pub async fn find_local_cover(&self, video_id: &VideoId) -> Option<(String, CoverFormat)> {
        find_local_cover(&self.storage.directory, video_id).await
    }

    async fn persist(
        &self,
        video_id: &VideoId,
        file_name: &str,
        source: CoverSource,
    ) -> Result<CoverOutcome> {
        let reference = self.storage.public_reference(file_name);
        self.records.set_video_cover(video_id, &reference).await?;
        info!(video_id = %video_id, cover = %reference, ?source, "cover stored");
        Ok(CoverOutcome::Resolved { reference, source })
    }

    /// Store a downloaded image as `{videoId}.{format}`, re-encoding through
    /// the media tool when possible and keeping the original bytes when the
    /// tool fails on an image already in a servable format.
    async fn cache_image(&self, video_id: &VideoId, image: FetchedImage) -> Result<String> {
        let dir = &self.storage.directory;
        tokio::fs::create_dir_all(dir).await?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{video_id}."))
            .suffix(".src")
            .tempfile_in(dir)?
            .into_temp_path();
        tokio::fs::write(&staging, &image.bytes).await?;

        let encoded = self
            .generator
            .encode_still(&staging, video_id, dir, &self.options)
            .await;

        match encoded {
            Ok(Some(file_name)) => Ok(file_name),
            other => {
                if let Err(err) = &other {
                    debug!(video_id = %video_id, error = %err, "re-encode failed; trying to keep original");
                }
                match CoverFormat::from_image_format(image.format) {
                    Some(format) => {
                        let file_name = format.file_name(video_id);
                        staging
                            .persist(dir.join(&file_name))
                            .map_err(|e| CoverError::Io(e.error))?;
                        Ok(file_name)
                    }
                    None => Err(CoverError::InvalidImage(format!(
                        "{:?} cannot be served as a cover without re-encoding",
                        image.format
                    ))),
                }
            }
        }
    }

    async fn from_known_url(&self, video_id: &VideoId, url: &str) -> Result<String> {
        let image = self.fetcher.fetch(url, self.fetch.timeout()).await?;
        self.cache_image(video_id, image).await
    }

    async fn from_cdn_guess(&self, video_id: &VideoId, source_url: &str) -> Result<String> {
        let candidates = thumbnail_candidates(source_url);
        let (url, image) = self
            .fetcher
            .fetch_first(&candidates, self.fetch.heuristic_timeout())
            .await?;
        debug!(video_id = %video_id, url = %url, "CDN thumbnail guess matched");
        self.cache_image(video_id, image).await
    }

    async fn from_source_media(&self, video_id: &VideoId, source_url: &str) -> Result<String> {
        self.generator
            .resolve_or_generate_cover(source_url, video_id, &self.storage.directory, &self.options)
            .await?
            .ok_or_else(|| CoverError::Media("media tool produced no cover".into()))
    }
}

#[async_trait]
impl JobProcessor for CoverProcessor {
    async fn process(&self, video_id: &VideoId) -> Result<CoverOutcome> {
        if let Some((file_name, _)) = self.find_local_cover(video_id).await {
            return self.persist(video_id, &file_name, CoverSource::LocalFile).await;
        }

        let Some(source) = self.records.cover_source(video_id).await? else {
            info!(video_id = %video_id, "video no longer exists; dropping cover job");
            return Ok(CoverOutcome::VideoMissing);
        };

        if let Some(url) = source.external_cover_url() {
            match self.from_known_url(video_id, url).await {
                Ok(file_name) => {
                    return self.persist(video_id, &file_name, CoverSource::KnownUrl).await;
                }
                Err(err) => debug!(video_id = %video_id, error = %err, "known cover URL unusable"),
            }
        }

        let Some(source_url) = source.source_url() else {
            warn!(video_id = %video_id, "no source media to derive a cover from");
            return Err(CoverError::Exhausted(video_id.clone()));
        };

        match self.from_cdn_guess(video_id, source_url).await {
            Ok(file_name) => {
                return self.persist(video_id, &file_name, CoverSource::CdnGuess).await;
            }
            Err(err) => debug!(video_id = %video_id, error = %err, "no CDN thumbnail found"),
        }

        match self.from_source_media(video_id, source_url).await {
            Ok(file_name) => self.persist(video_id, &file_name, CoverSource::Generated).await,
            Err(err) => {
                warn!(video_id = %video_id, error = %err, "cover generation failed");
                Err(CoverError::Exhausted(video_id.clone()))
            }
        }
    }
}

/// Probe `dir` for `{videoId}.{format}` in priority order. Empty files are
/// ignored.
pub async fn find_local_cover(dir: &Path, video_id: &VideoId) -> Option<(String, CoverFormat)> {
    for format in CoverFormat::PRIORITY {
        let file_name = format.file_name(video_id);
        if let Ok(meta) = tokio::fs::metadata(dir.join(&file_name)).await
            && meta.is_file()
            && meta.len() > 0
        {
            return Some((file_name, format));
        }
    }
    None
}
