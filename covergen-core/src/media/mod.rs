//! Media generation seam.
//!
//! Turning video into pixels is delegated to an external tool. The pipeline
//! only decides when to call it and what to do with the file it produces.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::types::{CoverFormat, VideoId};

pub mod ffmpeg;
pub mod frames;

pub use ffmpeg::FfmpegMediaGenerator;

/// Knobs forwarded to the media tool for one job.
#[derive(Clone, Debug)]
pub struct GenerateOptions {
    /// Output width in pixels.
    pub width: u32,
    /// Budget for one attempt.
    pub timeout: Duration,
    /// Extra attempts after a failed one.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Formats to try, most preferred first.
    pub formats: Vec<CoverFormat>,
}

impl GenerateOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            width: config.covers.width,
            timeout: config.generate.timeout(),
            retries: config.generate.retries,
            retry_delay: config.generate.retry_delay(),
            formats: config.covers.formats.clone(),
        }
    }
}

#[async_trait]
pub trait MediaGenerator: Send + Sync {
    /// Sample frames from `source_url` and write `{video_id}.{format}` into
    /// `output_dir`. Returns the file name relative to `output_dir`, or
    /// `None` when no cover could be produced.
    async fn resolve_or_generate_cover(
        &self,
        source_url: &str,
        video_id: &VideoId,
        output_dir: &Path,
        options: &GenerateOptions,
    ) -> Result<Option<String>>;

    /// Re-encode a still image already on disk into `{video_id}.{format}`.
    async fn encode_still(
        &self,
        input: &Path,
        video_id: &VideoId,
        output_dir: &Path,
        options: &GenerateOptions,
    ) -> Result<Option<String>>;
}
