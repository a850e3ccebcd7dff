//! Record-store seam: where videos and their cover fields live.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::VideoId;

#[cfg(feature = "database")]
pub mod postgres;

#[cfg(feature = "database")]
pub use postgres::{PostgresVideoRecords, VideoTableSchema};

/// What the processor needs to know about a video to find it a cover.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCoverSource {
    /// Playable source media (file URL or stream manifest).
    pub source_url: Option<String>,
    /// Current cover field. May be empty, a local reference, or an external URL
    /// that has not been cached yet.
    pub cover_url: Option<String>,
}

impl VideoCoverSource {
    /// The cover field when it points at a remote image worth fetching.
    pub fn external_cover_url(&self) -> Option<&str> {
        self.cover_url
            .as_deref()
            .map(str::trim)
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRecords: Send + Sync {
    /// Oldest videos without a locally cached cover, at most `limit` of them.
    async fn find_videos_missing_cover(&self, limit: usize) -> Result<Vec<VideoId>>;

    /// `None` when the video no longer exists.
    async fn cover_source(&self, video_id: &VideoId) -> Result<Option<VideoCoverSource>>;

    async fn set_video_cover(&self, video_id: &VideoId, cover_path: &str) -> Result<()>;
}
