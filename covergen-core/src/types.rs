//! Identifiers and output formats shared across the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a video. This is the sole job key: one job per video.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parses an identifier coming from outside the process (HTTP path,
    /// CLI argument, queue payload). Rejects values that could escape the
    /// cover directory or collide with the key layout.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            return None;
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        valid.then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Output formats, most efficient first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverFormat {
    Avif,
    Webp,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl CoverFormat {
    /// Every supported format in priority order. The local-file probe walks
    /// exactly this list.
    pub const PRIORITY: [CoverFormat; 3] =
        [CoverFormat::Avif, CoverFormat::Webp, CoverFormat::Jpeg];

    pub fn extension(self) -> &'static str {
        match self {
            CoverFormat::Avif => "avif",
            CoverFormat::Webp => "webp",
            CoverFormat::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            CoverFormat::Avif => "image/avif",
            CoverFormat::Webp => "image/webp",
            CoverFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "avif" => Some(CoverFormat::Avif),
            "webp" => Some(CoverFormat::Webp),
            "jpg" | "jpeg" => Some(CoverFormat::Jpeg),
            _ => None,
        }
    }

    /// Maps a sniffed image format onto an output format we can store as-is.
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Avif => Some(CoverFormat::Avif),
            image::ImageFormat::WebP => Some(CoverFormat::Webp),
            image::ImageFormat::Jpeg => Some(CoverFormat::Jpeg),
            _ => None,
        }
    }

    /// `{videoId}.{ext}`: the on-disk naming contract for cover files.
    pub fn file_name(self, video_id: &VideoId) -> String {
        format!("{}.{}", video_id, self.extension())
    }
}

impl fmt::Display for CoverFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_path_traversal() {
        assert!(VideoId::parse("../etc/passwd").is_none());
        assert!(VideoId::parse("a/b").is_none());
        assert!(VideoId::parse("   ").is_none());
        assert_eq!(
            VideoId::parse(" clz9x_01-a ").map(|id| id.to_string()),
            Some("clz9x_01-a".to_string())
        );
    }

    #[test]
    fn priority_puts_avif_first() {
        assert_eq!(CoverFormat::PRIORITY[0], CoverFormat::Avif);
        let id = VideoId::new("V2");
        assert_eq!(CoverFormat::Avif.file_name(&id), "V2.avif");
        assert_eq!(CoverFormat::Jpeg.file_name(&id), "V2.jpg");
    }

    #[test]
    fn formats_deserialize_from_config_names() {
        let parsed: Vec<CoverFormat> =
            serde_json::from_str(r#"["avif","webp","jpg","jpeg"]"#)
                .expect("formats parse");
        assert_eq!(
            parsed,
            vec![
                CoverFormat::Avif,
                CoverFormat::Webp,
                CoverFormat::Jpeg,
                CoverFormat::Jpeg
            ]
        );
    }
}
