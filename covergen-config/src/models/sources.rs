use std::path::PathBuf;

use covergen_core::{CoverFormat, PipelineConfig, VideoTableSchema};
use serde::{Deserialize, Serialize};

use crate::util::{non_blank, parse_bool, parse_csv};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub covers: FileCoversConfig,
    #[serde(default)]
    pub ffmpeg: FileFfmpegConfig,
    /// Policy knobs; anything omitted keeps its default.
    pub pipeline: Option<PipelineConfig>,
    pub video_table: Option<VideoTableSchema>,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCoversConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<CoverFormat>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFfmpegConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub cover_dir: Option<PathBuf>,
    pub cover_public_prefix: Option<String>,
    pub cover_width: Option<u32>,
    /// Raw format names; unknown names are reported by the loader.
    pub cover_formats: Option<Vec<String>>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub worker_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub lock_ttl_secs: Option<u64>,
    pub backfill_interval_secs: Option<u64>,
    pub backfill_batch_size: Option<usize>,
    pub backfill_enabled: Option<bool>,
    pub key_namespace: Option<String>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).and_then(non_blank);

        Self {
            config_path: var("COVERGEN_CONFIG_PATH").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: var("SERVER_PORT").and_then(|raw| raw.trim().parse().ok()),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            cover_dir: var("COVER_DIR").map(PathBuf::from),
            cover_public_prefix: var("COVER_PUBLIC_PREFIX"),
            cover_width: var("COVER_WIDTH").and_then(|raw| raw.trim().parse().ok()),
            cover_formats: var("COVER_FORMATS").map(|raw| parse_csv(&raw)),
            ffmpeg_path: var("FFMPEG_PATH"),
            ffprobe_path: var("FFPROBE_PATH"),
            worker_concurrency: var("COVER_WORKER_CONCURRENCY")
                .and_then(|raw| raw.trim().parse().ok()),
            max_retries: var("COVER_MAX_RETRIES").and_then(|raw| raw.trim().parse().ok()),
            lock_ttl_secs: var("COVER_LOCK_TTL_SECS").and_then(|raw| raw.trim().parse().ok()),
            backfill_interval_secs: var("COVER_BACKFILL_INTERVAL_SECS")
                .and_then(|raw| raw.trim().parse().ok()),
            backfill_batch_size: var("COVER_BACKFILL_BATCH_SIZE")
                .and_then(|raw| raw.trim().parse().ok()),
            backfill_enabled: var("COVER_BACKFILL_ENABLED").and_then(|raw| parse_bool(&raw)),
            key_namespace: var("COVER_KEY_NAMESPACE"),
            dev_mode: var("DEV_MODE").and_then(|raw| parse_bool(&raw)),
        }
    }
}
