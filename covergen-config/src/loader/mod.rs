pub mod error;

use std::fs;
use std::path::{Path, PathBuf};

use covergen_core::{CoverFormat, PipelineConfig};
use url::Url;

use self::error::ConfigLoadError;
use super::models::sources::{EnvConfig, FileConfig};
use super::models::{
    Config, ConfigMetadata, DatabaseConfig, FfmpegConfig, RedisConfig, ServerConfig,
};
use super::validation::{self, ConfigWarnings};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["covergen.toml", "config/covergen.toml"];
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Skip creating the cover directory (read-only commands).
    pub skip_directories: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, read the process environment and compose the config.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Compose from an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;

        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No covergen.toml detected; using defaults and environment variables",
                "Create covergen.toml or pass --config to tune the pipeline",
            );
        }

        let config = compose_config(
            file_config.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;

        if !self.options.skip_directories {
            config
                .ensure_directories()
                .map_err(|source| ConfigLoadError::Filesystem { source })?;
        }

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // Explicit and env-provided paths must exist; default locations are optional.
        let path = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path: path.clone() });
                }
                path.clone()
            }
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        database: file_database,
        redis: file_redis,
        covers: file_covers,
        ffmpeg: file_ffmpeg,
        pipeline: file_pipeline,
        video_table: file_video_table,
        dev_mode: file_dev_mode,
    } = file;

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(3000),
    };

    let database_url = env
        .database_url
        .or(file_database.url)
        .filter(|url| !url.trim().is_empty());
    if let Some(url) = &database_url {
        check_url("database", url)?;
    }
    let database = DatabaseConfig {
        url: database_url,
        max_connections: file_database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
    };

    let redis = env
        .redis_url
        .or(file_redis.map(|redis| redis.url))
        .filter(|url| !url.trim().is_empty())
        .map(|url| check_url("redis", &url).map(|_| RedisConfig { url }))
        .transpose()?;

    let ffmpeg = FfmpegConfig {
        ffmpeg_path: env
            .ffmpeg_path
            .or(file_ffmpeg.ffmpeg_path)
            .unwrap_or_else(|| "ffmpeg".into()),
        ffprobe_path: env
            .ffprobe_path
            .or(file_ffmpeg.ffprobe_path)
            .unwrap_or_else(|| "ffprobe".into()),
    };

    let mut pipeline: PipelineConfig = file_pipeline.unwrap_or_default();

    let covers = &mut pipeline.covers;
    if let Some(directory) = env.cover_dir.or(file_covers.directory) {
        covers.directory = directory;
    }
    if let Some(prefix) = env.cover_public_prefix.or(file_covers.public_prefix) {
        covers.public_prefix = prefix;
    }
    if let Some(width) = env.cover_width.or(file_covers.width) {
        covers.width = width;
    }
    if let Some(names) = env.cover_formats {
        covers.formats = parse_formats(&names)?;
    } else if let Some(formats) = file_covers.formats {
        covers.formats = formats;
    }

    if let Some(namespace) = env.key_namespace {
        pipeline.key_namespace = namespace;
    }
    if let Some(concurrency) = env.worker_concurrency {
        pipeline.worker.concurrency = concurrency;
    }
    if let Some(max_retries) = env.max_retries {
        pipeline.retry.max_retries = max_retries;
    }
    if let Some(ttl) = env.lock_ttl_secs {
        pipeline.lock.ttl_secs = ttl;
    }
    if let Some(interval) = env.backfill_interval_secs {
        pipeline.backfill.interval_secs = interval;
    }
    if let Some(batch_size) = env.backfill_batch_size {
        pipeline.backfill.batch_size = batch_size;
    }
    if let Some(enabled) = env.backfill_enabled {
        pipeline.backfill.enabled = enabled;
    }

    Ok(Config {
        server,
        database,
        redis,
        ffmpeg,
        pipeline,
        video_table: file_video_table.unwrap_or_default(),
        dev_mode: env.dev_mode.or(file_dev_mode).unwrap_or(false),
        metadata,
    })
}

fn check_url(field: &'static str, raw: &str) -> Result<(), ConfigLoadError> {
    Url::parse(raw.trim())
        .map(|_| ())
        .map_err(|source| ConfigLoadError::InvalidUrl { field, source })
}

fn parse_formats(names: &[String]) -> Result<Vec<CoverFormat>, ConfigLoadError> {
    names
        .iter()
        .map(|name| {
            CoverFormat::from_extension(name)
                .ok_or_else(|| ConfigLoadError::UnknownCoverFormat { name: name.clone() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_names_are_rejected() {
        let err = parse_formats(&["webp".into(), "gif".into()]).expect_err("gif is not servable");
        assert!(matches!(err, ConfigLoadError::UnknownCoverFormat { name } if name == "gif"));
    }

    #[test]
    fn env_overrides_file_values() {
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            port = 4000

            [covers]
            width = 320

            [pipeline.worker]
            concurrency = 8
            "#,
        )
        .expect("parse");
        let env = EnvConfig {
            server_port: Some(5000),
            worker_concurrency: Some(3),
            ..EnvConfig::default()
        };

        let config = compose_config(file, env, ConfigMetadata::default()).expect("compose");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.pipeline.covers.width, 320);
        assert_eq!(config.pipeline.worker.concurrency, 3);
        assert!(config.redis.is_none());
    }
}
