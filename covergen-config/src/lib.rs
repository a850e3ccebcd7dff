//! Configuration for the covergen service.
//!
//! Settings come from an optional TOML file with environment variables
//! layered on top (a `.env` file is loaded first when present). The
//! resulting [`Config`] has passed the guard rails in [`validation`]; soft
//! problems are reported as [`ConfigWarnings`] for the caller to log.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{Config, ConfigMetadata, DatabaseConfig, FfmpegConfig, RedisConfig, ServerConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
