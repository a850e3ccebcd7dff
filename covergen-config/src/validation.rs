use covergen_core::CoverError;
use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("REDIS_URL is required when DEV_MODE is false; in-memory coordination only works within one process")]
    MissingCoordinationStore,
    #[error("invalid pipeline configuration: {0}")]
    InvalidPipeline(#[source] CoverError),
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    /// Log every warning at `warn`.
    pub fn log(&self) {
        for warning in &self.items {
            match &warning.hint {
                Some(hint) => {
                    tracing::warn!(message = %warning.message, hint = %hint, "configuration warning")
                }
                None => tracing::warn!(message = %warning.message, "configuration warning"),
            }
        }
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    config
        .pipeline
        .validate()
        .map_err(ConfigGuardRailError::InvalidPipeline)?;

    if config.redis.is_none() {
        if !config.dev_mode {
            return Err(ConfigGuardRailError::MissingCoordinationStore);
        }
        warnings.push_with_hint(
            "REDIS_URL not configured; using in-memory coordination",
            "Locks and the queue are process-local; run a single instance or set REDIS_URL",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL not configured; the service cannot read or update video records",
            "Set DATABASE_URL or add a [database] url to the config file",
        );
    }

    let backfill = &config.pipeline.backfill;
    if backfill.enabled && backfill.lock_ttl_secs > backfill.interval_secs {
        warnings.push_with_hint(
            format!(
                "backfill lock TTL {}s exceeds the backfill interval {}s; some ticks will find the lock still held",
                backfill.lock_ttl_secs, backfill.interval_secs
            ),
            "Keep pipeline.backfill.lock_ttl_secs slightly below interval_secs",
        );
    }

    if config.pipeline.worker.max_items.is_some() {
        warnings.push("worker.max_items is set; workers stop after that many items");
    }

    Ok(warnings)
}
