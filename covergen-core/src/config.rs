use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoverError, Result};
use crate::keys::{CoverKeys, DEFAULT_NAMESPACE};
use crate::types::CoverFormat;

/// Policy knobs for the cover pipeline.
///
/// Every field carries a default so a deployment only needs to spell out
/// what it changes. None of these values are correctness requirements on
/// their own, with one exception: the lock TTL has to outlive the slowest
/// job (see [`PipelineConfig::check_lock_budget`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix for every coordination-store key.
    pub key_namespace: String,
    /// Where covers are written and how they are referenced.
    pub covers: CoverStorageConfig,
    /// Worker pool sizing and queue polling.
    pub worker: WorkerConfig,
    /// Per-video lock TTL and refresh cadence.
    pub lock: LockConfig,
    /// Per-job retry policy.
    pub retry: RetryConfig,
    /// Periodic self-healing scan.
    pub backfill: BackfillConfig,
    /// Remote image fetches (known cover URL and CDN guesses).
    pub fetch: FetchConfig,
    /// Generation from the source media.
    pub generate: GenerateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            key_namespace: DEFAULT_NAMESPACE.to_string(),
            covers: CoverStorageConfig::default(),
            worker: WorkerConfig::default(),
            lock: LockConfig::default(),
            retry: RetryConfig::default(),
            backfill: BackfillConfig::default(),
            fetch: FetchConfig::default(),
            generate: GenerateConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverStorageConfig {
    /// Directory holding `{videoId}.{format}` files.
    pub directory: PathBuf,
    /// Prefix stored in the record store in front of the file name.
    pub public_prefix: String,
    /// Target width in pixels; height follows the aspect ratio.
    pub width: u32,
    /// Output formats to try, most preferred first.
    pub formats: Vec<CoverFormat>,
}

impl Default for CoverStorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./uploads/covers"),
            public_prefix: "/uploads/covers".to_string(),
            width: 640,
            formats: CoverFormat::PRIORITY.to_vec(),
        }
    }
}

impl CoverStorageConfig {
    /// Reference persisted for a file name relative to the cover directory.
    pub fn public_reference(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_prefix.trim_end_matches('/'), file_name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops per process.
    pub concurrency: usize,
    /// Upper bound for a single blocking pop (milliseconds).
    pub pop_timeout_ms: u64,
    /// First delay after a store connectivity error (milliseconds).
    pub error_backoff_base_ms: u64,
    /// Ceiling for the connectivity backoff (milliseconds).
    pub error_backoff_max_ms: u64,
    /// Stop the pool after this many items. Unset in production.
    pub max_items: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            pop_timeout_ms: 5_000,
            error_backoff_base_ms: 1_000,
            error_backoff_max_ms: 30_000,
            max_items: None,
        }
    }
}

impl WorkerConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn error_backoff_base(&self) -> Duration {
        Duration::from_millis(self.error_backoff_base_ms)
    }

    pub fn error_backoff_max(&self) -> Duration {
        Duration::from_millis(self.error_backoff_max_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lifetime of a per-video lock (seconds). Expiry is the crash-recovery path.
    pub ttl_secs: u64,
    /// How often a worker re-extends its lock while a job runs (seconds).
    pub refresh_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            refresh_interval_secs: 60,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts re-queued before a job is abandoned.
    pub max_retries: u32,
    /// Fixed pause before a failed job is pushed back (milliseconds).
    pub retry_delay_ms: u64,
    /// Window after which old failures stop counting (seconds).
    pub counter_ttl_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
            counter_ttl_secs: 86_400,
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.counter_ttl_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub enabled: bool,
    /// Tick period (seconds).
    pub interval_secs: u64,
    /// Delay before the first tick after startup (seconds).
    pub initial_delay_secs: u64,
    /// Videos examined per tick.
    pub batch_size: usize,
    /// Lifetime of the cluster-wide scan lock (seconds). It is never released
    /// early, so it should stay just under `interval_secs`.
    pub lock_ttl_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            initial_delay_secs: 30,
            batch_size: 50,
            lock_ttl_secs: 540,
        }
    }
}

impl BackfillConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Timeout for downloading a known cover URL (milliseconds).
    pub timeout_ms: u64,
    /// Timeout shared by the raced CDN thumbnail guesses (milliseconds).
    pub heuristic_timeout_ms: u64,
    /// Largest accepted image body.
    pub max_bytes: usize,
    /// Optional outbound proxy for every fetch.
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            heuristic_timeout_ms: 5_000,
            max_bytes: 10 * 1024 * 1024,
            proxy: None,
            user_agent: concat!("covergen/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heuristic_timeout(&self) -> Duration {
        Duration::from_millis(self.heuristic_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    /// Budget for one generation attempt, all sample points included (seconds).
    pub timeout_secs: u64,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    /// Pause between attempts (milliseconds).
    pub retry_delay_ms: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            retries: 1,
            retry_delay_ms: 2_000,
        }
    }
}

impl GenerateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Slack for persisting the cover reference and releasing keys.
const PERSIST_MARGIN: Duration = Duration::from_secs(5);

/// Worst-case timing of one job against the lock that guards it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockBudget {
    pub job_time: Duration,
    pub refresh_interval: Duration,
    pub lock_ttl: Duration,
}

impl LockBudget {
    pub fn headroom(&self) -> Option<Duration> {
        self.job_time
            .checked_add(self.refresh_interval)
            .and_then(|needed| self.lock_ttl.checked_sub(needed))
            .filter(|headroom| !headroom.is_zero())
    }
}

impl PipelineConfig {
    pub fn keys(&self) -> CoverKeys {
        CoverKeys::new(self.key_namespace.clone())
    }

    /// Longest a single job can legitimately take with every fallback step
    /// running into its own timeout. `None` when the configured values
    /// overflow a `Duration`.
    pub fn job_time_budget(&self) -> Option<Duration> {
        let encode = self.generate.timeout();
        let known_cover = self.fetch.timeout().checked_add(encode)?;
        let cdn_guess = self.fetch.heuristic_timeout().checked_add(encode)?;
        let attempts = self.generate.retries.checked_add(1)?;
        let generation = self
            .generate
            .timeout()
            .checked_mul(attempts)?
            .checked_add(self.generate.retry_delay().checked_mul(self.generate.retries)?)?;
        known_cover
            .checked_add(cdn_guess)?
            .checked_add(generation)?
            .checked_add(PERSIST_MARGIN)
    }

    /// Fails when a slow but healthy worker could outlive its own lock.
    pub fn check_lock_budget(&self) -> Result<LockBudget> {
        let job_time = self.job_time_budget().ok_or_else(|| {
            CoverError::InvalidConfig(
                "fetch and generate timeouts are too large to compute a job budget".into(),
            )
        })?;
        let budget = LockBudget {
            job_time,
            refresh_interval: self.lock.refresh_interval(),
            lock_ttl: self.lock.ttl(),
        };
        if budget.headroom().is_none() {
            return Err(CoverError::InvalidConfig(format!(
                "lock TTL {}s must exceed worst-case job time {}s plus refresh interval {}s",
                budget.lock_ttl.as_secs(),
                budget.job_time.as_secs(),
                budget.refresh_interval.as_secs()
            )));
        }
        Ok(budget)
    }

    /// Structural checks plus the lock budget.
    pub fn validate(&self) -> Result<LockBudget> {
        if self.worker.concurrency == 0 {
            return Err(CoverError::InvalidConfig(
                "worker concurrency must be at least 1".into(),
            ));
        }
        if self.worker.pop_timeout_ms == 0 {
            return Err(CoverError::InvalidConfig(
                "pop timeout must be positive; zero would block forever".into(),
            ));
        }
        if self.covers.formats.is_empty() {
            return Err(CoverError::InvalidConfig(
                "at least one cover format is required".into(),
            ));
        }
        if self.covers.width == 0 {
            return Err(CoverError::InvalidConfig(
                "cover width must be positive".into(),
            ));
        }
        if self.backfill.enabled
            && (self.backfill.batch_size == 0 || self.backfill.interval_secs == 0)
        {
            return Err(CoverError::InvalidConfig(
                "backfill needs a positive batch size and interval".into(),
            ));
        }
        if self.lock.refresh_interval_secs == 0 {
            return Err(CoverError::InvalidConfig(
                "lock refresh interval must be positive".into(),
            ));
        }
        self.check_lock_budget()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fit_the_lock_budget() {
        let config = PipelineConfig::default();
        let budget = config.validate().expect("defaults are valid");
        assert!(budget.headroom().is_some());
        assert!(budget.job_time < budget.lock_ttl);
    }

    #[test]
    fn short_lock_ttl_is_rejected() {
        let mut config = PipelineConfig::default();
        config.lock.ttl_secs = 60;
        let err = config.check_lock_budget().expect_err("ttl too short");
        assert!(matches!(err, CoverError::InvalidConfig(_)));
    }

    #[test]
    fn job_budget_counts_every_generation_attempt() {
        let mut config = PipelineConfig::default();
        let base = config.job_time_budget().expect("budget");
        config.generate.retries += 1;
        let more = config.job_time_budget().expect("budget");
        assert_eq!(
            more - base,
            config.generate.timeout() + config.generate.retry_delay()
        );
    }

    #[test]
    fn overflowing_timeouts_are_rejected_not_panicking() {
        let mut config = PipelineConfig::default();
        config.generate.timeout_secs = u64::MAX;
        config.generate.retries = u32::MAX;
        assert_eq!(config.job_time_budget(), None);
        assert!(matches!(config.validate(), Err(CoverError::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.lock.refresh_interval_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(CoverError::InvalidConfig(_))));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let parsed: PipelineConfig = serde_json::from_str(
            r#"{"worker":{"concurrency":4},"retry":{"max_retries":1}}"#,
        )
        .expect("partial config parses");
        assert_eq!(parsed.worker.concurrency, 4);
        assert_eq!(parsed.worker.pop_timeout_ms, 5_000);
        assert_eq!(parsed.retry.max_retries, 1);
        assert_eq!(parsed.covers.formats, CoverFormat::PRIORITY.to_vec());
    }

    #[test]
    fn public_reference_joins_prefix_and_file() {
        let mut covers = CoverStorageConfig::default();
        assert_eq!(covers.public_reference("a.avif"), "/uploads/covers/a.avif");
        covers.public_prefix = "https://cdn.example/covers/".into();
        assert_eq!(covers.public_reference("a.avif"), "https://cdn.example/covers/a.avif");
    }
}
