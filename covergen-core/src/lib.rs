//! # Covergen Core
//!
//! Cover-image pipeline for a video catalogue. Every video should end up
//! with a cover stored locally as `{videoId}.{format}` and referenced from
//! its record. Covers are produced asynchronously by a pool of workers that
//! may be spread over several processes sharing one coordination store.
//!
//! ## Feature Flags
//!
//! - `redis`: Redis-backed [`CoordinationStore`] for multi-process deployments
//! - `database`: PostgreSQL-backed [`VideoRecords`] via SQLx
//!
//! ## Architecture
//!
//! - [`store`]: the atomic primitives the pipeline needs from the shared store
//! - [`coordination`]: per-video locks and retry counters
//! - [`queue`]: the FIFO work queue and the lock-guarded enqueue API
//! - [`processor`]: the four-step fallback chain that resolves one cover
//! - [`media`]: frame sampling and encoding through ffmpeg
//! - [`worker`]: the pool that drains the queue
//! - [`backfill`]: the periodic scan for videos still missing a cover
//! - [`runtime`]: the lifecycle object that owns all of the above
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use covergen_core::{
//!     CoverPipeline, FfmpegMediaGenerator, InMemoryCoordinationStore, PipelineConfig,
//!     VideoId, VideoRecords,
//! };
//!
//! async fn run(records: Arc<dyn VideoRecords>) -> covergen_core::Result<()> {
//!     let pipeline = CoverPipeline::with_cover_processor(
//!         PipelineConfig::default(),
//!         Arc::new(InMemoryCoordinationStore::new()),
//!         records,
//!         Arc::new(FfmpegMediaGenerator::default()),
//!     )?;
//!     pipeline.start().await;
//!     pipeline.enqueue(&VideoId::new("intro-42")).await;
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backfill;
pub mod config;
pub mod coordination;
pub mod error;
pub mod keys;
pub mod media;
pub mod processor;
pub mod queue;
pub mod records;
pub mod runtime;
pub mod store;
pub mod types;
pub mod worker;

pub use backfill::{BackfillReport, BackfillScheduler};
pub use config::{LockBudget, PipelineConfig};
pub use coordination::{LockManager, RetryCounter};
pub use error::{CoverError, Result};
pub use keys::CoverKeys;
pub use media::{FfmpegMediaGenerator, GenerateOptions, MediaGenerator};
pub use processor::{CoverOutcome, CoverProcessor, CoverSource, JobProcessor};
pub use queue::{CoverEnqueuer, WorkQueue};
#[cfg(feature = "database")]
pub use records::{PostgresVideoRecords, VideoTableSchema};
pub use records::{VideoCoverSource, VideoRecords};
pub use runtime::CoverPipeline;
pub use store::{CoordinationStore, InMemoryCoordinationStore};
#[cfg(feature = "redis")]
pub use store::RedisCoordinationStore;
pub use types::{CoverFormat, VideoId};
pub use worker::{WorkerPool, WorkerStatsSnapshot};
