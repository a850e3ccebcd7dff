//! Turns a loaded [`Config`] into a running pipeline.

use std::sync::Arc;

use anyhow::Context;
use covergen_config::Config;
use covergen_core::{
    CoordinationStore, CoverPipeline, FfmpegMediaGenerator, InMemoryCoordinationStore,
    PostgresVideoRecords, RedisCoordinationStore, VideoRecords,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

pub async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn CoordinationStore>> {
    match &config.redis {
        Some(redis) => {
            let store = RedisCoordinationStore::connect(&redis.url)
                .await
                .context("failed to connect to the Redis coordination store")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("using in-memory coordination store; locks are not shared across processes");
            Ok(Arc::new(InMemoryCoordinationStore::new()))
        }
    }
}

pub async fn connect_records(config: &Config) -> anyhow::Result<Arc<dyn VideoRecords>> {
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL is required to read and update video records")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    info!(
        table = %config.video_table.table,
        max_connections = config.database.max_connections,
        "connected to video record store"
    );
    let records = PostgresVideoRecords::new(pool, &config.video_table)
        .context("invalid video table schema")?;
    Ok(Arc::new(records))
}

/// Connect every collaborator and build the pipeline. Nothing is spawned
/// until [`CoverPipeline::start`].
pub async fn build_pipeline(config: &Config) -> anyhow::Result<Arc<CoverPipeline>> {
    let store = connect_store(config).await?;
    let records = connect_records(config).await?;
    let generator = Arc::new(FfmpegMediaGenerator::new(
        config.ffmpeg.ffmpeg_path.clone(),
        config.ffmpeg.ffprobe_path.clone(),
    ));

    let pipeline = CoverPipeline::with_cover_processor(
        config.pipeline.clone(),
        store,
        records,
        generator,
    )
    .context("failed to assemble the cover pipeline")?;
    Ok(Arc::new(pipeline))
}
