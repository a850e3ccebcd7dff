//! PostgreSQL adapter for the video table owned by the web application.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;

use super::{VideoCoverSource, VideoRecords};
use crate::error::{CoverError, Result};
use crate::types::VideoId;

/// Names of the table and columns the adapter reads and writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoTableSchema {
    pub table: String,
    pub id_column: String,
    pub source_url_column: String,
    pub cover_column: String,
    pub created_at_column: String,
}

impl Default for VideoTableSchema {
    fn default() -> Self {
        Self {
            table: "videos".into(),
            id_column: "id".into(),
            source_url_column: "video_url".into(),
            cover_column: "cover_url".into(),
            created_at_column: "created_at".into(),
        }
    }
}

fn quote_ident(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CoverError::InvalidConfig(format!(
            "`{name}` is not a plain SQL identifier"
        )));
    }
    Ok(format!("\"{name}\""))
}

#[derive(Debug)]
struct Statements {
    find_missing: String,
    cover_source: String,
    set_cover: String,
}

impl Statements {
    fn build(schema: &VideoTableSchema) -> Result<Self> {
        let table = quote_ident(&schema.table)?;
        let id = quote_ident(&schema.id_column)?;
        let source = quote_ident(&schema.source_url_column)?;
        let cover = quote_ident(&schema.cover_column)?;
        let created = quote_ident(&schema.created_at_column)?;

        Ok(Self {
            find_missing: format!(
                "SELECT {id}::text FROM {table} \
                 WHERE {cover} IS NULL OR btrim({cover}) = '' OR {cover} ~* '^https?://' \
                 ORDER BY {created} ASC LIMIT $1"
            ),
            cover_source: format!(
                "SELECT {source}::text, {cover}::text FROM {table} WHERE {id}::text = $1"
            ),
            set_cover: format!("UPDATE {table} SET {cover} = $2 WHERE {id}::text = $1"),
        })
    }
}

#[derive(Clone)]
pub struct PostgresVideoRecords {
    pool: PgPool,
    statements: std::sync::Arc<Statements>,
}

impl fmt::Debug for PostgresVideoRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresVideoRecords")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresVideoRecords {
    pub fn new(pool: PgPool, schema: &VideoTableSchema) -> Result<Self> {
        Ok(Self {
            pool,
            statements: std::sync::Arc::new(Statements::build(schema)?),
        })
    }
}

#[async_trait]
impl VideoRecords for PostgresVideoRecords {
    async fn find_videos_missing_cover(&self, limit: usize) -> Result<Vec<VideoId>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<String> = sqlx::query_scalar(&self.statements.find_missing)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        debug!(found = rows.len(), "videos missing covers");
        Ok(rows.iter().filter_map(|raw| VideoId::parse(raw)).collect())
    }

    async fn cover_source(&self, video_id: &VideoId) -> Result<Option<VideoCoverSource>> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as(&self.statements.cover_source)
                .bind(video_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(source_url, cover_url)| VideoCoverSource {
            source_url,
            cover_url,
        }))
    }

    async fn set_video_cover(&self, video_id: &VideoId, cover_path: &str) -> Result<()> {
        let result = sqlx::query(&self.statements.set_cover)
            .bind(video_id.as_str())
            .bind(cover_path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoverError::NotFound(format!("video {video_id}")));
        }
        Ok(())
    }
}
