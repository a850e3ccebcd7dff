use thiserror::Error;

use crate::types::VideoId;

#[derive(Error, Debug)]
pub enum CoverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "redis")]
    #[error("Coordination store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coordination store unavailable: {0}")]
    Store(String),

    #[error("Media tool failed: {0}")]
    Media(String),

    #[error("Not a usable image: {0}")]
    InvalidImage(String),

    #[error("Every cover source failed for video {0}")]
    Exhausted(VideoId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoverError>;
