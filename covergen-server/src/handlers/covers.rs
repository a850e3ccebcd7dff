use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use covergen_core::{CoverFormat, VideoId, processor::find_local_cover};
use httpdate::{fmt_http_date, parse_http_date};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::infra::app_state::AppState;

const COVER_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverRequestStatus {
    /// This request put the video on the queue.
    Queued,
    /// A job for the video was already in flight.
    Pending,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverAccepted {
    pub video_id: VideoId,
    pub status: CoverRequestStatus,
}

/// `GET /covers/{video_id}`
///
/// Serves the stored cover, or queues one and answers `202 Accepted`.
pub async fn get_cover(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(video_id) = VideoId::parse(&raw_id) else {
        return (StatusCode::BAD_REQUEST, "invalid video id").into_response();
    };

    if let Some((file_name, format)) = find_local_cover(&state.covers.directory, &video_id).await {
        return serve_cover_file(&state, &file_name, format, &headers).await;
    }

    let status = if state.pipeline.enqueue(&video_id).await {
        CoverRequestStatus::Queued
    } else {
        CoverRequestStatus::Pending
    };
    debug!(video_id = %video_id, ?status, "cover not ready");

    let mut response = (
        StatusCode::ACCEPTED,
        Json(CoverAccepted { video_id, status }),
    )
        .into_response();
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(state.retry_after_secs),
    );
    response
}

async fn serve_cover_file(
    state: &AppState,
    file_name: &str,
    format: CoverFormat,
    headers: &HeaderMap,
) -> Response {
    let path = state.covers.directory.join(file_name);

    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) => {
            error!("Failed to stat cover file {:?}: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let file_size = meta.len();
    let modified = meta.modified().unwrap_or_else(|e| {
        warn!("No modified time for {:?}: {}", path, e);
        UNIX_EPOCH
    });
    let last_modified = fmt_http_date(modified);

    // Weak ETag based on size and mtime
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let etag = format!("W/\"{file_size}-{secs}\"");

    if is_not_modified(headers, &etag, modified) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .header(header::LAST_MODIFIED, last_modified)
            .header(header::CACHE_CONTROL, COVER_CACHE_CONTROL)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::NOT_MODIFIED.into_response());
    }

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read cover file {:?}: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CONTENT_LENGTH, data.len().to_string())
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified)
        .header(header::CACHE_CONTROL, COVER_CACHE_CONTROL)
        .body(Body::from(data))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn is_not_modified(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        return if_none_match
            .split(',')
            .any(|tag| tag.trim() == etag || tag.trim() == "*");
    }

    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| parse_http_date(raw).ok())
        .is_some_and(|since| {
            // HTTP dates have one-second resolution.
            let modified_secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs());
            let since_secs = since.duration_since(UNIX_EPOCH).map(|d| d.as_secs());
            matches!((modified_secs, since_secs), (Ok(m), Ok(s)) if m <= s)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_none_match_takes_precedence() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_000);
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("W/\"1-2\""));
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_str(&fmt_http_date(modified)).expect("date header"),
        );
        assert!(!is_not_modified(&headers, "W/\"9-9\"", modified));
        assert!(is_not_modified(&headers, "W/\"1-2\"", modified));
    }

    #[test]
    fn if_modified_since_compares_whole_seconds() {
        let modified = UNIX_EPOCH + Duration::from_millis(5_400);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_str(&fmt_http_date(UNIX_EPOCH + Duration::from_secs(5)))
                .expect("date header"),
        );
        assert!(is_not_modified(&headers, "W/\"x\"", modified));
    }
}
