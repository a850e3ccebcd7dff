//! ffmpeg/ffprobe subprocess adapter.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::frames::{self, FrameStats};
use super::{GenerateOptions, MediaGenerator};
use crate::error::{CoverError, Result};
use crate::types::{CoverFormat, VideoId};

/// Fractions of the duration tried in order when the length is known.
const SAMPLE_FRACTIONS: [f64; 4] = [0.1, 0.25, 0.5, 0.75];
/// Absolute offsets (seconds) used for live or unprobeable sources.
const FALLBACK_OFFSETS: [f64; 4] = [1.0, 5.0, 15.0, 0.0];
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const STDERR_TAIL: usize = 400;

#[derive(Clone, Debug)]
pub struct FfmpegMediaGenerator {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Default for FfmpegMediaGenerator {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

/// Seek points for a source of the given length.
pub fn sample_offsets(duration_secs: Option<f64>) -> Vec<f64> {
    match duration_secs {
        Some(duration) if duration.is_finite() && duration > 0.0 => SAMPLE_FRACTIONS
            .iter()
            .map(|fraction| duration * fraction)
            .collect(),
        _ => FALLBACK_OFFSETS.to_vec(),
    }
}

fn codec_args(format: CoverFormat) -> &'static [&'static str] {
    match format {
        CoverFormat::Avif => &[
            "-c:v",
            "libaom-av1",
            "-still-picture",
            "1",
            "-crf",
            "32",
            "-cpu-used",
            "6",
            "-pix_fmt",
            "yuv420p",
        ],
        CoverFormat::Webp => &["-c:v", "libwebp", "-quality", "80"],
        CoverFormat::Jpeg => &["-c:v", "mjpeg", "-q:v", "3", "-update", "1"],
    }
}

impl FfmpegMediaGenerator {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<Vec<u8>> {
        debug!(program, ?args, "running media tool");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                CoverError::Media(format!("{program} timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| CoverError::Media(format!("failed to spawn {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(CoverError::Media(format!(
                "{program} exited with {}: {}",
                output.status,
                tail.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn probe_duration(&self, source_url: &str) -> Option<f64> {
        let args = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            source_url,
        ]
        .map(String::from);

        match self.run(&self.ffprobe_path, &args, PROBE_TIMEOUT).await {
            Ok(stdout) => String::from_utf8_lossy(&stdout).trim().parse::<f64>().ok(),
            Err(err) => {
                debug!(source = source_url, error = %err, "duration probe failed");
                None
            }
        }
    }

    async fn extract_frame(
        &self,
        source_url: &str,
        offset: f64,
        output: &Path,
        width: u32,
        timeout: Duration,
    ) -> Result<()> {
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-ss".into(),
            format!("{offset:.3}"),
            "-protocol_whitelist".into(),
            "file,http,https,tcp,tls,crypto".into(),
            "-i".into(),
            source_url.to_string(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            format!("scale={width}:-2"),
            "-f".into(),
            "image2".into(),
            "-c:v".into(),
            "png".into(),
            output.to_string_lossy().into_owned(),
        ];
        self.run(&self.ffmpeg_path, &args, timeout).await.map(|_| ())
    }

    /// Encode `input` into the first format that succeeds and move it into
    /// place under its final name. The staging file is removed when this
    /// future is dropped part-way, so a timed-out encode leaves nothing behind.
    async fn encode_into_place(
        &self,
        input: &Path,
        video_id: &VideoId,
        output_dir: &Path,
        options: &GenerateOptions,
    ) -> Result<String> {
        let mut last_error = None;
        for format in &options.formats {
            let final_name = format.file_name(video_id);
            let staging = tempfile::Builder::new()
                .prefix(&format!(".{video_id}."))
                .suffix(&format!(".{}", format.extension()))
                .tempfile_in(output_dir)?
                .into_temp_path();

            let mut args = vec![
                "-hide_banner".to_string(),
                "-loglevel".into(),
                "error".into(),
                "-y".into(),
                "-i".into(),
                input.to_string_lossy().into_owned(),
                "-frames:v".into(),
                "1".into(),
                "-vf".into(),
                format!("scale={}:-2", options.width),
            ];
            args.extend(codec_args(*format).iter().map(|arg| arg.to_string()));
            args.push(staging.to_string_lossy().into_owned());

            match self.run(&self.ffmpeg_path, &args, options.timeout).await {
                Ok(_) => {
                    if !staging_is_empty(&staging).await {
                        staging
                            .persist(output_dir.join(&final_name))
                            .map_err(|e| CoverError::Io(e.error))?;
                        return Ok(final_name);
                    }
                    last_error = Some(CoverError::Media(format!("{format} encode produced no data")));
                }
                Err(err) => {
                    debug!(video_id = %video_id, format = %format, error = %err, "encode failed; trying next format");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoverError::Media("no output formats configured".into())))
    }

    async fn generate_once(
        &self,
        source_url: &str,
        video_id: &VideoId,
        output_dir: &Path,
        options: &GenerateOptions,
    ) -> Result<String> {
        let scratch = tempfile::Builder::new()
            .prefix(".frames-")
            .tempdir_in(output_dir)?;

        let duration = self.probe_duration(source_url).await;
        let mut fallback: Option<(PathBuf, FrameStats)> = None;
        let mut chosen = None;

        for (index, offset) in sample_offsets(duration).into_iter().enumerate() {
            let frame_path = scratch.path().join(format!("frame-{index}.png"));
            if let Err(err) = self
                .extract_frame(source_url, offset, &frame_path, options.width, options.timeout)
                .await
            {
                debug!(video_id = %video_id, offset, error = %err, "frame extraction failed");
                continue;
            }

            let bytes = tokio::fs::read(&frame_path).await?;
            let stats = tokio::task::spawn_blocking(move || frames::frame_stats(&bytes))
                .await
                .map_err(|e| CoverError::Internal(format!("frame analysis task failed: {e}")))??;

            if !stats.is_blank() {
                chosen = Some(frame_path);
                break;
            }
            debug!(video_id = %video_id, offset, mean = stats.mean_luma, "sampled frame looks blank");
            if fallback
                .as_ref()
                .is_none_or(|(_, best)| stats.score() > best.score())
            {
                fallback = Some((frame_path, stats));
            }
        }

        let frame = match (chosen, fallback) {
            (Some(frame), _) => frame,
            (None, Some((frame, _))) => {
                warn!(video_id = %video_id, "every sampled frame looks blank; using the best of them");
                frame
            }
            (None, None) => {
                return Err(CoverError::Media(format!(
                    "no frame could be extracted from {source_url}"
                )));
            }
        };

        self.encode_into_place(&frame, video_id, output_dir, options).await
    }
}

async fn staging_is_empty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len() == 0)
        .unwrap_or(true)
}

#[async_trait]
impl MediaGenerator for FfmpegMediaGenerator {
    async fn resolve_or_generate_cover(
        &self,
        source_url: &str,
        video_id: &VideoId,
        output_dir: &Path,
        options: &GenerateOptions,
    ) -> Result<Option<String>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut last_error = None;
        for attempt in 0..=options.retries {
            if attempt > 0 {
                tokio::time::sleep(options.retry_delay).await;
            }
            // The attempt budget covers probing, every sample point and the encode.
            let attempt_result = tokio::time::timeout(
                options.timeout,
                self.generate_once(source_url, video_id, output_dir, options),
            )
            .await
            .unwrap_or_else(|_| {
                Err(CoverError::Media(format!(
                    "generation timed out after {}s",
                    options.timeout.as_secs()
                )))
            });

            match attempt_result {
                Ok(file_name) => {
                    info!(video_id = %video_id, file = %file_name, attempt, "cover generated from source media");
                    return Ok(Some(file_name));
                }
                Err(err) => {
                    warn!(video_id = %video_id, attempt, error = %err, "cover generation attempt failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn encode_still(
        &self,
        input: &Path,
        video_id: &VideoId,
        output_dir: &Path,
        options: &GenerateOptions,
    ) -> Result<Option<String>> {
        tokio::fs::create_dir_all(output_dir).await?;
        // One budget for the whole format fallback, not one per format.
        tokio::time::timeout(
            options.timeout,
            self.encode_into_place(input, video_id, output_dir, options),
        )
        .await
        .map_err(|_| {
            CoverError::Media(format!("encode timed out after {}s", options.timeout.as_secs()))
        })?
        .map(Some)
    }
}
