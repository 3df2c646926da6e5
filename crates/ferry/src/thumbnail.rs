//! Video thumbnails.
//!
//! Thumbnails are best-effort. Any failure here means the original
//! thumbnail (or none) goes out with the upload.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, warn};

use ferry_core::{ThumbnailMode, ThumbnailPolicy};

use crate::error::ExtractError;

/// Pulls a single JPEG frame out of a video.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Frame at `offset` from the start.
    async fn extract_frame(&self, video: Bytes, offset: Duration) -> Result<Bytes, ExtractError>;

    /// A representative frame chosen by scene analysis, skipping the first
    /// `skip` of the video.
    async fn smart_frame(&self, video: Bytes, skip: Duration) -> Result<Bytes, ExtractError>;
}

/// Frame extractor backed by `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    program: PathBuf,
    frame_timeout: Duration,
    smart_timeout: Duration,
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            frame_timeout: Duration::from_secs(30),
            smart_timeout: Duration::from_secs(60),
        }
    }
}

impl FfmpegFrameExtractor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Whether the binary can be spawned at all.
    pub async fn is_available(&self) -> bool {
        let mut command = Command::new(&self.program);
        command.arg("-version").kill_on_drop(true);
        matches!(
            tokio::time::timeout(Duration::from_secs(5), command.output()).await,
            Ok(Ok(output)) if output.status.success()
        )
    }

    async fn run(
        &self,
        video: Bytes,
        seek: Duration,
        filter: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Bytes> {
        let dir = tempfile::tempdir().context("creating scratch directory")?;
        let input = dir.path().join("input.mp4");
        let output_path = dir.path().join("frame.jpg");
        tokio::fs::write(&input, &video)
            .await
            .context("writing video to scratch directory")?;

        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", seek.as_secs_f64()))
            .arg("-i")
            .arg(&input);
        match filter {
            Some(filter) => command.arg("-vf").arg(filter).arg("-frames:v").arg("1"),
            None => command.arg("-vframes").arg("1"),
        };
        command
            .arg("-q:v")
            .arg("2")
            .arg(&output_path)
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| anyhow!("timed out after {timeout:?}"))?
            .with_context(|| format!("spawning {}", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let frame = tokio::fs::read(&output_path)
            .await
            .context("reading extracted frame")?;
        if frame.is_empty() {
            bail!("no frame written");
        }
        debug!(bytes = frame.len(), seek_ms = seek.as_millis() as u64, "frame extracted");
        Ok(Bytes::from(frame))
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_frame(&self, video: Bytes, offset: Duration) -> Result<Bytes, ExtractError> {
        self.run(video, offset, None, self.frame_timeout)
            .await
            .map_err(|e| ExtractError(format!("{e:#}")))
    }

    async fn smart_frame(&self, video: Bytes, skip: Duration) -> Result<Bytes, ExtractError> {
        match self
            .run(
                video.clone(),
                skip,
                Some("thumbnail,scale=1280:-1"),
                self.smart_timeout,
            )
            .await
        {
            Ok(frame) => Ok(frame),
            Err(e) => {
                debug!(error = %format!("{e:#}"), "scene selection failed, taking plain frame");
                self.extract_frame(video, skip).await
            }
        }
    }
}

/// Choose the thumbnail to upload with a video.
///
/// `video` is the leading part of the file. Falls back to `original` on any
/// extractor failure.
pub async fn acquire_thumbnail<F: FrameExtractor + ?Sized>(
    extractor: &F,
    policy: &ThumbnailPolicy,
    generate_offset: Duration,
    original: Option<Bytes>,
    video: Bytes,
) -> Option<Bytes> {
    let attempt = match policy.mode {
        ThumbnailMode::Original => return original,
        ThumbnailMode::Generate => extractor.extract_frame(video, generate_offset).await,
        ThumbnailMode::Smart => {
            let skip = Duration::from_secs(u64::from(policy.skip_seconds));
            extractor.smart_frame(video, skip).await
        }
    };

    match attempt {
        Ok(frame) if !frame.is_empty() => Some(frame),
        Ok(_) => {
            warn!("extractor returned an empty frame, keeping original thumbnail");
            original
        }
        Err(e) => {
            warn!(error = %e, "keeping original thumbnail");
            original
        }
    }
}
