//! Local media toolchain: `image` for stills, an `ffmpeg` subprocess for video.
//!
//! Implements the `tmm-core` `MediaConverter` and `Thumbnailer` ports.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use tmm_core::{
    config::Config,
    domain::MediaKind,
    errors::Error,
    ports::{Converted, MediaConverter, Thumbnailer},
    Result,
};

pub mod ffmpeg;
pub mod photo;

#[derive(Clone, Debug)]
pub struct MediaSettings {
    pub ffmpeg_path: PathBuf,
    pub video_bitrate: String,
    pub jpeg_quality: u8,
    pub thumbnail_size: u32,
    pub thumbnail_quality: u8,
    /// Parent directory for per-conversion scratch directories.
    pub temp_dir: PathBuf,
}

impl MediaSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            video_bitrate: cfg.video_bitrate.clone(),
            jpeg_quality: cfg.jpeg_quality,
            thumbnail_size: cfg.thumbnail_size,
            thumbnail_quality: cfg.thumbnail_quality,
            temp_dir: cfg.temp_dir.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MediaToolkit {
    settings: MediaSettings,
}

impl MediaToolkit {
    pub fn new(settings: MediaSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MediaSettings {
        &self.settings
    }

    async fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        tempfile::Builder::new()
            .prefix("tmm-")
            .tempdir_in(&self.settings.temp_dir)
            .map_err(|e| Error::InvalidPath {
                path: self.settings.temp_dir.clone(),
                reason: format!("cannot create scratch directory: {e}"),
            })
    }

    async fn transcode_video(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        let dir = self.scratch_dir().await?;
        let input = dir.path().join("input");
        let output = dir.path().join("output.mp4");
        tokio::fs::write(&input, &raw).await?;

        let inv = ffmpeg::transcode_invocation(
            &self.settings.ffmpeg_path,
            &input,
            &output,
            &self.settings.video_bitrate,
        );
        ffmpeg::run(&inv).await?;
        read_output(&output).await
    }

    async fn video_frame(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        let dir = self.scratch_dir().await?;
        let input = dir.path().join("input");
        let frame = dir.path().join("frame.jpg");
        tokio::fs::write(&input, &raw).await?;

        let inv = ffmpeg::frame_invocation(&self.settings.ffmpeg_path, &input, &frame);
        ffmpeg::run(&inv).await?;
        read_output(&frame).await
    }
}

async fn read_output(path: &Path) -> Result<Vec<u8>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::Conversion("ffmpeg produced no output".to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        return Err(Error::Conversion("ffmpeg produced an empty file".to_string()));
    }
    Ok(bytes)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::External(format!("media worker failed: {e}")))?
}

fn unsupported(kind: MediaKind) -> Error {
    Error::Conversion(format!("unsupported media kind: {}", kind.as_str()))
}

#[async_trait]
impl MediaConverter for MediaToolkit {
    async fn convert(&self, raw: Vec<u8>, kind: MediaKind) -> Result<Converted> {
        debug!(kind = kind.as_str(), bytes = raw.len(), "converting media");
        match kind {
            MediaKind::Photo => {
                let quality = self.settings.jpeg_quality;
                let bytes = blocking(move || photo::reencode_jpeg(&raw, quality)).await?;
                Ok(Converted {
                    bytes,
                    extension: "jpg".to_string(),
                    content_type: "image/jpeg".to_string(),
                })
            }
            MediaKind::Video => {
                let bytes = self.transcode_video(raw).await?;
                Ok(Converted {
                    bytes,
                    extension: "mp4".to_string(),
                    content_type: "video/mp4".to_string(),
                })
            }
            MediaKind::Other => Err(unsupported(kind)),
        }
    }
}

#[async_trait]
impl Thumbnailer for MediaToolkit {
    async fn thumbnail(&self, raw: Vec<u8>, kind: MediaKind) -> Result<Vec<u8>> {
        let still = match kind {
            MediaKind::Photo => raw,
            MediaKind::Video => self.video_frame(raw).await?,
            MediaKind::Other => return Err(unsupported(kind)),
        };
        let size = self.settings.thumbnail_size;
        let quality = self.settings.thumbnail_quality;
        blocking(move || photo::thumbnail_jpeg(&still, size, quality)).await
    }
}
