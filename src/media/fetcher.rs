// src/media/fetcher.rs

//! Downloading and shrinking remote media.
//!
//! The heavy lifting is done by external tools (`yt-dlp`, `aria2c`,
//! `mogrify`, `gifsicle`); this module only decides which one to run and
//! bounds each invocation with a timeout.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use url::Url;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::models::media::MediaKind;

/// Stored in place of a local path when the asset could not be downloaded.
pub const UNAVAILABLE_REF: &str = "NA";

const IMAGE_CEILING_MB: f64 = 10.0;
const VIDEO_CEILING_MB: f64 = 100.0;
/// Gifs at or above this size are left alone; lossy passes rarely get them under the ceiling.
const GIF_SHRINK_LIMIT_MB: f64 = 40.0;

const MIN_WEBP_QUALITY: u32 = 5;
const MAX_GIF_LOSSY: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRef {
    Stored(String),
    Unavailable,
}

impl LocalRef {
    pub fn as_str(&self) -> &str {
        match self {
            LocalRef::Stored(path) => path,
            LocalRef::Unavailable => UNAVAILABLE_REF,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            LocalRef::Stored(path) => path,
            LocalRef::Unavailable => UNAVAILABLE_REF.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub local_ref: LocalRef,
    pub was_resized: bool,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Downloads `url` and returns where it ended up.
    ///
    /// A refused or failed download is not an error: it yields
    /// [`LocalRef::Unavailable`]. Errors are reserved for the tooling
    /// itself misbehaving (cannot spawn, timed out, transcode failed).
    async fn fetch(&self, kind: MediaKind, url: &str) -> IngestResult<FetchedMedia>;
}

/// Keeps every asset at its remote location. Used by `ingest --skip-media`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipFetcher;

#[async_trait]
impl MediaFetcher for SkipFetcher {
    async fn fetch(&self, _kind: MediaKind, url: &str) -> IngestResult<FetchedMedia> {
        Ok(FetchedMedia {
            local_ref: LocalRef::Stored(url.to_string()),
            was_resized: false,
        })
    }
}

/// What to do with a freshly downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    Keep,
    /// Video over the ceiling. Logged, never transcoded.
    OversizedVideo,
    ShrinkGif,
    /// Gif too large to shrink. Logged and kept as is.
    OversizedGif,
    ConvertToWebp { oversized: bool },
}

impl ResizePlan {
    pub fn decide(extension: &str, size_mb: f64) -> Self {
        match extension {
            "mp4" if size_mb > VIDEO_CEILING_MB => ResizePlan::OversizedVideo,
            "mp4" => ResizePlan::Keep,
            "gif" if size_mb > IMAGE_CEILING_MB && size_mb < GIF_SHRINK_LIMIT_MB => ResizePlan::ShrinkGif,
            "gif" if size_mb > IMAGE_CEILING_MB => ResizePlan::OversizedGif,
            "gif" => ResizePlan::Keep,
            _ if size_mb > IMAGE_CEILING_MB => ResizePlan::ConvertToWebp { oversized: true },
            "png" | "jpg" | "jpeg" => ResizePlan::ConvertToWebp { oversized: false },
            _ => ResizePlan::Keep,
        }
    }

    pub fn resizes(&self) -> bool {
        matches!(
            self,
            ResizePlan::ShrinkGif | ResizePlan::OversizedGif | ResizePlan::ConvertToWebp { oversized: true }
        )
    }
}

/// Extension of the first path segment, e.g. `https://i.redd.it/abc.png?x=1` -> `png`.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next()?;
    segment
        .split('.')
        .nth(1)
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_playlist(url: &str) -> bool {
    url.contains("m3u8")
}

fn default_extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "jpg",
        MediaKind::Gif => "gif",
        MediaKind::Video => "mp4",
    }
}

async fn file_size_mb(path: &Path) -> IngestResult<f64> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}

fn display_ref(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Fetches media by shelling out to the download and transcode tools.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    media_dir: PathBuf,
    timeout: Duration,
}

impl CommandFetcher {
    pub fn new(media_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            media_dir: media_dir.into(),
            timeout,
        }
    }

    /// Runs one tool to completion. The child is killed if the timeout fires.
    async fn run_tool(&self, program: &str, args: Vec<OsString>, url: &str) -> IngestResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(IngestError::MediaFetchFailed {
                url: url.to_string(),
                reason: format!("failed to spawn {program}: {e}"),
            }),
            Err(_) => Err(IngestError::MediaFetchFailed {
                url: url.to_string(),
                reason: format!("{program} timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }

    /// Like [`run_tool`](Self::run_tool) but a non-zero exit is an error too.
    async fn run_transcode(&self, program: &str, args: Vec<OsString>, url: &str) -> IngestResult<()> {
        let output = self.run_tool(program, args, url).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(IngestError::MediaFetchFailed {
            url: url.to_string(),
            reason: format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }

    /// Returns `None` when the remote refused the download.
    async fn download(&self, kind: MediaKind, url: &str) -> IngestResult<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.media_dir).await?;

        let stem = Uuid::new_v4().to_string();
        let (program, file_name, args) = if kind == MediaKind::Video && is_playlist(url) {
            let file_name = format!("{stem}.mp4");
            let target = self.media_dir.join(&file_name);
            let args = vec![OsString::from("-o"), target.into_os_string(), OsString::from(url)];
            ("yt-dlp", file_name, args)
        } else {
            let ext = url_extension(url).unwrap_or_else(|| default_extension(kind).to_string());
            let file_name = format!("{stem}.{ext}");
            let args = ["-j", "16", "-x", "16", "-s", "16", "-k", "1M"]
                .into_iter()
                .map(OsString::from)
                .chain([
                    OsString::from(url),
                    OsString::from("-d"),
                    self.media_dir.clone().into_os_string(),
                    OsString::from("-o"),
                    OsString::from(&file_name),
                ])
                .collect();
            ("aria2c", file_name, args)
        };

        let output = self.run_tool(program, args, url).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                target: "media_fetch",
                url,
                status = %output.status,
                stderr = %stderr.trim(),
                "{program} could not download asset"
            );
            return Ok(None);
        }

        Ok(Some(self.media_dir.join(file_name)))
    }

    async fn convert_to_webp(&self, path: &Path, url: &str) -> IngestResult<PathBuf> {
        let target = path.with_extension("webp");
        let mut quality = 100;
        loop {
            let args = vec![
                OsString::from("-format"),
                OsString::from("webp"),
                OsString::from("-quality"),
                OsString::from(quality.to_string()),
                path.as_os_str().to_os_string(),
            ];
            self.run_transcode("mogrify", args, url).await?;

            if file_size_mb(&target).await? < IMAGE_CEILING_MB || quality <= MIN_WEBP_QUALITY {
                break;
            }
            quality -= 5;
        }

        if target != path {
            tokio::fs::remove_file(path).await?;
        }
        Ok(target)
    }

    async fn shrink_gif(&self, path: &Path, url: &str) -> IngestResult<()> {
        let scratch = path.with_extension("lossy.gif");
        let mut lossy = 25;
        loop {
            let args = vec![
                OsString::from("-O3"),
                OsString::from(format!("--lossy={lossy}")),
                OsString::from("-o"),
                scratch.clone().into_os_string(),
                path.as_os_str().to_os_string(),
            ];
            self.run_transcode("gifsicle", args, url).await?;

            if file_size_mb(&scratch).await? < IMAGE_CEILING_MB || lossy >= MAX_GIF_LOSSY {
                break;
            }
            lossy += 5;
        }

        tokio::fs::rename(&scratch, path).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaFetcher for CommandFetcher {
    async fn fetch(&self, kind: MediaKind, url: &str) -> IngestResult<FetchedMedia> {
        let Some(path) = self.download(kind, url).await? else {
            return Ok(FetchedMedia {
                local_ref: LocalRef::Unavailable,
                was_resized: false,
            });
        };

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let size_mb = file_size_mb(&path).await?;
        let plan = ResizePlan::decide(&ext, size_mb);

        let stored = match plan {
            ResizePlan::Keep => path,
            ResizePlan::OversizedVideo | ResizePlan::OversizedGif => {
                tracing::warn!(target: "media_fetch", url, size_mb, "asset exceeds size ceiling, kept as is");
                path
            }
            ResizePlan::ShrinkGif => {
                tracing::info!(target: "media_fetch", url, size_mb, "shrinking gif");
                self.shrink_gif(&path, url).await?;
                path
            }
            ResizePlan::ConvertToWebp { oversized } => {
                if oversized {
                    tracing::info!(target: "media_fetch", url, size_mb, "shrinking image to webp");
                }
                self.convert_to_webp(&path, url).await?
            }
        };

        Ok(FetchedMedia {
            local_ref: LocalRef::Stored(display_ref(&stored)),
            was_resized: plan.resizes(),
        })
    }
}
