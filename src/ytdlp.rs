#![forbid(unsafe_code)]

//! Secondary stream source backed by the `yt-dlp` executable.
//!
//! yt-dlp does its own extraction (signature deciphering included), so it
//! usually succeeds where the music API only hands out ciphered formats.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::formats::{FormatDescriptor, Ranking};
use crate::resolver::{Extraction, ResolveStrategy};

/// Best audio-only rendition, or the best overall one when there is none.
const FORMAT_SELECTOR: &str = "bestaudio/best";
const SOCKET_TIMEOUT_SECS: &str = "15";

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Subset of `yt-dlp --dump-single-json` used for stream resolution.
#[derive(Debug, Default, Deserialize)]
pub struct VideoInfo {
    pub url: Option<String>,
    #[serde(default)]
    pub formats: Option<Vec<FormatInfo>>,
}

#[derive(Debug, Deserialize)]
pub struct FormatInfo {
    format_id: Option<String>,
    url: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
}

impl From<FormatInfo> for FormatDescriptor {
    fn from(format: FormatInfo) -> Self {
        FormatDescriptor {
            tag: format.format_id.unwrap_or_default(),
            average_bitrate: format.abr,
            total_bitrate: format.tbr,
            audio_codec: format.acodec,
            video_codec: format.vcodec,
            url: format.url,
            ..FormatDescriptor::default()
        }
    }
}

impl VideoInfo {
    /// A top-level `url` means yt-dlp already applied the format selector.
    /// Otherwise the format list is ranked by average bitrate.
    pub fn into_extraction(self) -> Option<Extraction> {
        if let Some(url) = self.url.filter(|url| !url.is_empty()) {
            return Some(Extraction::Direct {
                url,
                mime_type: None,
            });
        }
        let formats = self.formats?;
        Some(Extraction::Candidates {
            formats: formats.into_iter().map(FormatDescriptor::from).collect(),
            ranking: Ranking::AverageBitrate,
        })
    }
}

pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn fetch_info(&self, video_id: &str) -> Result<VideoInfo> {
        let video_url = watch_url(video_id);
        let output = Command::new(&self.binary)
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("--socket-timeout")
            .arg(SOCKET_TIMEOUT_SECS)
            .arg("--format")
            .arg(FORMAT_SELECTOR)
            .arg(&video_url)
            .output()
            .with_context(|| {
                format!("launching {} for {video_url}", self.binary.display())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "yt-dlp failed for {} (status {}): {}",
                video_url,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout).context("parsing yt-dlp metadata response")
    }
}

impl ResolveStrategy for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn extract(&self, video_id: &str) -> Result<Option<Extraction>> {
        let info = self.fetch_info(video_id)?;
        let extraction = info.into_extraction();
        if extraction.is_none() {
            debug!(video_id, "yt-dlp returned neither a url nor formats");
        }
        Ok(extraction)
    }
}
