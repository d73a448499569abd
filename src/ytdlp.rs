use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::asset_path;
use crate::platform::{FetchedMedia, MediaFetch, MediaSearch, SearchHit};

/// One line of `yt-dlp -j --flat-playlist ytsearchN:…` output.
#[derive(Serialize, Deserialize)]
pub struct SearchEntry {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
}

/// The subset of `yt-dlp -j <url>` metadata the bot uses.
#[derive(Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub track: Option<String>,
    pub duration: Option<f64>,
}

/// Search and download through a local `yt-dlp` binary.
pub struct YtDlp {
    program: String,
    media_dir: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<String>, media_dir: PathBuf) -> YtDlp {
        YtDlp {
            program: program.into(),
            media_dir,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("Running {} {}", self.program, args.join(" "));

        let output: Output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|why| Error::External(format!("{} failed to start: {why}", self.program)))?;

        let stdout = String::from_utf8(output.stdout).map_err(|_| Error::External("Error reading stdout".to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::External(format!("{} exited with {}: {}", self.program, output.status, stderr.trim())));
        }

        Ok(stdout)
    }
}

/// yt-dlp's `-o` template for `path` with whatever extension it downloads.
/// A literal `%` in the title would otherwise be read as a field.
fn output_template(path: &Path) -> String {
    let stem = path.with_extension("");
    format!("{}.%(ext)s", stem.to_string_lossy().replace('%', "%%"))
}

pub fn parse_search_output(output: &str) -> Vec<SearchHit> {
    let lines: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();

    let hits: Vec<SearchHit> = lines
        .iter()
        .filter_map(|line| {
            let entry: SearchEntry = serde_json::from_str(line).ok()?;
            let link = entry
                .url
                .unwrap_or_else(|| format!("/watch?v={}", entry.id));

            Some(SearchHit {
                title: entry.title,
                link,
                id: entry.id,
            })
        })
        .collect();

    if hits.len() < lines.len() {
        warn!("Some search results have been skipped due to errors during parsing");
    }

    hits
}

#[async_trait]
impl MediaSearch for YtDlp {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let target = format!("ytsearch{max_results}:{query}");
        let output = self.run(&["-j", "--flat-playlist", &target]).await?;

        Ok(parse_search_output(&output))
    }
}

#[async_trait]
impl MediaFetch for YtDlp {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        let output = self.run(&["-j", "--no-playlist", url]).await?;
        let info: VideoInfo = serde_json::from_str(output.trim())?;

        let path = asset_path(&self.media_dir, &info.title, &info.id);

        if path.is_file() {
            info!("{} already downloaded", path.display());
        } else {
            info!("Downloading {url} to {}", path.display());

            let template = output_template(&path);
            self.run(&[
                "-f",
                "bestaudio/best",
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "192K",
                "--no-playlist",
                "-o",
                &template,
                url,
            ])
            .await?;

            if !path.is_file() {
                return Err(Error::External(format!("{} missing after download", path.display())));
            }
        }

        Ok(FetchedMedia {
            title: info.title,
            artist: info.artist,
            track: info.track,
            duration_seconds: info.duration.map(|seconds| seconds.round() as u64).unwrap_or(0),
            id: info.id,
        })
    }
}
