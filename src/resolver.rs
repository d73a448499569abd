use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::config::Timings;
use crate::error::{Error, Result};
use crate::models::{asset_path, Track};
use crate::platform::{MediaFetch, MediaSearch, SearchHit};

const SEARCH_BASE_URL: &str = "https://youtube.com";

/// Turns user text into a downloaded, playable [`Track`].
pub struct SongResolver {
    search: Arc<dyn MediaSearch>,
    fetch: Arc<dyn MediaFetch>,
    media_dir: PathBuf,
    timings: Timings,
    url_pattern: Regex,
}

impl SongResolver {
    pub fn new(search: Arc<dyn MediaSearch>, fetch: Arc<dyn MediaFetch>, media_dir: PathBuf, timings: Timings) -> SongResolver {
        SongResolver {
            search,
            fetch,
            media_dir,
            timings,
            url_pattern: Regex::new(r"https?://\S+").expect("static url pattern"),
        }
    }

    pub fn is_url(&self, text: &str) -> bool {
        self.url_pattern.is_match(text)
    }

    pub async fn resolve(&self, text: &str) -> Result<Track> {
        let text = text.trim();
        let mut attempt = 0;

        loop {
            let url = if self.is_url(text) {
                info!("Input {text} is a url");
                text.to_string()
            } else {
                self.find_song(text).await?
            };

            match self.fetch.fetch(&url).await {
                Ok(media) => {
                    let track = Track {
                        asset_path: asset_path(&self.media_dir, &media.title, &media.id),
                        title: media.title,
                        artist: media.artist,
                        track_name: media.track,
                        duration_seconds: media.duration_seconds,
                        source_id: media.id,
                        source_url: url,
                    };

                    info!("Resolved {text} to {} ({}s) at {}", track.title, track.duration_seconds, track.asset_path.display());

                    return Ok(track);
                }
                Err(why) if attempt < self.timings.fetch_retries => {
                    attempt += 1;
                    warn!("Unable to fetch {url}: {why}, retry {attempt}/{}", self.timings.fetch_retries);
                }
                Err(why) => {
                    warn!("Giving up on {text}: {why}");
                    return Err(Error::ResolutionFailure(text.to_string()));
                }
            }
        }
    }

    /// Searches by title and returns the url of the first audio-only looking upload.
    async fn find_song(&self, query: &str) -> Result<String> {
        for attempt in 0..=self.timings.search_retries {
            if attempt > 0 {
                tokio::time::sleep(self.timings.search_backoff).await;
            }

            let hits = match self.search.search(query, self.timings.max_search_results).await {
                Ok(hits) => hits,
                Err(why) => {
                    warn!("Search for {query} failed: {why}");
                    continue;
                }
            };

            if let Some(hit) = hits.iter().find(|hit| is_audio_upload(hit)) {
                info!("Search for {query} picked {} ({})", hit.title, hit.id);
                return Ok(watch_url(hit));
            }

            info!("Search for {query} had no audio uploads, attempt {}", attempt + 1);
        }

        Err(Error::ResolutionFailure(query.to_string()))
    }
}

fn is_audio_upload(hit: &SearchHit) -> bool {
    let title = hit.title.to_lowercase();
    title.contains("lyric") || title.contains("audio")
}

fn watch_url(hit: &SearchHit) -> String {
    if hit.link.starts_with("http") {
        hit.link.clone()
    } else {
        format!("{SEARCH_BASE_URL}{}", hit.link)
    }
}
