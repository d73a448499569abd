use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_DATA_FILE: &str = "data.json";
const DEFAULT_MEDIA_DIR: &str = "songs";
const DEFAULT_PREFIX: &str = "!";
const DEFAULT_YTDLP: &str = "yt-dlp";

/// Delays and retry counts used by the queue manager and the song resolver.
#[derive(Clone, Debug)]
pub struct Timings {
    /// How long a connection may sit with an empty queue before it is dropped.
    pub idle_grace: Duration,
    pub idle_poll: Duration,
    /// Added to a track's declared duration before the fallback completion check fires.
    pub completion_margin: Duration,
    pub search_backoff: Duration,
    pub search_retries: u32,
    pub fetch_retries: u32,
    pub max_search_results: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            idle_grace: Duration::from_secs(50),
            idle_poll: Duration::from_secs(10),
            completion_margin: Duration::from_secs(3),
            search_backoff: Duration::from_secs(1),
            search_retries: 5,
            fetch_retries: 3,
            max_search_results: 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub token: String,
    pub data_file: PathBuf,
    pub media_dir: PathBuf,
    pub prefix: String,
    pub ytdlp: String,
    pub timings: Timings,
}

impl Settings {
    /// Reads settings from the process environment. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> Result<Settings> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Settings> {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Config("Expected DISCORD_TOKEN in the environment".to_string()))?;

        let value_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Settings {
            token,
            data_file: PathBuf::from(value_or("MULTIBOT_DATA_FILE", DEFAULT_DATA_FILE)),
            media_dir: PathBuf::from(value_or("MULTIBOT_MEDIA_DIR", DEFAULT_MEDIA_DIR)),
            prefix: value_or("MULTIBOT_PREFIX", DEFAULT_PREFIX),
            ytdlp: value_or("MULTIBOT_YTDLP", DEFAULT_YTDLP),
            timings: Timings::default(),
        })
    }
}
