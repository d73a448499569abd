use std::path::{Path, PathBuf};
use std::time::Duration;

use serenity::model::id::{ChannelId, GuildId, RoleId};

/// A resolved, playable song. Never mutated once the resolver hands it out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub asset_path: PathBuf,
    pub title: String,
    pub artist: Option<String>,
    pub track_name: Option<String>,
    pub duration_seconds: u64,
    pub source_id: String,
    pub source_url: String,
}

impl Track {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }
}

/// Handle to an active voice session. One per guild.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// One emoji → role line of a guild's role message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleBinding {
    pub emoji: String,
    pub role_id: RoleId,
    pub label: String,
}

impl RoleBinding {
    pub fn render_line(&self) -> String {
        format!("{} - {} (<@&{}>)", self.emoji, self.label, self.role_id.0)
    }
}

/// Where the fetcher stores the audio for a given title and source id.
pub fn asset_path(media_dir: &Path, title: &str, source_id: &str) -> PathBuf {
    let safe_title: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();

    media_dir.join(format!("{safe_title}-{source_id}.mp3"))
}
