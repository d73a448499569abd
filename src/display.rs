use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::Track;
use crate::platform::{ChatPlatform, EmbedView};

pub const DEFAULT_QUEUE_TEXT: &str = "**__Queue list:__**\nJoin a VoiceChannel and search a song by name or url.\nSupports YouTube";

const PREVIEW_COLOUR: u32 = 0xd462fd;
const PREVIEW_FOOTER: &str = "Use the prefix ! for commands";
const IDLE_PREVIEW_TITLE: &str = "No song playing currently";

/// What the preview embed should show. A paused track shows as idle.
#[derive(Clone, Copy, Debug)]
pub enum NowPlaying<'a> {
    Idle,
    Playing(&'a Track),
}

/// The music channel of a guild and its two tracked messages.
#[derive(Clone, Copy, Debug)]
struct MusicBoard {
    channel_id: ChannelId,
    preview: Option<MessageId>,
    listing: Option<MessageId>,
}

/// Keeps the preview embed and the queue listing of each music channel in
/// step with the queue manager.
pub struct DisplaySync {
    chat: Arc<dyn ChatPlatform>,
    boards: RwLock<HashMap<GuildId, MusicBoard>>,
}

impl DisplaySync {
    pub fn new(chat: Arc<dyn ChatPlatform>) -> DisplaySync {
        DisplaySync {
            chat,
            boards: RwLock::new(HashMap::new()),
        }
    }

    /// Records the music channel of a guild. Tracked messages are discovered on first render.
    pub async fn bind(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.boards.write().await.insert(
            guild_id,
            MusicBoard {
                channel_id,
                preview: None,
                listing: None,
            },
        );
    }

    /// Posts fresh tracked messages in `channel_id` and makes it the guild's music channel.
    pub async fn setup(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let preview = self.chat.send_embed(channel_id, &idle_preview()).await?;
        let listing = self.chat.send_text(channel_id, DEFAULT_QUEUE_TEXT).await?;

        info!("Music channel for guild {} is now {}", guild_id.0, channel_id.0);

        self.boards.write().await.insert(
            guild_id,
            MusicBoard {
                channel_id,
                preview: Some(preview),
                listing: Some(listing),
            },
        );

        Ok(())
    }

    pub async fn music_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.boards.read().await.get(&guild_id).map(|board| board.channel_id)
    }

    pub async fn bindings(&self) -> HashMap<GuildId, ChannelId> {
        self.boards
            .read()
            .await
            .iter()
            .map(|(guild_id, board)| (*guild_id, board.channel_id))
            .collect()
    }

    pub async fn render_queue(&self, guild_id: GuildId, queue: &[Track]) -> Result<()> {
        let Some((channel_id, _, listing)) = self.tracked_messages(guild_id).await? else {
            return Ok(());
        };

        self.chat.edit_text(channel_id, listing, &queue_listing(queue)).await
    }

    pub async fn render_preview(&self, guild_id: GuildId, now_playing: NowPlaying<'_>) -> Result<()> {
        let Some((channel_id, preview, _)) = self.tracked_messages(guild_id).await? else {
            return Ok(());
        };

        let embed = match now_playing {
            NowPlaying::Idle => idle_preview(),
            NowPlaying::Playing(track) => track_preview(track),
        };

        self.chat.edit_embed(channel_id, preview, &embed).await
    }

    pub async fn reset(&self, guild_id: GuildId) -> Result<()> {
        self.render_preview(guild_id, NowPlaying::Idle).await?;
        self.render_queue(guild_id, &[]).await
    }

    async fn tracked_messages(&self, guild_id: GuildId) -> Result<Option<(ChannelId, MessageId, MessageId)>> {
        let Some(board) = self.boards.read().await.get(&guild_id).copied() else {
            debug!("Guild {} has no music channel, skipping display update", guild_id.0);
            return Ok(None);
        };

        if let (Some(preview), Some(listing)) = (board.preview, board.listing) {
            return Ok(Some((board.channel_id, preview, listing)));
        }

        // Bindings loaded from disk only know the channel. Setup posts the
        // preview embed and then the listing, and anything the bot posted
        // later is a notice, so the listing is the oldest of the bot's text
        // messages newer than its newest embed.
        let bot = self.chat.current_user();
        let history = self.chat.history(board.channel_id).await?;
        let mut own = history.iter().filter(|message| message.author == bot);

        let mut newer_texts = Vec::new();
        let preview = own.find_map(|message| {
            if message.has_embed {
                Some(message.id)
            } else {
                newer_texts.push(message.id);
                None
            }
        });

        let (Some(preview), Some(&listing)) = (preview, newer_texts.last()) else {
            return Err(Error::NotFound(format!(
                "tracked music messages in channel {}",
                board.channel_id.0
            )));
        };

        let mut boards = self.boards.write().await;
        if let Some(board) = boards.get_mut(&guild_id) {
            board.preview = Some(preview);
            board.listing = Some(listing);
        }

        Ok(Some((board.channel_id, preview, listing)))
    }
}

pub fn queue_listing(queue: &[Track]) -> String {
    let mut contents = DEFAULT_QUEUE_TEXT.to_string();
    for track in queue {
        contents.push('\n');
        contents.push_str(&display_title(track));
    }
    contents
}

fn idle_preview() -> EmbedView {
    EmbedView {
        title: IDLE_PREVIEW_TITLE.to_string(),
        description: None,
        url: None,
        image_url: None,
        colour: PREVIEW_COLOUR,
        footer: Some(PREVIEW_FOOTER.to_string()),
    }
}

fn track_preview(track: &Track) -> EmbedView {
    EmbedView {
        title: display_title(track),
        description: None,
        url: Some(track.source_url.clone()),
        image_url: Some(format!("http://img.youtube.com/vi/{}/0.jpg", track.source_id)),
        colour: PREVIEW_COLOUR,
        footer: Some(PREVIEW_FOOTER.to_string()),
    }
}

/// `track - artist (m:s)` when both are known, otherwise the cleaned title.
pub fn display_title(track: &Track) -> String {
    let duration = format_duration(track.duration_seconds);
    match (&track.track_name, &track.artist) {
        (Some(name), Some(artist)) => format!("{name} - {artist} ({duration})"),
        _ => format!("{} ({duration})", strip_decorations(&track.title)),
    }
}

/// Unpadded `minutes:seconds`.
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{}", seconds / 60, seconds % 60)
}

pub fn strip_decorations(title: &str) -> String {
    static BRACKETED: OnceLock<Regex> = OnceLock::new();
    static TRAILING: OnceLock<Regex> = OnceLock::new();

    let bracketed = BRACKETED.get_or_init(|| {
        Regex::new(r"(?i)\s*[(\[][^)\]]*\b(?:lyrics?|audio)\b[^)\]]*[)\]]").expect("static decoration pattern")
    });
    let trailing = TRAILING.get_or_init(|| Regex::new(r"(?i)\s+\b(?:lyrics?|audio)\s*$").expect("static decoration pattern"));

    let stripped = bracketed.replace_all(title, "");
    trailing.replace(&stripped, "").trim().to_string()
}
