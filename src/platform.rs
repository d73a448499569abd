//! Ports to the systems the bot drives but does not implement: the chat
//! platform, the voice transport, and the media search/fetch backends.
//!
//! Serenity/songbird and yt-dlp provide the production implementations; the
//! `testing` module provides in-memory ones.

use std::path::Path;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use tokio::sync::oneshot;

use crate::error::Result;

/// Platform-neutral description of an embed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbedView {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub colour: u32,
    pub footer: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub id: String,
}

/// Metadata returned once the asset is present on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedMedia {
    pub title: String,
    pub artist: Option<String>,
    pub track: Option<String>,
    pub duration_seconds: u64,
    pub id: String,
}

/// A message as seen when reading channel history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: MessageId,
    pub author: UserId,
    pub has_embed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub emoji: String,
    pub actor_id: UserId,
    pub actor_is_bot: bool,
}

/// Fired by a voice gateway when the track it was handed ends on its own.
///
/// Gateways that cannot observe the end of a track simply drop it; the queue
/// manager then relies on its duration-based check.
#[derive(Debug)]
pub struct EndSignal(oneshot::Sender<()>);

impl EndSignal {
    pub fn channel() -> (EndSignal, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (EndSignal(tx), rx)
    }

    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn current_user(&self) -> UserId;

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageId>;
    async fn send_embed(&self, channel: ChannelId, embed: &EmbedView) -> Result<MessageId>;
    async fn edit_text(&self, channel: ChannelId, message: MessageId, text: &str) -> Result<()>;
    async fn edit_embed(&self, channel: ChannelId, message: MessageId, embed: &EmbedView) -> Result<()>;

    /// Recent messages of a channel, newest first.
    async fn history(&self, channel: ChannelId) -> Result<Vec<MessageSummary>>;
    /// The first `limit` messages ever posted in a channel, oldest first.
    async fn first_messages(&self, channel: ChannelId, limit: u64) -> Result<Vec<MessageSummary>>;

    async fn add_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str, user: UserId) -> Result<()>;
    /// Removes every user's reaction of `emoji`.
    async fn clear_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()>;

    /// Guild roles ordered lowest rank first.
    async fn roles_by_rank(&self, guild: GuildId) -> Result<Vec<RoleId>>;
    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>>;
    async fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()>;
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()>;
    async fn play(&self, guild: GuildId, asset: &Path, end: EndSignal) -> Result<()>;
    async fn pause(&self, guild: GuildId) -> Result<()>;
    async fn resume(&self, guild: GuildId) -> Result<()>;
    async fn stop(&self, guild: GuildId) -> Result<()>;
    async fn disconnect(&self, guild: GuildId) -> Result<()>;
}

#[async_trait]
pub trait MediaSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait MediaFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia>;
}
