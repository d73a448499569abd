//! Serenity and songbird backed implementations of the platform ports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serenity::builder::CreateEmbed;
use serenity::http::Http;
use serenity::model::channel::{Message, ReactionType};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use songbird::tracks::TrackHandle;
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::platform::{ChatPlatform, EmbedView, EndSignal, MessageSummary, VoiceGateway};

const HISTORY_LIMIT: u64 = 50;

pub struct DiscordChat {
    http: Arc<Http>,
    bot_id: UserId,
}

impl DiscordChat {
    pub fn new(http: Arc<Http>, bot_id: UserId) -> DiscordChat {
        DiscordChat { http, bot_id }
    }
}

fn reaction(emoji: &str) -> Result<ReactionType> {
    ReactionType::try_from(emoji).map_err(|_| Error::External(format!("{emoji} is not a usable emoji")))
}

fn summarize(message: &Message) -> MessageSummary {
    MessageSummary {
        id: message.id,
        author: message.author.id,
        has_embed: !message.embeds.is_empty(),
    }
}

fn apply_embed<'a>(e: &'a mut CreateEmbed, view: &EmbedView) -> &'a mut CreateEmbed {
    e.title(&view.title).colour(view.colour);

    if let Some(description) = &view.description {
        e.description(description);
    }
    if let Some(url) = &view.url {
        e.url(url);
    }
    if let Some(image) = &view.image_url {
        e.image(image);
    }
    if let Some(footer) = &view.footer {
        e.footer(|f| f.text(footer));
    }

    e
}

#[async_trait]
impl ChatPlatform for DiscordChat {
    fn current_user(&self) -> UserId {
        self.bot_id
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageId> {
        let message = channel.send_message(&self.http, |m| m.content(text)).await?;
        Ok(message.id)
    }

    async fn send_embed(&self, channel: ChannelId, embed: &EmbedView) -> Result<MessageId> {
        let message = channel
            .send_message(&self.http, |m| m.embed(|e| apply_embed(e, embed)))
            .await?;
        Ok(message.id)
    }

    async fn edit_text(&self, channel: ChannelId, message: MessageId, text: &str) -> Result<()> {
        channel.edit_message(&self.http, message, |m| m.content(text)).await?;
        Ok(())
    }

    async fn edit_embed(&self, channel: ChannelId, message: MessageId, embed: &EmbedView) -> Result<()> {
        channel
            .edit_message(&self.http, message, |m| m.embed(|e| apply_embed(e, embed)))
            .await?;
        Ok(())
    }

    async fn history(&self, channel: ChannelId) -> Result<Vec<MessageSummary>> {
        let messages = channel.messages(&self.http, |retriever| retriever.limit(HISTORY_LIMIT)).await?;
        Ok(messages.iter().map(summarize).collect())
    }

    async fn first_messages(&self, channel: ChannelId, limit: u64) -> Result<Vec<MessageSummary>> {
        let mut messages = channel
            .messages(&self.http, |retriever| retriever.after(MessageId(1)).limit(limit))
            .await?;
        messages.sort_by_key(|message| message.id);
        Ok(messages.iter().map(summarize).collect())
    }

    async fn add_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        channel.create_reaction(&self.http, message, reaction(emoji)?).await?;
        Ok(())
    }

    async fn remove_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str, user: UserId) -> Result<()> {
        channel.delete_reaction(&self.http, message, Some(user), reaction(emoji)?).await?;
        Ok(())
    }

    async fn clear_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        channel.delete_reaction_emoji(&self.http, message, reaction(emoji)?).await?;
        Ok(())
    }

    async fn roles_by_rank(&self, guild: GuildId) -> Result<Vec<RoleId>> {
        let mut roles = self.http.get_guild_roles(guild.0).await?;
        roles.sort_by_key(|role| (role.position, role.id));
        Ok(roles.into_iter().map(|role| role.id).collect())
    }

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>> {
        let member = self.http.get_member(guild.0, user.0).await?;
        Ok(member.roles)
    }

    async fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.http.add_member_role(guild.0, user.0, role.0, None).await?;
        Ok(())
    }
}

pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    tracks: Mutex<HashMap<GuildId, TrackHandle>>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>) -> SongbirdVoice {
        SongbirdVoice {
            manager,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    async fn track(&self, guild: GuildId) -> Result<TrackHandle> {
        self.tracks
            .lock()
            .await
            .get(&guild)
            .cloned()
            .ok_or_else(|| Error::NotFound("nothing is playing".to_string()))
    }
}

fn voice_error(why: impl std::fmt::Display) -> Error {
    Error::External(why.to_string())
}

#[async_trait]
impl VoiceGateway for SongbirdVoice {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        let (handler_lock, joined) = self.manager.join(guild, channel).await;
        joined.map_err(voice_error)?;

        let mut handler = handler_lock.lock().await;
        if handler.is_deaf() {
            debug!("Already deafened in guild {}", guild.0);
        } else if let Err(why) = handler.deafen(true).await {
            info!("Deafen failed due to {why:?}");
        }

        Ok(())
    }

    async fn play(&self, guild: GuildId, asset: &Path, end: EndSignal) -> Result<()> {
        let handler_lock = self
            .manager
            .get(guild)
            .ok_or_else(|| Error::NotFound("not in a voice channel".to_string()))?;

        let source = songbird::ffmpeg(asset).await.map_err(voice_error)?;

        let mut handler = handler_lock.lock().await;
        handler.stop(); // Just in case something was playing before
        let track_handle = handler.play_source(source);

        track_handle
            .add_event(Event::Track(TrackEvent::End), TrackEndNotifier::new(end))
            .map_err(voice_error)?;

        self.tracks.lock().await.insert(guild, track_handle);

        Ok(())
    }

    async fn pause(&self, guild: GuildId) -> Result<()> {
        self.track(guild).await?.pause().map_err(voice_error)
    }

    async fn resume(&self, guild: GuildId) -> Result<()> {
        self.track(guild).await?.play().map_err(voice_error)
    }

    async fn stop(&self, guild: GuildId) -> Result<()> {
        self.tracks.lock().await.remove(&guild);

        if let Some(handler_lock) = self.manager.get(guild) {
            handler_lock.lock().await.stop();
        }

        Ok(())
    }

    async fn disconnect(&self, guild: GuildId) -> Result<()> {
        self.tracks.lock().await.remove(&guild);

        if self.manager.get(guild).is_some() {
            self.manager.remove(guild).await.map_err(voice_error)?;
        }

        Ok(())
    }
}

/// Forwards songbird's end-of-track event to the queue manager.
struct TrackEndNotifier {
    end: StdMutex<Option<EndSignal>>,
}

impl TrackEndNotifier {
    fn new(end: EndSignal) -> TrackEndNotifier {
        TrackEndNotifier {
            end: StdMutex::new(Some(end)),
        }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("End notifier triggered");

        let end = match self.end.lock() {
            Ok(mut end) => end.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(end) = end {
            end.fire();
        }

        None
    }
}
