//! In-memory collaborators used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};

use crate::error::{Error, Result};
use crate::models::Track;
use crate::platform::{
    ChatPlatform, EmbedView, EndSignal, FetchedMedia, MediaFetch, MediaSearch, MessageSummary, SearchHit, VoiceGateway,
};

pub const BOT_ID: UserId = UserId(1);

pub fn track(title: &str, duration_seconds: u64) -> Track {
    Track {
        asset_path: PathBuf::from(format!("songs/{title}.mp3")),
        title: title.to_string(),
        artist: None,
        track_name: None,
        duration_seconds,
        source_id: format!("{title}-id"),
        source_url: format!("https://youtube.com/watch?v={title}-id"),
    }
}

#[derive(Default)]
struct ChatState {
    next_id: u64,
    texts: HashMap<MessageId, String>,
    embeds: HashMap<MessageId, EmbedView>,
    history: HashMap<ChannelId, Vec<MessageId>>,
    authors: HashMap<MessageId, UserId>,
    reactions: HashMap<MessageId, Vec<String>>,
    removed: Vec<(MessageId, String, UserId)>,
    roles: HashMap<GuildId, Vec<RoleId>>,
    member_roles: HashMap<(GuildId, UserId), Vec<RoleId>>,
    grants: Vec<(GuildId, UserId, RoleId)>,
    edits: usize,
    fail_reactions: bool,
    fail_edits: bool,
}

/// Matches the page size the Discord implementation asks for.
const HISTORY_PAGE: usize = 50;

#[derive(Default)]
pub struct FakeChat {
    state: Mutex<ChatState>,
}

impl FakeChat {
    fn post(&self, channel: ChannelId, author: UserId) -> MessageId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = MessageId(1000 + state.next_id);
        state.history.entry(channel).or_default().push(id);
        state.authors.insert(id, author);
        id
    }

    /// Posts a plain message as someone other than the bot.
    pub fn post_as(&self, channel: ChannelId, author: UserId, text: &str) -> MessageId {
        let id = self.post(channel, author);
        self.state.lock().unwrap().texts.insert(id, text.to_string());
        id
    }

    fn summary(state: &ChatState, id: MessageId) -> MessageSummary {
        MessageSummary {
            id,
            author: state.authors.get(&id).copied().unwrap_or(BOT_ID),
            has_embed: state.embeds.contains_key(&id),
        }
    }

    pub fn text_of(&self, message: MessageId) -> Option<String> {
        self.state.lock().unwrap().texts.get(&message).cloned()
    }

    pub fn embed_of(&self, message: MessageId) -> Option<EmbedView> {
        self.state.lock().unwrap().embeds.get(&message).cloned()
    }

    pub fn reactions_on(&self, message: MessageId) -> Vec<String> {
        self.state.lock().unwrap().reactions.get(&message).cloned().unwrap_or_default()
    }

    pub fn removed_reactions(&self) -> Vec<(MessageId, String, UserId)> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn edit_count(&self) -> usize {
        self.state.lock().unwrap().edits
    }

    pub fn set_roles(&self, guild: GuildId, roles: Vec<RoleId>) {
        self.state.lock().unwrap().roles.insert(guild, roles);
    }

    pub fn set_member_roles(&self, guild: GuildId, user: UserId, roles: Vec<RoleId>) {
        self.state.lock().unwrap().member_roles.insert((guild, user), roles);
    }

    pub fn grants(&self) -> Vec<(GuildId, UserId, RoleId)> {
        self.state.lock().unwrap().grants.clone()
    }

    pub fn fail_reactions(&self, fail: bool) {
        self.state.lock().unwrap().fail_reactions = fail;
    }

    pub fn fail_edits(&self, fail: bool) {
        self.state.lock().unwrap().fail_edits = fail;
    }
}

#[async_trait]
impl ChatPlatform for FakeChat {
    fn current_user(&self) -> UserId {
        BOT_ID
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageId> {
        let id = self.post(channel, BOT_ID);
        self.state.lock().unwrap().texts.insert(id, text.to_string());
        Ok(id)
    }

    async fn send_embed(&self, channel: ChannelId, embed: &EmbedView) -> Result<MessageId> {
        let id = self.post(channel, BOT_ID);
        self.state.lock().unwrap().embeds.insert(id, embed.clone());
        Ok(id)
    }

    async fn edit_text(&self, _channel: ChannelId, message: MessageId, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_edits {
            return Err(Error::External("edit rejected".to_string()));
        }
        state.edits += 1;
        state.texts.insert(message, text.to_string());
        Ok(())
    }

    async fn edit_embed(&self, _channel: ChannelId, message: MessageId, embed: &EmbedView) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.edits += 1;
        state.embeds.insert(message, embed.clone());
        Ok(())
    }

    async fn history(&self, channel: ChannelId) -> Result<Vec<MessageSummary>> {
        let state = self.state.lock().unwrap();
        let messages = state.history.get(&channel).cloned().unwrap_or_default();
        Ok(messages
            .into_iter()
            .rev()
            .take(HISTORY_PAGE)
            .map(|id| Self::summary(&state, id))
            .collect())
    }

    async fn first_messages(&self, channel: ChannelId, limit: u64) -> Result<Vec<MessageSummary>> {
        let state = self.state.lock().unwrap();
        let messages = state.history.get(&channel).cloned().unwrap_or_default();
        Ok(messages
            .into_iter()
            .take(limit as usize)
            .map(|id| Self::summary(&state, id))
            .collect())
    }

    async fn add_reaction(&self, _channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reactions {
            return Err(Error::External("reaction rejected".to_string()));
        }
        state.reactions.entry(message).or_default().push(emoji.to_string());
        Ok(())
    }

    async fn remove_reaction(&self, _channel: ChannelId, message: MessageId, emoji: &str, user: UserId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reactions {
            return Err(Error::External("reaction rejected".to_string()));
        }
        state.removed.push((message, emoji.to_string(), user));
        Ok(())
    }

    async fn clear_reaction(&self, _channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reactions) = state.reactions.get_mut(&message) {
            reactions.retain(|existing| existing != emoji);
        }
        Ok(())
    }

    async fn roles_by_rank(&self, guild: GuildId) -> Result<Vec<RoleId>> {
        Ok(self.state.lock().unwrap().roles.get(&guild).cloned().unwrap_or_default())
    }

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>> {
        Ok(self.state.lock().unwrap().member_roles.get(&(guild, user)).cloned().unwrap_or_default())
    }

    async fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.state.lock().unwrap().grants.push((guild, user, role));
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceCall {
    Connect(GuildId, ChannelId),
    Play(GuildId, PathBuf),
    Pause(GuildId),
    Resume(GuildId),
    Stop(GuildId),
    Disconnect(GuildId),
}

#[derive(Default)]
pub struct FakeVoice {
    calls: Mutex<Vec<VoiceCall>>,
    ends: Mutex<HashMap<GuildId, EndSignal>>,
}

impl FakeVoice {
    pub fn calls(&self) -> Vec<VoiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn plays(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                VoiceCall::Play(_, path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn disconnected(&self, guild: GuildId) -> bool {
        self.calls().contains(&VoiceCall::Disconnect(guild))
    }

    /// Simulates the transport reporting that the current track ended.
    pub fn finish(&self, guild: GuildId) {
        if let Some(end) = self.ends.lock().unwrap().remove(&guild) {
            end.fire();
        }
    }

    fn record(&self, call: VoiceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VoiceGateway for FakeVoice {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        self.record(VoiceCall::Connect(guild, channel));
        Ok(())
    }

    async fn play(&self, guild: GuildId, asset: &Path, end: EndSignal) -> Result<()> {
        self.record(VoiceCall::Play(guild, asset.to_path_buf()));
        self.ends.lock().unwrap().insert(guild, end);
        Ok(())
    }

    async fn pause(&self, guild: GuildId) -> Result<()> {
        self.record(VoiceCall::Pause(guild));
        Ok(())
    }

    async fn resume(&self, guild: GuildId) -> Result<()> {
        self.record(VoiceCall::Resume(guild));
        Ok(())
    }

    async fn stop(&self, guild: GuildId) -> Result<()> {
        self.record(VoiceCall::Stop(guild));
        Ok(())
    }

    async fn disconnect(&self, guild: GuildId) -> Result<()> {
        self.record(VoiceCall::Disconnect(guild));
        Ok(())
    }
}

/// Replays scripted result pages; the last page repeats once the script runs out.
#[derive(Default)]
pub struct FakeSearch {
    pages: Mutex<VecDeque<Vec<SearchHit>>>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl FakeSearch {
    pub fn with_pages(pages: Vec<Vec<SearchHit>>) -> FakeSearch {
        FakeSearch {
            pages: Mutex::new(pages.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn hit(title: &str, id: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        link: format!("/watch?v={id}"),
        id: id.to_string(),
    }
}

#[async_trait]
impl MediaSearch for FakeSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.calls.lock().unwrap().push((query.to_string(), max_results));
        let mut pages = self.pages.lock().unwrap();
        let page = if pages.len() > 1 {
            pages.pop_front().unwrap_or_default()
        } else {
            pages.front().cloned().unwrap_or_default()
        };
        Ok(page.into_iter().take(max_results).collect())
    }
}

/// Fails the first `failures` calls, then returns metadata derived from the url.
#[derive(Default)]
pub struct FakeFetch {
    failures: Mutex<u32>,
    urls: Mutex<Vec<String>>,
}

impl FakeFetch {
    pub fn failing(failures: u32) -> FakeFetch {
        FakeFetch {
            failures: Mutex::new(failures),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetch for FakeFetch {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        self.urls.lock().unwrap().push(url.to_string());

        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::External(format!("download of {url} failed")));
        }

        let id = url.rsplit('=').next().unwrap_or(url).to_string();
        Ok(FetchedMedia {
            title: format!("Title {id}"),
            artist: None,
            track: None,
            duration_seconds: 200,
            id,
        })
    }
}
