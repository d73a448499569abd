use std::collections::HashMap;
use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId, MessageId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{Error, Result};
use crate::models::RoleBinding;

/// First line of the role message; every following line is one binding.
pub const ROLE_HEADER: &str = "Roles:";

/// The designated role channel of a guild and its bindings in insertion order.
#[derive(Clone, Debug)]
pub struct RoleChannel {
    pub channel_id: ChannelId,
    pub message_id: Option<MessageId>,
    bindings: Vec<RoleBinding>,
}

impl RoleChannel {
    pub fn new(channel_id: ChannelId, message_id: Option<MessageId>, bindings: Vec<RoleBinding>) -> RoleChannel {
        RoleChannel {
            channel_id,
            message_id,
            bindings,
        }
    }

    pub fn bindings(&self) -> &[RoleBinding] {
        &self.bindings
    }

    pub fn get(&self, emoji: &str) -> Option<&RoleBinding> {
        self.bindings.iter().find(|binding| binding.emoji == emoji)
    }

    pub fn insert(&mut self, binding: RoleBinding) -> Result<()> {
        if self.get(&binding.emoji).is_some() {
            return Err(Error::Conflict(format!("{} is already bound", binding.emoji)));
        }
        self.bindings.push(binding);
        Ok(())
    }

    pub fn remove(&mut self, emoji: &str) -> Result<RoleBinding> {
        let index = self
            .bindings
            .iter()
            .position(|binding| binding.emoji == emoji)
            .ok_or_else(|| Error::NotFound(format!("{emoji} is not bound")))?;
        Ok(self.bindings.remove(index))
    }

    /// Full text of the role message for the current bindings.
    pub fn render(&self) -> String {
        let mut contents = ROLE_HEADER.to_string();
        for binding in &self.bindings {
            contents.push('\n');
            contents.push_str(&binding.render_line());
        }
        contents
    }
}

/// Process-wide owner of every guild's [`RoleChannel`], one lock per guild.
#[derive(Default)]
pub struct RoleStore {
    guilds: RwLock<HashMap<GuildId, Arc<Mutex<RoleChannel>>>>,
}

impl RoleStore {
    pub fn new() -> RoleStore {
        RoleStore::default()
    }

    /// Installs (or replaces) a guild's role channel.
    pub async fn insert(&self, guild_id: GuildId, channel: RoleChannel) {
        self.guilds.write().await.insert(guild_id, Arc::new(Mutex::new(channel)));
    }

    /// Exclusive access to one guild's bindings.
    pub async fn entry(&self, guild_id: GuildId) -> Option<OwnedMutexGuard<RoleChannel>> {
        let channel = self.guilds.read().await.get(&guild_id).cloned()?;
        Some(channel.lock_owned().await)
    }

    pub async fn channel_of(&self, guild_id: GuildId) -> Option<ChannelId> {
        Some(self.entry(guild_id).await?.channel_id)
    }

    pub async fn lookup(&self, guild_id: GuildId, emoji: &str) -> Option<RoleBinding> {
        self.entry(guild_id).await?.get(emoji).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<GuildId, RoleChannel> {
        let guilds: Vec<(GuildId, Arc<Mutex<RoleChannel>>)> = self
            .guilds
            .read()
            .await
            .iter()
            .map(|(guild_id, channel)| (*guild_id, channel.clone()))
            .collect();

        let mut snapshot = HashMap::with_capacity(guilds.len());
        for (guild_id, channel) in guilds {
            snapshot.insert(guild_id, channel.lock().await.clone());
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use serenity::model::id::RoleId;

    use super::*;

    fn binding(emoji: &str, role: u64, label: &str) -> RoleBinding {
        RoleBinding {
            emoji: emoji.to_string(),
            role_id: RoleId(role),
            label: label.to_string(),
        }
    }

    #[test]
    fn duplicate_emoji_is_a_conflict_and_leaves_bindings_alone() {
        let mut channel = RoleChannel::new(ChannelId(1), None, vec![binding("🎮", 5, "Gamers")]);
        let before = channel.bindings().to_vec();

        let result = channel.insert(binding("🎮", 6, "Other"));

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(channel.bindings(), before.as_slice());
    }

    #[test]
    fn render_keeps_insertion_order() {
        let mut channel = RoleChannel::new(ChannelId(1), None, Vec::new());
        channel.insert(binding("🎮", 5, "Gamers")).unwrap();
        channel.insert(binding("🎨", 6, "Artists")).unwrap();
        channel.insert(binding("📚", 7, "Readers")).unwrap();
        channel.remove("🎨").unwrap();

        assert_eq!(channel.render(), "Roles:\n🎮 - Gamers (<@&5>)\n📚 - Readers (<@&7>)");
    }

    #[test]
    fn removing_unknown_emoji_is_not_found() {
        let mut channel = RoleChannel::new(ChannelId(1), None, Vec::new());
        assert!(matches!(channel.remove("🎮"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn lookups_go_through_the_guild_entry() {
        let store = RoleStore::new();
        assert_eq!(store.channel_of(GuildId(1)).await, None);

        store
            .insert(GuildId(1), RoleChannel::new(ChannelId(2), None, vec![binding("🎮", 5, "Gamers")]))
            .await;

        assert_eq!(store.channel_of(GuildId(1)).await, Some(ChannelId(2)));
        assert_eq!(store.lookup(GuildId(1), "🎮").await.unwrap().role_id, RoleId(5));
        assert_eq!(store.lookup(GuildId(1), "🎨").await, None);
        assert_eq!(store.snapshot().await[&GuildId(1)].bindings().len(), 1);
    }
}
