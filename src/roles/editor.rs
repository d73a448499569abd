use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::RoleBinding;
use crate::platform::{ChatPlatform, EmbedView};
use crate::roles::store::{RoleChannel, RoleStore, ROLE_HEADER};

const WELCOME_TITLE: &str = "Welcome";
const WELCOME_TEXT: &str = "To add roles for reactions use the !role command in this channel\nEnsure that you have 'Manage Roles' permission to do this!";

#[derive(Clone, Debug)]
pub struct AddRole {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub role_id: RoleId,
    pub emoji: String,
    pub label: String,
}

/// Applies `role add` / `role remove` to the store and to the role message.
pub struct RoleEditor {
    chat: Arc<dyn ChatPlatform>,
    store: Arc<RoleStore>,
}

impl RoleEditor {
    pub fn new(chat: Arc<dyn ChatPlatform>, store: Arc<RoleStore>) -> RoleEditor {
        RoleEditor { chat, store }
    }

    /// Makes `channel_id` the guild's role channel, with no bindings.
    pub async fn setup(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let welcome = EmbedView {
            title: WELCOME_TITLE.to_string(),
            description: Some(WELCOME_TEXT.to_string()),
            url: None,
            image_url: None,
            colour: 0xffffff,
            footer: None,
        };

        self.chat.send_embed(channel_id, &welcome).await?;
        let message = self.chat.send_text(channel_id, ROLE_HEADER).await?;

        self.store
            .insert(guild_id, RoleChannel::new(channel_id, Some(message), Vec::new()))
            .await;

        info!("Role channel for guild {} is now {}", guild_id.0, channel_id.0);

        Ok(())
    }

    pub async fn add(&self, request: AddRole) -> Result<()> {
        let mut entry = self.designated(request.guild_id, request.channel_id).await?;

        self.check_rank(request.guild_id, request.role_id).await?;

        if entry.get(&request.emoji).is_some() {
            info!("Not adding {} for guild {} as it already exists", request.emoji, request.guild_id.0);
            return Err(Error::Conflict(format!(
                "{} is already in use, remove it first to rebind it",
                request.emoji
            )));
        }

        info!(
            "Adding {} to guild {} with role {} and text {}",
            request.emoji, request.guild_id.0, request.role_id.0, request.label
        );

        let message = self.role_message(&mut entry).await?;
        let mut updated = entry.clone();
        updated.insert(RoleBinding {
            emoji: request.emoji.clone(),
            role_id: request.role_id,
            label: request.label,
        })?;

        self.chat.add_reaction(entry.channel_id, message, &request.emoji).await?;

        if let Err(why) = self.chat.edit_text(entry.channel_id, message, &updated.render()).await {
            if let Err(cleanup) = self.chat.clear_reaction(entry.channel_id, message, &request.emoji).await {
                warn!("Could not retract {} after failed edit: {cleanup}", request.emoji);
            }
            return Err(why);
        }

        *entry = updated;
        info!("Added {} to the reactions list of guild {}", request.emoji, request.guild_id.0);

        Ok(())
    }

    pub async fn remove(&self, guild_id: GuildId, channel_id: ChannelId, emoji: &str) -> Result<RoleBinding> {
        let mut entry = self.designated(guild_id, channel_id).await?;

        let mut updated = entry.clone();
        let removed = updated.remove(emoji)?;

        info!("Removing {emoji} from guild {}'s reaction roles", guild_id.0);

        let message = self.role_message(&mut entry).await?;
        self.chat.edit_text(entry.channel_id, message, &updated.render()).await?;
        if let Err(why) = self.chat.clear_reaction(entry.channel_id, message, emoji).await {
            warn!("Could not clear {emoji} from the role message: {why}");
        }

        updated.message_id = Some(message);
        *entry = updated;

        Ok(removed)
    }

    async fn designated(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<OwnedMutexGuard<RoleChannel>> {
        let entry = self
            .store
            .entry(guild_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("role channel for guild {}", guild_id.0)))?;

        if entry.channel_id != channel_id {
            return Err(Error::WrongChannel { valid: entry.channel_id });
        }

        Ok(entry)
    }

    /// The bot may hand out roles ranked at or below its own highest role.
    async fn check_rank(&self, guild_id: GuildId, role_id: RoleId) -> Result<()> {
        let ranking = self.chat.roles_by_rank(guild_id).await?;
        let rank_of = |role: &RoleId| ranking.iter().position(|ranked| ranked == role);

        let role_rank = rank_of(&role_id).ok_or_else(|| Error::NotFound(format!("role {}", role_id.0)))?;

        let bot_roles = self.chat.member_roles(guild_id, self.chat.current_user()).await?;
        let top_rank = bot_roles.iter().filter_map(rank_of).max().unwrap_or(0);

        if top_rank < role_rank {
            return Err(Error::PermissionDenied(format!(
                "<@&{}> is above my top role, I can only add roles that are below or equal to it",
                role_id.0
            )));
        }

        Ok(())
    }

    async fn role_message(&self, entry: &mut RoleChannel) -> Result<MessageId> {
        if let Some(message) = entry.message_id {
            return Ok(message);
        }

        // The role message is the second oldest in the channel, after the welcome embed.
        let first = self.chat.first_messages(entry.channel_id, 2).await?;
        let message = first
            .get(1)
            .map(|summary| summary.id)
            .ok_or_else(|| Error::NotFound(format!("role message in channel {}", entry.channel_id.0)))?;

        entry.message_id = Some(message);
        Ok(message)
    }
}
