use std::sync::Arc;

use serenity::model::id::RoleId;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::platform::{ChatPlatform, ReactionEvent};
use crate::roles::store::RoleStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionOutcome {
    IgnoredBot,
    IgnoredChannel,
    Unbound,
    Granted(RoleId),
}

/// Turns reactions in a guild's role channel into role grants.
///
/// The role channel works as a toggle surface: every reaction there is
/// retracted again, whether or not it matched a binding.
pub struct ReactionRouter {
    chat: Arc<dyn ChatPlatform>,
    store: Arc<RoleStore>,
}

impl ReactionRouter {
    pub fn new(chat: Arc<dyn ChatPlatform>, store: Arc<RoleStore>) -> ReactionRouter {
        ReactionRouter { chat, store }
    }

    pub async fn on_reaction_added(&self, event: &ReactionEvent) -> Result<ReactionOutcome> {
        if event.actor_is_bot {
            return Ok(ReactionOutcome::IgnoredBot);
        }

        if self.store.channel_of(event.guild_id).await != Some(event.channel_id) {
            debug!("Reaction in channel {} is not in a role channel", event.channel_id.0);
            return Ok(ReactionOutcome::IgnoredChannel);
        }

        info!("Received reaction {} from {}", event.emoji, event.actor_id.0);

        if let Err(why) = self
            .chat
            .remove_reaction(event.channel_id, event.message_id, &event.emoji, event.actor_id)
            .await
        {
            warn!("Could not retract reaction {} from {}: {why}", event.emoji, event.actor_id.0);
        }

        let Some(binding) = self.store.lookup(event.guild_id, &event.emoji).await else {
            info!("Ignoring {} as it is not in the reaction data", event.emoji);
            return Ok(ReactionOutcome::Unbound);
        };

        self.chat.grant_role(event.guild_id, event.actor_id, binding.role_id).await?;
        info!("Gave {} the {} role in guild {}", event.actor_id.0, binding.label, event.guild_id.0);

        Ok(ReactionOutcome::Granted(binding.role_id))
    }
}

#[cfg(test)]
mod tests {
    use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};

    use super::*;
    use crate::models::RoleBinding;
    use crate::roles::store::RoleChannel;
    use crate::testing::FakeChat;

    const GUILD: GuildId = GuildId(10);
    const ROLES: ChannelId = ChannelId(40);
    const MESSAGE: MessageId = MessageId(77);
    const USER: UserId = UserId(5);
    const GAMERS: RoleId = RoleId(100);

    async fn router() -> (Arc<FakeChat>, ReactionRouter) {
        let chat = Arc::new(FakeChat::default());
        let store = Arc::new(RoleStore::new());
        store
            .insert(
                GUILD,
                RoleChannel::new(
                    ROLES,
                    Some(MESSAGE),
                    vec![RoleBinding {
                        emoji: "🎮".to_string(),
                        role_id: GAMERS,
                        label: "Gamers".to_string(),
                    }],
                ),
            )
            .await;
        (chat.clone(), ReactionRouter::new(chat, store))
    }

    fn reaction(emoji: &str) -> ReactionEvent {
        ReactionEvent {
            guild_id: GUILD,
            channel_id: ROLES,
            message_id: MESSAGE,
            emoji: emoji.to_string(),
            actor_id: USER,
            actor_is_bot: false,
        }
    }

    #[tokio::test]
    async fn bound_emoji_grants_and_retracts() {
        let (chat, router) = router().await;

        let outcome = router.on_reaction_added(&reaction("🎮")).await.unwrap();

        assert_eq!(outcome, ReactionOutcome::Granted(GAMERS));
        assert_eq!(chat.grants(), vec![(GUILD, USER, GAMERS)]);
        assert_eq!(chat.removed_reactions(), vec![(MESSAGE, "🎮".to_string(), USER)]);
    }

    #[tokio::test]
    async fn unbound_emoji_is_retracted_without_grant() {
        let (chat, router) = router().await;

        let outcome = router.on_reaction_added(&reaction("🍕")).await.unwrap();

        assert_eq!(outcome, ReactionOutcome::Unbound);
        assert!(chat.grants().is_empty());
        assert_eq!(chat.removed_reactions(), vec![(MESSAGE, "🍕".to_string(), USER)]);
    }

    #[tokio::test]
    async fn bots_and_other_channels_are_ignored() {
        let (chat, router) = router().await;

        let from_bot = ReactionEvent {
            actor_is_bot: true,
            ..reaction("🎮")
        };
        assert_eq!(router.on_reaction_added(&from_bot).await.unwrap(), ReactionOutcome::IgnoredBot);

        let elsewhere = ReactionEvent {
            channel_id: ChannelId(41),
            ..reaction("🎮")
        };
        assert_eq!(router.on_reaction_added(&elsewhere).await.unwrap(), ReactionOutcome::IgnoredChannel);

        let other_guild = ReactionEvent {
            guild_id: GuildId(11),
            ..reaction("🎮")
        };
        assert_eq!(router.on_reaction_added(&other_guild).await.unwrap(), ReactionOutcome::IgnoredChannel);

        assert!(chat.grants().is_empty());
        assert!(chat.removed_reactions().is_empty());
    }

    #[tokio::test]
    async fn failed_retraction_still_grants() {
        let (chat, router) = router().await;
        chat.fail_reactions(true);

        let outcome = router.on_reaction_added(&reaction("🎮")).await.unwrap();

        assert_eq!(outcome, ReactionOutcome::Granted(GAMERS));
        assert_eq!(chat.grants().len(), 1);
    }
}
