//! The on-disk document holding every guild's channel bindings.
//!
//! Shape: `{"<guild>": {"music": <channel>, "category": <channel>, "react": {"<channel>": {"<emoji>": [<role>, "<label>"]}}}}`.
//! Read once at startup and written once at shutdown.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serenity::model::id::{ChannelId, GuildId, RoleId};
use tracing::{info, warn};

use crate::display::DisplaySync;
use crate::error::Result;
use crate::models::RoleBinding;
use crate::roles::{RoleChannel, RoleStore};

/// A JSON object whose entries keep their document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, V>()? {
                    entries.push(entry);
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRecord {
    #[serde(default)]
    pub music: Option<u64>,
    #[serde(default)]
    pub category: Option<u64>,
    #[serde(default)]
    pub react: OrderedMap<OrderedMap<(u64, String)>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDocument {
    pub guilds: BTreeMap<String, GuildRecord>,
}

impl StateDocument {
    /// A missing file is an empty document.
    pub fn load(path: &Path) -> Result<StateDocument> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let document: StateDocument = serde_json::from_str(&contents)?;
                info!("Loaded data for {} guilds from {}", document.guilds.len(), path.display());
                Ok(document)
            }
            Err(why) if why.kind() == ErrorKind::NotFound => {
                info!("No data file at {}, starting empty", path.display());
                Ok(StateDocument::default())
            }
            Err(why) => Err(why.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, contents)?;
        fs::rename(&staging, path)?;

        info!("Saved data for {} guilds to {}", self.guilds.len(), path.display());
        Ok(())
    }

    /// Hands the music and role bindings to their owners.
    pub async fn restore(&self, display: &DisplaySync, roles: &RoleStore) {
        for (key, record) in &self.guilds {
            let Ok(guild) = key.parse::<u64>() else {
                warn!("Skipping guild with invalid id {key}");
                continue;
            };
            let guild_id = GuildId(guild);

            if let Some(music) = record.music {
                display.bind(guild_id, ChannelId(music)).await;
            }

            let mut channels = record.react.0.iter();
            let Some((channel, bindings)) = channels.next() else {
                continue;
            };
            if channels.next().is_some() {
                warn!("Guild {key} has several role channels, only {channel} is used");
            }

            let Ok(channel) = channel.parse::<u64>() else {
                warn!("Skipping role channel with invalid id {channel} in guild {key}");
                continue;
            };

            let mut role_channel = RoleChannel::new(ChannelId(channel), None, Vec::new());
            for (emoji, (role, label)) in &bindings.0 {
                let binding = RoleBinding {
                    emoji: emoji.clone(),
                    role_id: RoleId(*role),
                    label: label.clone(),
                };
                if let Err(why) = role_channel.insert(binding) {
                    warn!("Dropping duplicate binding in guild {key}: {why}");
                }
            }

            roles.insert(guild_id, role_channel).await;
        }
    }

    /// Builds the document to write from the live bindings, keeping fields owned
    /// by nobody in this process (the category) from `self`.
    pub async fn capture(&self, display: &DisplaySync, roles: &RoleStore) -> StateDocument {
        let mut guilds = self.guilds.clone();

        for record in guilds.values_mut() {
            record.music = None;
            record.react = OrderedMap::default();
        }

        for (guild_id, channel_id) in display.bindings().await {
            guilds.entry(guild_id.0.to_string()).or_default().music = Some(channel_id.0);
        }

        for (guild_id, channel) in roles.snapshot().await {
            let bindings = channel
                .bindings()
                .iter()
                .map(|binding| (binding.emoji.clone(), (binding.role_id.0, binding.label.clone())))
                .collect();

            guilds.entry(guild_id.0.to_string()).or_default().react =
                OrderedMap(vec![(channel.channel_id.0.to_string(), OrderedMap(bindings))]);
        }

        StateDocument { guilds }
    }
}
