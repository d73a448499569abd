use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, EventHandler},
    framework::{
        standard::{
            Args, CommandResult,
            macros::{command, group},
        },
        StandardFramework,
    },
    model::{channel::Message, gateway::Ready},
    prelude::GatewayIntents,
    Result as SerenityResult,
};
use serenity::client::Context;
use serenity::model::channel::Reaction;
use serenity::model::id::{ChannelId, RoleId};
use serenity::model::prelude::{GuildId, VoiceState};
use songbird::{SerenityInit, Songbird};
use tracing::{error, info, warn};
use tracing_futures::Instrument;

use crate::config::Settings;
use crate::discord::{DiscordChat, SongbirdVoice};
use crate::display::DisplaySync;
use crate::error::Error;
use crate::platform::{ChatPlatform, ReactionEvent};
use crate::queue::QueueManager;
use crate::resolver::SongResolver;
use crate::roles::{AddRole, ReactionRouter, RoleEditor, RoleStore};
use crate::state::StateDocument;
use crate::ytdlp::YtDlp;

mod config;
mod discord;
mod display;
mod error;
mod models;
mod platform;
mod queue;
mod reaper;
mod resolver;
mod roles;
mod state;
#[cfg(test)]
mod testing;
mod ytdlp;

/// How long rejection notices stay in a tracked channel.
const NOTICE_LIFETIME: Duration = Duration::from_secs(5);

struct Handler;

/// Everything a command or event needs, shared through the client's `TypeMap`.
pub struct Multibot {
    chat: Arc<dyn ChatPlatform>,
    queue: QueueManager,
    resolver: SongResolver,
    display: Arc<DisplaySync>,
    editor: RoleEditor,
    router: ReactionRouter,
}

pub struct MultibotKey;

impl serenity::prelude::TypeMapKey for MultibotKey {
    type Value = Arc<Multibot>;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _: Context, ready: Ready) {
        info!("{} is connected to {} guilds!", ready.user.name, ready.guilds.len());
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let Ok(bot) = get_bot(&ctx).await else {
            return;
        };
        let (Some(guild_id), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
            return;
        };

        let member_is_bot = reaction
            .member
            .as_ref()
            .and_then(|member| member.user.as_ref())
            .map(|user| user.bot);
        let actor_is_bot = match member_is_bot {
            Some(is_bot) => is_bot,
            None => user_id == bot.chat.current_user() || user_id.to_user(&ctx).await.map(|user| user.bot).unwrap_or(false),
        };

        let event = ReactionEvent {
            guild_id,
            channel_id: reaction.channel_id,
            message_id: reaction.message_id,
            emoji: reaction.emoji.to_string(),
            actor_id: user_id,
            actor_is_bot,
        };

        let span = tracing::info_span!("reaction", guild = guild_id.0);
        match bot.router.on_reaction_added(&event).instrument(span).await {
            Ok(outcome) => info!("Reaction {} handled: {outcome:?}", event.emoji),
            Err(why) => warn!("Reaction {} failed: {why}", event.emoji),
        }
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let Ok(bot) = get_bot(&ctx).await else {
            return;
        };
        let Some(guild_id) = new.guild_id else {
            return;
        };

        if new.user_id != bot.chat.current_user() {
            return;
        }

        info!("Bot was disconnected from voice in guild {}", guild_id.0);

        // Our own leave also lands here, after the connection is already gone.
        if let Some(connection) = bot.queue.connection(guild_id).await {
            if let Err(why) = bot.queue.leave(connection).await {
                info!("{:#?}", why)
            }
        }
    }
}

#[group]
#[commands(play, join, skip, stop, pause, resume, leave)]
struct Music;

#[group]
#[commands(setup, role, help)]
struct General;

#[tokio::main]
async fn main() {
    // A missing .env is fine when the variables come from the process environment.
    dotenv().ok();

    tracing_subscriber::fmt::init();

    let settings = Settings::from_env().expect("Invalid configuration");

    std::fs::create_dir_all(&settings.media_dir).expect("Could not create the media directory");

    let framework = StandardFramework::new()
        .configure(|c| {
            c.prefix(&settings.prefix)
        })
        .group(&MUSIC_GROUP)
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();

    let mut client = Client::builder(&settings.token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird.clone())
        .await
        .expect("Err creating client");

    let http = client.cache_and_http.http.clone();
    let bot_id = http.get_current_user().await.expect("Could not identify the bot user").id;

    let chat: Arc<dyn ChatPlatform> = Arc::new(DiscordChat::new(http, bot_id));
    let ytdlp = Arc::new(YtDlp::new(settings.ytdlp.clone(), settings.media_dir.clone()));
    let display = Arc::new(DisplaySync::new(chat.clone()));
    let roles = Arc::new(RoleStore::new());

    let document = StateDocument::load(&settings.data_file).expect("Could not read the data file");
    document.restore(&display, &roles).await;

    let bot = Arc::new(Multibot {
        chat: chat.clone(),
        queue: QueueManager::new(Arc::new(SongbirdVoice::new(songbird)), display.clone(), settings.timings.clone()),
        resolver: SongResolver::new(ytdlp.clone(), ytdlp, settings.media_dir.clone(), settings.timings.clone()),
        display,
        editor: RoleEditor::new(chat.clone(), roles.clone()),
        router: ReactionRouter::new(chat, roles.clone()),
    });

    {
        let mut w = client.data.write().await;
        w.insert::<MultibotKey>(bot.clone());
    }

    let shard_manager = client.shard_manager.clone();

    tokio::spawn(async move {
        let _ = client.start().await.map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c().await.expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");

    let snapshot = document.capture(&bot.display, &roles).await;
    if let Err(why) = snapshot.save(&settings.data_file) {
        error!("Could not save {}: {why}", settings.data_file.display());
    }

    shard_manager.lock().await.shutdown_all().await;
}

#[command]
#[only_in(guilds)]
#[aliases(q, queue)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = play_song(ctx, msg, args.message()).await;
    report(ctx, msg, result).await
}

async fn play_song(ctx: &Context, msg: &Message, user_input: &str) -> Result<(), Error> {
    let (bot, guild_id) = music_guild(ctx, msg).await?;

    info!("User input is {user_input}");

    if user_input.trim().is_empty() {
        return Err(Error::NotFound("nothing to search for".to_string()));
    }

    let connection = match bot.queue.connection(guild_id).await {
        Some(connection) => connection,
        None => {
            let channel_id = author_voice_channel(ctx, msg)?;
            bot.queue.join(guild_id, channel_id).await?
        }
    };

    let span = tracing::info_span!("play", guild = guild_id.0);
    match bot.resolver.resolve(user_input).instrument(span).await {
        Ok(track) => bot.queue.enqueue(connection, track).await,
        Err(Error::ResolutionFailure(input)) => {
            info!("Nothing playable found for {input}");
            Ok(())
        }
        Err(why) => Err(why),
    }
}

#[command]
#[only_in(guilds)]
async fn join(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let (bot, guild_id) = music_guild(ctx, msg).await?;
        let channel_id = author_voice_channel(ctx, msg)?;
        bot.queue.join(guild_id, channel_id).await.map(|_| ())
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
#[aliases(next)]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let (bot, guild_id) = music_guild(ctx, msg).await?;
        info!("SKIP - Skip command invoked from guild {}!", guild_id.0);
        bot.queue.skip(current_connection(&bot, guild_id).await?).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let (bot, guild_id) = music_guild(ctx, msg).await?;
        bot.queue.stop(current_connection(&bot, guild_id).await?).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
#[aliases(p)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let (bot, guild_id) = music_guild(ctx, msg).await?;
        bot.queue.pause(current_connection(&bot, guild_id).await?).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
#[aliases(unpause, r)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let (bot, guild_id) = music_guild(ctx, msg).await?;
        bot.queue.resume(current_connection(&bot, guild_id).await?).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
#[aliases(disconnect)]
async fn leave(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let (bot, guild_id) = music_guild(ctx, msg).await?;
        bot.queue.leave(current_connection(&bot, guild_id).await?).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
#[sub_commands(setup_music, setup_roles)]
async fn setup(ctx: &Context, msg: &Message) -> CommandResult {
    check_msg(msg.channel_id.say(&ctx.http, "Use `setup music` or `setup roles` in the channel to bind").await);

    Ok(())
}

#[command("music")]
#[only_in(guilds)]
async fn setup_music(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let bot = get_bot(ctx).await?;
        let guild_id = command_guild(msg)?;
        bot.display.setup(guild_id, msg.channel_id).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command("roles")]
#[only_in(guilds)]
async fn setup_roles(ctx: &Context, msg: &Message) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = async {
        let bot = get_bot(ctx).await?;
        let guild_id = command_guild(msg)?;
        bot.editor.setup(guild_id, msg.channel_id).await
    }
    .await;

    report(ctx, msg, result).await
}

#[command]
#[only_in(guilds)]
#[sub_commands(role_add, role_remove)]
async fn role(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = add_role(ctx, msg, args).await;
    report(ctx, msg, result).await
}

#[command("add")]
#[only_in(guilds)]
#[aliases("-a", "a")]
async fn role_add(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = add_role(ctx, msg, args).await;
    report(ctx, msg, result).await
}

#[command("remove")]
#[only_in(guilds)]
#[aliases("-r", "r")]
async fn role_remove(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    delete_command(ctx, msg).await;

    let result = remove_role(ctx, msg, args).await;
    report(ctx, msg, result).await
}

async fn remove_role(ctx: &Context, msg: &Message, mut args: Args) -> Result<(), Error> {
    let bot = get_bot(ctx).await?;
    let guild_id = command_guild(msg)?;
    let emoji = args
        .single::<String>()
        .map_err(|_| Error::NotFound("usage: role remove <emoji>".to_string()))?;

    let binding = bot.editor.remove(guild_id, msg.channel_id, &emoji).await?;
    info!("Removed {} from the roles of guild {}", binding.label, guild_id.0);

    Ok(())
}

async fn add_role(ctx: &Context, msg: &Message, mut args: Args) -> Result<(), Error> {
    let usage = || Error::NotFound("usage: role add <@role> <emoji> <label>".to_string());

    let bot = get_bot(ctx).await?;
    let guild_id = command_guild(msg)?;
    let role_id = args.single::<RoleId>().map_err(|_| usage())?;
    let emoji = args.single::<String>().map_err(|_| usage())?;
    let label = args.rest().trim().to_string();

    if label.is_empty() {
        return Err(usage());
    }

    bot.editor
        .add(AddRole {
            guild_id,
            channel_id: msg.channel_id,
            role_id,
            emoji,
            label,
        })
        .await
}

#[command]
#[only_in(guilds)]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **play [URL|Title]** (q, queue) - Joins your voice channel if needed and adds the track to the queue.
    **join** - Joins your voice channel.
    **pause** (p) - Pauses the current track.
    **resume** (r, unpause) - Resumes the currently paused track.
    **skip** (next) - Plays the next track.
    **stop** - Stops the current track and clears the queue.
    **leave** (disconnect) - Leaves the voice channel.
    **setup music** - Makes this channel the music channel.
    **setup roles** - Makes this channel the role channel.
    **role add [@Role] [Emoji] [Label]** - Binds an emoji of the role message to a role.
    **role remove [Emoji]** - Removes an emoji binding.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}

/// Tracked channels only hold the bot's own messages, so commands are removed
/// before they act on them.
async fn delete_command(ctx: &Context, msg: &Message) {
    if let Err(why) = msg.channel_id.delete_message(&ctx.http, msg.id).await {
        info!("Could not delete command message: {why:?}");
    }
}

/// Reports a failed command with a short-lived notice.
async fn report(ctx: &Context, msg: &Message, result: Result<(), Error>) -> CommandResult {
    if let Err(why) = result {
        info!("Command {} failed: {why}", msg.content);
        say_briefly(ctx, msg.channel_id, why.to_string()).await;
    }

    Ok(())
}

async fn say_briefly(ctx: &Context, channel_id: ChannelId, text: String) {
    match channel_id.say(&ctx.http, text).await {
        Ok(notice) => {
            let http = ctx.http.clone();
            tokio::spawn(async move {
                tokio::time::sleep(NOTICE_LIFETIME).await;
                if let Err(why) = channel_id.delete_message(&http, notice.id).await {
                    info!("Could not delete notice: {why:?}");
                }
            });
        }
        Err(why) => info!("Error sending message: {why:?}"),
    }
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

async fn get_bot(ctx: &Context) -> Result<Arc<Multibot>, Error> {
    let data = ctx.data.read().await;
    data.get::<MultibotKey>()
        .cloned()
        .ok_or_else(|| Error::NotFound("bot is still starting".to_string()))
}

fn command_guild(msg: &Message) -> Result<GuildId, Error> {
    msg.guild_id.ok_or_else(|| Error::NotFound("Guild not found".to_string()))
}

/// Resolves the guild of a music command, which must come from the music channel.
async fn music_guild(ctx: &Context, msg: &Message) -> Result<(Arc<Multibot>, GuildId), Error> {
    let bot = get_bot(ctx).await?;
    let guild_id = command_guild(msg)?;

    match bot.display.music_channel(guild_id).await {
        Some(channel_id) if channel_id == msg.channel_id => Ok((bot, guild_id)),
        Some(valid) => Err(Error::WrongChannel { valid }),
        None => Err(Error::NotFound("setup is not complete, run `setup music` first".to_string())),
    }
}

async fn current_connection(bot: &Multibot, guild_id: GuildId) -> Result<crate::models::Connection, Error> {
    bot.queue
        .connection(guild_id)
        .await
        .ok_or_else(|| Error::NotFound("not in a voice channel".to_string()))
}

fn author_voice_channel(ctx: &Context, msg: &Message) -> Result<ChannelId, Error> {
    let guild = msg
        .guild(&ctx.cache)
        .ok_or_else(|| Error::NotFound("Guild not found".to_string()))?;

    guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| Error::NotFound("you are not in a voice channel".to_string()))
}
