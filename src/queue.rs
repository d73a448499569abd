use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard, RwLock};
use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::config::Timings;
use crate::display::{DisplaySync, NowPlaying};
use crate::error::{Error, Result};
use crate::models::{Connection, Track};
use crate::platform::{EndSignal, VoiceGateway};
use crate::reaper::IdleTimer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

#[derive(Clone, Debug)]
pub struct QueueStatus {
    pub connection: Connection,
    pub state: PlaybackState,
    pub queue: Vec<Track>,
    pub idle_since: Option<Instant>,
}

/// Playback time of the head track, not counting time spent paused.
struct PlaybackClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_for: Duration,
}

impl PlaybackClock {
    fn start() -> PlaybackClock {
        PlaybackClock {
            started: Instant::now(),
            paused_at: None,
            paused_for: Duration::ZERO,
        }
    }

    fn pause(&mut self) {
        self.paused_at.get_or_insert_with(Instant::now);
    }

    fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_for += paused_at.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        now.duration_since(self.started).saturating_sub(self.paused_for)
    }
}

/// Everything owned by one voice connection. Guarded by its own mutex.
struct Slot {
    connection: Connection,
    closed: bool,
    queue: VecDeque<Track>,
    paused: bool,
    /// Bumped whenever playback of a head track starts or is abandoned.
    epoch: u64,
    clock: Option<PlaybackClock>,
    watch: Option<DropGuard>,
    idle: Option<IdleTimer>,
    idle_generation: u64,
}

impl Slot {
    fn new(connection: Connection) -> Slot {
        Slot {
            connection,
            closed: false,
            queue: VecDeque::new(),
            paused: false,
            epoch: 0,
            clock: None,
            watch: None,
            idle: None,
            idle_generation: 0,
        }
    }

    fn now_playing(&self) -> NowPlaying<'_> {
        match self.queue.front() {
            Some(track) if !self.paused => NowPlaying::Playing(track),
            _ => NowPlaying::Idle,
        }
    }

    fn state(&self) -> PlaybackState {
        match (self.queue.is_empty(), self.paused) {
            (true, _) => PlaybackState::Idle,
            (false, true) => PlaybackState::Paused,
            (false, false) => PlaybackState::Playing,
        }
    }
}

enum Completion {
    Stale,
    NotYet(Duration),
    Advanced,
}

/// Owns every connection's queue and drives its playback state machine.
///
/// All mutation of one connection happens while holding that connection's
/// mutex, so a skip and a completion firing at the same moment are applied
/// one after the other rather than interleaved.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

struct Inner {
    voice: Arc<dyn VoiceGateway>,
    display: Arc<DisplaySync>,
    timings: Timings,
    connections: RwLock<HashMap<GuildId, Arc<Mutex<Slot>>>>,
}

impl QueueManager {
    pub fn new(voice: Arc<dyn VoiceGateway>, display: Arc<DisplaySync>, timings: Timings) -> QueueManager {
        QueueManager {
            inner: Arc::new(Inner {
                voice,
                display,
                timings,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub async fn connection(&self, guild_id: GuildId) -> Option<Connection> {
        let slot = self.inner.connections.read().await.get(&guild_id).cloned()?;
        let slot = slot.lock().await;
        (!slot.closed).then_some(slot.connection)
    }

    pub async fn status(&self, guild_id: GuildId) -> Option<QueueStatus> {
        let slot = self.inner.connections.read().await.get(&guild_id).cloned()?;
        let slot = slot.lock().await;
        if slot.closed {
            return None;
        }

        Some(QueueStatus {
            connection: slot.connection,
            state: slot.state(),
            queue: slot.queue.iter().cloned().collect(),
            idle_since: slot.idle.as_ref().map(IdleTimer::empty_since),
        })
    }

    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Connection> {
        if let Some(existing) = self.connection(guild_id).await {
            return Err(Error::Conflict(format!("already connected to <#{}>", existing.channel_id.0)));
        }

        self.inner.voice.connect(guild_id, channel_id).await?;

        let connection = Connection { guild_id, channel_id };
        let slot = Arc::new(Mutex::new(Slot::new(connection)));

        {
            let mut connections = self.inner.connections.write().await;
            if let Some(existing) = connections.get(&guild_id) {
                if !existing.lock().await.closed {
                    return Err(Error::Conflict("already connected".to_string()));
                }
            }
            connections.insert(guild_id, slot.clone());
        }

        info!("Joined channel {} in guild {}", channel_id.0, guild_id.0);

        let mut slot = slot.lock().await;
        self.arm_idle(&mut slot);

        Ok(connection)
    }

    pub async fn enqueue(&self, connection: Connection, track: Track) -> Result<()> {
        let mut slot = self.lock(connection).await?;

        info!("Queueing {} for guild {}", track.title, connection.guild_id.0);
        slot.queue.push_back(track);

        if slot.queue.len() == 1 {
            slot.idle = None;
            info!("Guild {} is now playing", connection.guild_id.0);
            self.start_head(&mut slot).await
        } else {
            self.refresh_queue(&mut slot).await;
            Ok(())
        }
    }

    /// Ends the current track now and advances as if it had completed.
    pub async fn skip(&self, connection: Connection) -> Result<()> {
        let mut slot = self.lock(connection).await?;
        if slot.queue.is_empty() {
            return Err(Error::NotFound("nothing is playing".to_string()));
        }

        info!("Skipping song for guild {}", connection.guild_id.0);

        self.inner.voice.stop(connection.guild_id).await?;
        slot.watch = None;
        self.advance(&mut slot).await;

        Ok(())
    }

    /// Halts playback and empties the queue. Leaves the connection up with no idle timer.
    pub async fn stop(&self, connection: Connection) -> Result<()> {
        let mut slot = self.lock(connection).await?;

        info!("Stopped playback for guild {}", connection.guild_id.0);

        self.inner.voice.stop(connection.guild_id).await?;
        slot.watch = None;
        slot.queue.clear();
        slot.clock = None;
        slot.paused = false;
        slot.epoch += 1;

        self.refresh_queue(&mut slot).await;
        self.refresh_preview(&slot).await;

        Ok(())
    }

    pub async fn pause(&self, connection: Connection) -> Result<()> {
        let mut slot = self.lock(connection).await?;
        if slot.queue.is_empty() {
            return Err(Error::NotFound("nothing is playing".to_string()));
        }
        if slot.paused {
            return Ok(());
        }

        self.inner.voice.pause(connection.guild_id).await?;
        slot.paused = true;
        if let Some(clock) = slot.clock.as_mut() {
            clock.pause();
        }

        info!("Paused playback for guild {}", connection.guild_id.0);
        self.refresh_preview(&slot).await;

        Ok(())
    }

    pub async fn resume(&self, connection: Connection) -> Result<()> {
        let mut slot = self.lock(connection).await?;
        if slot.queue.is_empty() {
            return Err(Error::NotFound("nothing is playing".to_string()));
        }
        if !slot.paused {
            return Ok(());
        }

        self.inner.voice.resume(connection.guild_id).await?;
        slot.paused = false;
        if let Some(clock) = slot.clock.as_mut() {
            clock.resume();
        }

        info!("Resumed playback for guild {}", connection.guild_id.0);
        self.refresh_preview(&slot).await;

        Ok(())
    }

    /// Disconnects and discards the queue and timers, whatever state the connection is in.
    pub async fn leave(&self, connection: Connection) -> Result<()> {
        let mut slot = self.lock(connection).await?;

        info!("Leaving channel {} in guild {}", connection.channel_id.0, connection.guild_id.0);
        self.teardown(&mut slot).await;
        drop(slot);

        self.forget_closed(connection.guild_id).await;

        Ok(())
    }

    async fn lock(&self, connection: Connection) -> Result<OwnedMutexGuard<Slot>> {
        let slot = self
            .inner
            .connections
            .read()
            .await
            .get(&connection.guild_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("not in a voice channel".to_string()))?;

        let slot = slot.lock_owned().await;
        if slot.closed || slot.connection != connection {
            return Err(Error::NotFound("not in a voice channel".to_string()));
        }

        Ok(slot)
    }

    /// Plays the head of the queue, dropping tracks the voice gateway refuses.
    async fn start_head(&self, slot: &mut Slot) -> Result<()> {
        let guild_id = slot.connection.guild_id;
        let mut last_error = None;

        while let Some(track) = slot.queue.front().cloned() {
            slot.epoch += 1;
            let (end, ended) = EndSignal::channel();

            match self.inner.voice.play(guild_id, &track.asset_path, end).await {
                Ok(()) => {
                    info!("Playing {} in guild {}", track.title, guild_id.0);

                    slot.paused = false;
                    slot.clock = Some(PlaybackClock::start());
                    slot.watch = Some(self.watch_completion(slot.connection, slot.epoch, track.duration(), ended));

                    self.refresh_preview(slot).await;
                    self.refresh_queue(slot).await;

                    return Ok(());
                }
                Err(why) => {
                    error!("Could not play {} in guild {}: {why}", track.title, guild_id.0);
                    slot.queue.pop_front();
                    last_error = Some(why);
                }
            }
        }

        self.enter_idle(slot).await;

        match last_error {
            Some(why) => Err(why),
            None => Ok(()),
        }
    }

    async fn advance(&self, slot: &mut Slot) {
        match slot.queue.len() {
            0 => {}
            1 => {
                slot.queue.pop_front();
                info!("No more songs to play for guild {}", slot.connection.guild_id.0);
                self.enter_idle(slot).await;
            }
            _ => {
                slot.queue.pop_front();
                if let Err(why) = self.start_head(slot).await {
                    warn!("Queue for guild {} ran dry after failures: {why}", slot.connection.guild_id.0);
                }
            }
        }
    }

    async fn enter_idle(&self, slot: &mut Slot) {
        slot.epoch += 1;
        slot.clock = None;
        slot.watch = None;
        slot.paused = false;
        self.arm_idle(slot);

        self.refresh_queue(slot).await;
        self.refresh_preview(slot).await;
    }

    fn arm_idle(&self, slot: &mut Slot) {
        slot.idle_generation += 1;

        let manager = self.clone();
        let connection = slot.connection;
        let generation = slot.idle_generation;
        let timings = &self.inner.timings;

        // Replacing the previous timer cancels it.
        slot.idle = Some(IdleTimer::arm(timings.idle_grace, timings.idle_poll, move || async move {
            manager.reap(connection, generation).await
        }));
    }

    async fn reap(&self, connection: Connection, generation: u64) {
        let Ok(mut slot) = self.lock(connection).await else {
            return;
        };

        if slot.idle.is_none() || slot.idle_generation != generation || !slot.queue.is_empty() {
            debug!("Stale idle timer for guild {}", connection.guild_id.0);
            return;
        }

        info!("Leaving channel {} as no songs have been added", connection.channel_id.0);
        self.teardown(&mut slot).await;
        drop(slot);

        self.forget_closed(connection.guild_id).await;
    }

    async fn teardown(&self, slot: &mut Slot) {
        let guild_id = slot.connection.guild_id;

        slot.closed = true;
        slot.queue.clear();
        slot.clock = None;
        slot.watch = None;
        slot.idle = None;
        slot.epoch += 1;

        if let Err(why) = self.inner.voice.disconnect(guild_id).await {
            warn!("Disconnect from guild {} failed: {why}", guild_id.0);
        }

        check_display(self.inner.display.reset(guild_id).await);
    }

    async fn forget_closed(&self, guild_id: GuildId) {
        let mut connections = self.inner.connections.write().await;
        if let Some(slot) = connections.get(&guild_id) {
            if slot.lock().await.closed {
                connections.remove(&guild_id);
            }
        }
    }

    /// Waits for the end of the track started at `epoch`: either the gateway's
    /// end signal or, failing that, its declared duration plus the safety margin.
    fn watch_completion(&self, connection: Connection, epoch: u64, duration: Duration, mut ended: oneshot::Receiver<()>) -> DropGuard {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let manager = self.clone();
        let mut deadline = Instant::now() + duration + self.inner.timings.completion_margin;

        let span = info_span!("completion", guild = connection.guild_id.0, epoch);

        tokio::spawn(
            async move {
                let mut signal_open = true;
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => return,
                        result = &mut ended, if signal_open => match result {
                            Ok(()) => {
                                manager.on_track_end(connection, epoch).await;
                                return;
                            }
                            Err(_) => signal_open = false,
                        },
                        _ = time::sleep_until(deadline) => match manager.check_completion(connection, epoch).await {
                            Completion::NotYet(remaining) => deadline = Instant::now() + remaining,
                            Completion::Stale | Completion::Advanced => return,
                        },
                    }
                }
            }
            .instrument(span),
        );

        token.drop_guard()
    }

    async fn on_track_end(&self, connection: Connection, epoch: u64) {
        let Ok(mut slot) = self.lock(connection).await else {
            return;
        };

        if slot.epoch == epoch {
            info!("Track ended in guild {}", connection.guild_id.0);
            self.advance(&mut slot).await;
        }
    }

    async fn check_completion(&self, connection: Connection, epoch: u64) -> Completion {
        let Ok(mut slot) = self.lock(connection).await else {
            return Completion::Stale;
        };

        if slot.epoch != epoch {
            return Completion::Stale;
        }

        if let (Some(clock), Some(head)) = (&slot.clock, slot.queue.front()) {
            let due = head.duration() + self.inner.timings.completion_margin;
            let elapsed = clock.elapsed();
            if elapsed < due {
                debug!("Head track in guild {} still has {:?} to go", connection.guild_id.0, due - elapsed);
                return Completion::NotYet(due - elapsed);
            }
        }

        self.advance(&mut slot).await;
        Completion::Advanced
    }

    async fn refresh_queue(&self, slot: &mut Slot) {
        let guild_id = slot.connection.guild_id;
        check_display(self.inner.display.render_queue(guild_id, slot.queue.make_contiguous()).await);
    }

    async fn refresh_preview(&self, slot: &Slot) {
        let guild_id = slot.connection.guild_id;
        check_display(self.inner.display.render_preview(guild_id, slot.now_playing()).await);
    }
}

/// Display edits never fail a queue operation; log and carry on.
fn check_display(result: Result<()>) {
    if let Err(why) = result {
        warn!("Error updating music display: {why}");
    }
}
