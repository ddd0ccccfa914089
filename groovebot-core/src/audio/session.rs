// File: groovebot-core/src/audio/session.rs
//
// The per-guild playback state machine. One instance per guild, created by
// the registry on first join and torn down when the transport link dies.
//
// Conceptual states, derived from connection x player: Disconnected,
// ConnectedIdle, Playing, Paused. The one transition with real ordering
// hazards is track-end: it can arrive from the transport (natural
// completion, async error) or from `skip` (forced stop), and both must
// resolve to exactly one queue advancement. Every live source is tagged
// with a sequence number; `advance_locked` consumes the current sequence
// and ignores anything stale, which is what makes a skip racing a natural
// completion advance once instead of twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use groovebot_common::models::{GuildMusicData, LoopMode, QualityTier, QueueItem, Track};
use groovebot_common::Error;

use crate::audio::pipeline::SourceFactory;
use crate::audio::queue::TrackQueue;
use crate::audio::transport::{
    ChannelRef, PlayerStatus, VoiceConnection, VoiceEvent, VoiceGateway, VoicePlayer,
};
use crate::config::{AUTOPLAY_CANDIDATES, CONNECT_TIMEOUT, DEFAULT_VOLUME};
use crate::platforms::ResolverSet;

struct SessionState {
    connection: Option<Arc<dyn VoiceConnection>>,
    player: Option<Arc<dyn VoicePlayer>>,
    current: Option<Track>,
    queue: TrackQueue,
    volume: u8,
    loop_mode: LoopMode,
    autoplay: bool,
    /// Sequence of the live source. Bumped on every play/stop/advance so
    /// that end events from superseded sources are recognizably stale.
    seq: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection: None,
            player: None,
            current: None,
            queue: TrackQueue::new(),
            volume: DEFAULT_VOLUME,
            loop_mode: LoopMode::None,
            autoplay: false,
            seq: 0,
        }
    }
}

pub struct PlaybackSession {
    guild_id: u64,
    id: Uuid,
    gateway: Arc<dyn VoiceGateway>,
    sources: Arc<dyn SourceFactory>,
    resolvers: Arc<ResolverSet>,
    quality: QualityTier,
    state: Mutex<SessionState>,
    events_tx: mpsc::UnboundedSender<VoiceEvent>,
    teardown_tx: mpsc::UnboundedSender<(u64, Uuid)>,
    destroyed: AtomicBool,
    /// Back-reference for detached tasks (autoplay) that need to call into
    /// the session without keeping it alive.
    self_ref: OnceCell<Weak<PlaybackSession>>,
}

impl PlaybackSession {
    /// Create the session and its event pump task. Transport events flow
    /// into the channel handed to the gateway at join/player creation and
    /// are drained here for as long as the session is alive.
    pub fn spawn(
        guild_id: u64,
        gateway: Arc<dyn VoiceGateway>,
        sources: Arc<dyn SourceFactory>,
        resolvers: Arc<ResolverSet>,
        quality: QualityTier,
        teardown_tx: mpsc::UnboundedSender<(u64, Uuid)>,
    ) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            guild_id,
            id: Uuid::new_v4(),
            gateway,
            sources,
            resolvers,
            quality,
            state: Mutex::new(SessionState::new()),
            events_tx,
            teardown_tx,
            destroyed: AtomicBool::new(false),
            self_ref: OnceCell::new(),
        });
        let _ = session.self_ref.set(Arc::downgrade(&session));

        let weak = Arc::downgrade(&session);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(session) = weak.upgrade() else { break };
                match event {
                    VoiceEvent::TrackEnded { seq } => session.handle_track_end(seq).await,
                    VoiceEvent::TrackErrored { seq, message } => {
                        warn!(
                            "player error in guild {}: {}; advancing",
                            session.guild_id, message
                        );
                        session.handle_track_end(seq).await;
                    }
                    VoiceEvent::ConnectionDropped => {
                        info!("voice link lost for guild {}", session.guild_id);
                        session.teardown().await;
                    }
                }
            }
        });

        session
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// Distinguishes this instantiation from any later session for the same
    /// guild when lifecycle messages race.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Open the transport link, or redirect/no-op if one already exists.
    /// Applies the readiness deadline and tears down a half-open link on
    /// expiry.
    pub async fn join_channel(&self, channel_id: u64) -> Result<(), Error> {
        let mut st = self.state.lock().await;

        if let Some(conn) = &st.connection {
            if conn.is_ready() {
                if conn.channel_id() == channel_id {
                    return Ok(());
                }
                conn.rejoin(channel_id)
                    .await
                    .map_err(|e| Error::VoiceConnectionFailed(e.to_string()))?;
                info!("guild {} moved to voice channel {}", self.guild_id, channel_id);
                return Ok(());
            }
        }

        let channel = ChannelRef {
            guild_id: self.guild_id,
            channel_id,
        };
        match timeout(CONNECT_TIMEOUT, self.gateway.join(channel, self.events_tx.clone())).await {
            Ok(Ok(conn)) => {
                st.connection = Some(conn);
                info!("guild {} connected to voice channel {}", self.guild_id, channel_id);
                Ok(())
            }
            Ok(Err(e)) => {
                self.gateway.leave(self.guild_id).await;
                Err(Error::VoiceConnectionFailed(e.to_string()))
            }
            Err(_) => {
                self.gateway.leave(self.guild_id).await;
                Err(Error::VoiceConnectionFailed(format!(
                    "voice channel {} not ready within {}s",
                    channel_id,
                    CONNECT_TIMEOUT.as_secs()
                )))
            }
        }
    }

    /// Start playing `track` immediately, replacing the current source.
    /// Queueing decisions belong to the caller.
    pub async fn play(&self, track: Track) -> Result<(), Error> {
        let mut st = self.state.lock().await;
        self.play_locked(&mut st, track).await
    }

    async fn play_locked(&self, st: &mut SessionState, track: Track) -> Result<(), Error> {
        let Some(connection) = st.connection.clone() else {
            return Err(Error::NotInVoiceChannel);
        };

        let player = match st.player.clone() {
            Some(p) => p,
            None => {
                let p = self
                    .gateway
                    .create_player(connection, self.events_tx.clone())
                    .await
                    .map_err(|e| Error::PlaybackFailed(e.to_string()))?;
                st.player = Some(p.clone());
                p
            }
        };

        let Some(source) = self.sources.create_source(&track, self.quality).await else {
            self.halt_locked(st).await;
            return Err(Error::PlaybackFailed(format!(
                "could not resolve a stream for \"{}\"",
                track.title
            )));
        };

        st.seq = st.seq.wrapping_add(1);
        let seq = st.seq;
        let volume = st.volume as f32 / 100.0;
        if let Err(e) = player.play(source, seq, volume).await {
            self.halt_locked(st).await;
            return Err(Error::PlaybackFailed(e.to_string()));
        }

        info!("now playing \"{}\" in guild {}", track.title, self.guild_id);
        st.current = Some(track);
        Ok(())
    }

    /// Drop back to connected-idle: silence the player, invalidate pending
    /// end events, and unset the current track.
    async fn halt_locked(&self, st: &mut SessionState) {
        st.seq = st.seq.wrapping_add(1);
        if let Some(player) = st.player.clone() {
            player.stop().await;
        }
        st.current = None;
    }

    /// Advance past the source tagged `seq`: the single "what plays next"
    /// path, reached from the transport event pump on natural completion or
    /// async player error, and from `skip`/`skip_many` on forced stop.
    pub async fn handle_track_end(&self, seq: u64) {
        let mut st = self.state.lock().await;
        self.advance_locked(&mut st, seq).await;
    }

    async fn advance_locked(&self, st: &mut SessionState, seq: u64) {
        if seq != st.seq {
            debug!(
                "ignoring stale track-end (seq {} != {}) in guild {}",
                seq, st.seq, self.guild_id
            );
            return;
        }
        // Consume this completion; any further event for the same source is
        // stale from here on.
        st.seq = st.seq.wrapping_add(1);

        let finished = st.current.take();

        match (st.loop_mode, &finished) {
            (LoopMode::Track, Some(track)) => {
                let replay = track.clone();
                if let Err(e) = self.play_locked(st, replay).await {
                    warn!("loop replay failed in guild {}: {}", self.guild_id, e);
                }
                return;
            }
            (LoopMode::Queue, Some(track)) => {
                st.queue.push_back(track.clone(), track.requested_by.clone());
            }
            _ => {}
        }

        if let Some(next) = st.queue.pop_front() {
            if let Err(e) = self.play_locked(st, next.track).await {
                warn!("queue advance failed in guild {}: {}", self.guild_id, e);
            }
            return;
        }

        if st.autoplay {
            if let Some(last) = finished {
                self.spawn_autoplay(last);
            }
        }
        // Queue exhausted: back to connected-idle, current stays unset.
    }

    /// Best-effort follow-up when the queue runs dry: ask the finished
    /// track's platform for similar candidates and play one at random.
    /// Detached on purpose; failures are logged and absorbed, never
    /// surfaced to whoever triggered the track-end.
    fn spawn_autoplay(&self, last: Track) {
        let Some(session) = self.self_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = session.run_autoplay(last).await {
                warn!("autoplay failed in guild {}: {}", session.guild_id, e);
            }
        });
    }

    async fn run_autoplay(&self, last: Track) -> Result<(), Error> {
        let Some(resolver) = self.resolvers.get(last.platform) else {
            return Ok(());
        };
        let candidates = resolver.recommend(&last, AUTOPLAY_CANDIDATES).await?;
        if candidates.is_empty() {
            debug!("no autoplay candidates for guild {}", self.guild_id);
            return Ok(());
        }
        let pick = rand::rng().random_range(0..candidates.len());
        let track = resolver.to_track(&candidates[pick], "autoplay").await?;

        let mut st = self.state.lock().await;
        if st.current.is_some() {
            // Someone started something while we were looking; yield.
            return Ok(());
        }
        info!(
            "autoplay picked \"{}\" for guild {}",
            track.title, self.guild_id
        );
        self.play_locked(&mut st, track).await
    }

    /// Valid only while playing; a no-op failure indicator otherwise.
    pub async fn pause(&self) -> bool {
        let st = self.state.lock().await;
        let Some(player) = st.player.clone() else {
            return false;
        };
        if player.status().await != PlayerStatus::Playing {
            return false;
        }
        let ok = player.pause().await;
        if ok {
            info!("playback paused in guild {}", self.guild_id);
        }
        ok
    }

    /// Valid only while paused; a no-op failure indicator otherwise.
    pub async fn resume(&self) -> bool {
        let st = self.state.lock().await;
        let Some(player) = st.player.clone() else {
            return false;
        };
        if player.status().await != PlayerStatus::Paused {
            return false;
        }
        let ok = player.resume().await;
        if ok {
            info!("playback resumed in guild {}", self.guild_id);
        }
        ok
    }

    /// Stop playback and drop the whole backlog. Idempotent.
    pub async fn stop(&self) -> bool {
        let mut st = self.state.lock().await;
        let Some(player) = st.player.clone() else {
            return false;
        };
        st.current = None;
        st.queue.clear();
        // Whatever end event the stopped source emits is already stale.
        st.seq = st.seq.wrapping_add(1);
        player.stop().await;
        info!("playback stopped in guild {}", self.guild_id);
        true
    }

    /// Forced stop of the current source, routed through the same
    /// advancement path as natural completion.
    pub async fn skip(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.current.is_none() {
            return false;
        }
        let Some(player) = st.player.clone() else {
            return false;
        };
        let seq = st.seq;
        player.stop().await;
        self.advance_locked(&mut st, seq).await;
        true
    }

    /// Skip the current track plus up to `count - 1` queued ones. The
    /// queue entries removed here are treated as backlog edits and bypass
    /// loop-mode re-enqueueing; only the playing track respects loop mode.
    /// Returns how many tracks were skipped.
    pub async fn skip_many(&self, count: usize) -> usize {
        let mut st = self.state.lock().await;
        if st.current.is_none() {
            return 0;
        }
        let Some(player) = st.player.clone() else {
            return 0;
        };

        let mut skipped = 1;
        while skipped < count {
            if st.queue.pop_front().is_none() {
                break;
            }
            skipped += 1;
        }

        let seq = st.seq;
        player.stop().await;
        self.advance_locked(&mut st, seq).await;
        skipped
    }

    pub async fn add_to_queue(&self, track: Track) {
        let mut st = self.state.lock().await;
        let requested_by = track.requested_by.clone();
        info!("queued \"{}\" in guild {}", track.title, self.guild_id);
        st.queue.push_back(track, requested_by);
    }

    /// Play-next: insert at the queue head.
    pub async fn insert_front(&self, track: Track) {
        let mut st = self.state.lock().await;
        let requested_by = track.requested_by.clone();
        st.queue.push_front(track, requested_by);
    }

    pub async fn remove_at(&self, index: usize) -> Option<QueueItem> {
        let mut st = self.state.lock().await;
        st.queue.remove_at(index)
    }

    pub async fn clear_queue(&self) {
        let mut st = self.state.lock().await;
        st.queue.clear();
        info!("queue cleared in guild {}", self.guild_id);
    }

    pub async fn shuffle_queue(&self) {
        let mut st = self.state.lock().await;
        st.queue.shuffle();
        info!("queue shuffled in guild {}", self.guild_id);
    }

    pub async fn queue(&self) -> Vec<QueueItem> {
        let st = self.state.lock().await;
        st.queue.snapshot()
    }

    pub async fn queue_len(&self) -> usize {
        let st = self.state.lock().await;
        st.queue.len()
    }

    /// Accepts 0..=100; out-of-range values are rejected and leave the
    /// stored volume unchanged. The live gain follows immediately while
    /// playing.
    pub async fn set_volume(&self, volume: i64) -> bool {
        if !(0..=100).contains(&volume) {
            return false;
        }
        let mut st = self.state.lock().await;
        st.volume = volume as u8;
        if let Some(player) = st.player.clone() {
            if player.status().await == PlayerStatus::Playing {
                player.set_volume(volume as f32 / 100.0).await;
            }
        }
        info!("volume set to {}% in guild {}", volume, self.guild_id);
        true
    }

    pub async fn volume(&self) -> u8 {
        self.state.lock().await.volume
    }

    pub async fn set_loop_mode(&self, mode: LoopMode) {
        let mut st = self.state.lock().await;
        st.loop_mode = mode;
        info!("loop mode set to {} in guild {}", mode, self.guild_id);
    }

    pub async fn loop_mode(&self) -> LoopMode {
        self.state.lock().await.loop_mode
    }

    pub async fn set_autoplay(&self, enabled: bool) {
        let mut st = self.state.lock().await;
        st.autoplay = enabled;
        info!(
            "autoplay {} in guild {}",
            if enabled { "enabled" } else { "disabled" },
            self.guild_id
        );
    }

    pub async fn autoplay(&self) -> bool {
        self.state.lock().await.autoplay
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.state.lock().await.current.clone()
    }

    pub async fn is_connected(&self) -> bool {
        let st = self.state.lock().await;
        st.connection.as_ref().is_some_and(|c| c.is_ready())
    }

    pub async fn is_playing(&self) -> bool {
        let st = self.state.lock().await;
        match &st.player {
            Some(p) => p.status().await == PlayerStatus::Playing,
            None => false,
        }
    }

    pub async fn is_paused(&self) -> bool {
        let st = self.state.lock().await;
        match &st.player {
            Some(p) => p.status().await == PlayerStatus::Paused,
            None => false,
        }
    }

    pub async fn voice_channel_id(&self) -> Option<u64> {
        let st = self.state.lock().await;
        st.connection
            .as_ref()
            .filter(|c| c.is_ready())
            .map(|c| c.channel_id())
    }

    /// Consolidated snapshot for display.
    pub async fn music_data(&self) -> GuildMusicData {
        let st = self.state.lock().await;
        let status = match &st.player {
            Some(p) => p.status().await,
            None => PlayerStatus::Idle,
        };
        GuildMusicData {
            guild_id: self.guild_id,
            queue: st.queue.snapshot(),
            current_track: st.current.clone(),
            is_playing: status == PlayerStatus::Playing,
            is_paused: status == PlayerStatus::Paused,
            volume: st.volume,
            loop_mode: st.loop_mode,
            autoplay: st.autoplay,
            voice_channel_id: st
                .connection
                .as_ref()
                .filter(|c| c.is_ready())
                .map(|c| c.channel_id()),
        }
    }

    /// Explicit leave. Equivalent to the teardown performed when the
    /// transport reports a terminal state.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    /// Purge everything: connection, player, queue, current track, and
    /// modifiers. A later join goes through a fresh session with default
    /// modifiers.
    pub(crate) async fn teardown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut st = self.state.lock().await;
        if let Some(conn) = st.connection.take() {
            conn.destroy().await;
        }
        self.gateway.leave(self.guild_id).await;
        st.player = None;
        st.current = None;
        st.queue.clear();
        st.volume = DEFAULT_VOLUME;
        st.loop_mode = LoopMode::None;
        st.autoplay = false;
        st.seq = st.seq.wrapping_add(1);
        drop(st);

        let _ = self.teardown_tx.send((self.guild_id, self.id));
        info!("session for guild {} torn down", self.guild_id);
    }
}
