// File: groovebot-core/tests/session_tests.rs
//
// Playback session state machine tests against in-memory transport and
// catalog fakes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use groovebot_common::Error;
use groovebot_common::models::{LoopMode, QualityTier, SearchResult, SourcePlatform, Track};
use groovebot_core::audio::pipeline::{AudioSource, SourceFactory};
use groovebot_core::audio::probe::StreamKind;
use groovebot_core::audio::session::PlaybackSession;
use groovebot_core::audio::transport::{
    ChannelRef, PlayerStatus, VoiceConnection, VoiceEvent, VoiceGateway, VoicePlayer,
};
use groovebot_core::platforms::{ResolverSet, TrackResolver};

const GUILD: u64 = 1001;

fn track(title: &str) -> Track {
    Track {
        title: title.to_string(),
        artist: "artist".to_string(),
        duration: "3:00".to_string(),
        platform: SourcePlatform::Youtube,
        platform_id: title.to_string(),
        url: format!("https://www.youtube.com/watch?v={title}"),
        thumbnail: String::new(),
        requested_by: "user".to_string(),
        added_at: Utc::now(),
        metadata: json!({}),
    }
}

struct FakeConnection {
    guild_id: u64,
    channel_id: AtomicU64,
    ready: AtomicBool,
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn guild_id(&self) -> u64 {
        self.guild_id
    }

    fn channel_id(&self) -> u64 {
        self.channel_id.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn rejoin(&self, channel_id: u64) -> Result<(), Error> {
        self.channel_id.store(channel_id, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakePlayer {
    status: Mutex<Option<PlayerStatus>>,
    volume: Mutex<f32>,
    /// (stream_url, seq, initial volume) per play call.
    played: Mutex<Vec<(String, u64, f32)>>,
}

impl FakePlayer {
    async fn last_seq(&self) -> u64 {
        self.played.lock().await.last().expect("nothing played").1
    }

    async fn play_count(&self) -> usize {
        self.played.lock().await.len()
    }
}

#[async_trait]
impl VoicePlayer for FakePlayer {
    async fn play(&self, source: AudioSource, seq: u64, volume: f32) -> Result<(), Error> {
        self.played.lock().await.push((source.stream_url, seq, volume));
        *self.status.lock().await = Some(PlayerStatus::Playing);
        *self.volume.lock().await = volume;
        Ok(())
    }

    async fn pause(&self) -> bool {
        let mut status = self.status.lock().await;
        if *status == Some(PlayerStatus::Playing) {
            *status = Some(PlayerStatus::Paused);
            true
        } else {
            false
        }
    }

    async fn resume(&self) -> bool {
        let mut status = self.status.lock().await;
        if *status == Some(PlayerStatus::Paused) {
            *status = Some(PlayerStatus::Playing);
            true
        } else {
            false
        }
    }

    async fn stop(&self) -> bool {
        *self.status.lock().await = Some(PlayerStatus::Idle);
        true
    }

    async fn set_volume(&self, volume: f32) -> bool {
        *self.volume.lock().await = volume;
        true
    }

    async fn status(&self) -> PlayerStatus {
        self.status.lock().await.unwrap_or(PlayerStatus::Idle)
    }
}

#[derive(Default)]
struct FakeGateway {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    player: Mutex<Option<Arc<FakePlayer>>>,
    events: Mutex<Option<UnboundedSender<VoiceEvent>>>,
    fail_join: AtomicBool,
    left: Mutex<Vec<u64>>,
}

impl FakeGateway {
    async fn player(&self) -> Arc<FakePlayer> {
        self.player.lock().await.clone().expect("no player created")
    }

    async fn join_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn join(
        &self,
        channel: ChannelRef,
        events: UnboundedSender<VoiceEvent>,
    ) -> Result<Arc<dyn VoiceConnection>, Error> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(Error::VoiceConnectionFailed("gateway refused".to_string()));
        }
        let conn = Arc::new(FakeConnection {
            guild_id: channel.guild_id,
            channel_id: AtomicU64::new(channel.channel_id),
            ready: AtomicBool::new(true),
        });
        self.connections.lock().await.push(conn.clone());
        *self.events.lock().await = Some(events);
        Ok(conn)
    }

    async fn create_player(
        &self,
        _connection: Arc<dyn VoiceConnection>,
        _events: UnboundedSender<VoiceEvent>,
    ) -> Result<Arc<dyn VoicePlayer>, Error> {
        let player = Arc::new(FakePlayer::default());
        *self.player.lock().await = Some(player.clone());
        Ok(player)
    }

    async fn leave(&self, guild_id: u64) {
        self.left.lock().await.push(guild_id);
    }
}

#[derive(Default)]
struct FakeSourceFactory {
    fail: AtomicBool,
    created: AtomicU64,
}

#[async_trait]
impl SourceFactory for FakeSourceFactory {
    async fn create_source(&self, track: &Track, _quality: QualityTier) -> Option<AudioSource> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Some(AudioSource {
            stream_url: format!("stream://{}", track.platform_id),
            kind: StreamKind::Matroska,
            reader: Box::new(std::io::Cursor::new(Vec::new())),
        })
    }
}

struct FakeResolver {
    platform: SourcePlatform,
    recommendations: Vec<SearchResult>,
}

impl FakeResolver {
    fn empty(platform: SourcePlatform) -> Self {
        Self {
            platform,
            recommendations: Vec::new(),
        }
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    fn platform(&self) -> SourcePlatform {
        self.platform
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>, Error> {
        Ok(Vec::new())
    }

    async fn resolve_by_id(&self, _id: &str) -> Result<Option<SearchResult>, Error> {
        Ok(None)
    }

    async fn expand_playlist(
        &self,
        _id: &str,
        _limit: usize,
    ) -> Result<Vec<SearchResult>, Error> {
        Ok(Vec::new())
    }

    async fn to_track(&self, result: &SearchResult, requested_by: &str) -> Result<Track, Error> {
        Ok(Track {
            title: result.title.clone(),
            artist: result.channel_name.clone(),
            duration: result.duration.clone(),
            platform: self.platform,
            platform_id: result.id.clone(),
            url: result.url.clone(),
            thumbnail: result.thumbnail.clone(),
            requested_by: requested_by.to_string(),
            added_at: Utc::now(),
            metadata: json!({}),
        })
    }

    async fn recommend(&self, _seed: &Track, _limit: usize) -> Result<Vec<SearchResult>, Error> {
        Ok(self.recommendations.clone())
    }
}

struct Harness {
    session: Arc<PlaybackSession>,
    gateway: Arc<FakeGateway>,
    factory: Arc<FakeSourceFactory>,
}

fn harness_with_resolvers(resolvers: ResolverSet) -> Harness {
    let gateway = Arc::new(FakeGateway::default());
    let factory = Arc::new(FakeSourceFactory::default());
    let (teardown_tx, _teardown_rx) = unbounded_channel();
    let session = PlaybackSession::spawn(
        GUILD,
        gateway.clone(),
        factory.clone(),
        Arc::new(resolvers),
        QualityTier::Medium,
        teardown_tx,
    );
    Harness {
        session,
        gateway,
        factory,
    }
}

fn harness() -> Harness {
    harness_with_resolvers(ResolverSet::new([
        Arc::new(FakeResolver::empty(SourcePlatform::Youtube)) as Arc<dyn TrackResolver>,
        Arc::new(FakeResolver::empty(SourcePlatform::Spotify)) as Arc<dyn TrackResolver>,
    ]))
}

async fn queue_titles(session: &Arc<PlaybackSession>) -> Vec<String> {
    session
        .queue()
        .await
        .iter()
        .map(|item| item.track.title.clone())
        .collect()
}

#[tokio::test]
async fn play_without_connection_fails_and_leaves_no_current_track() {
    let h = harness();
    let result = h.session.play(track("a")).await;
    assert!(matches!(result, Err(Error::NotInVoiceChannel)));
    assert!(h.session.current_track().await.is_none());
}

#[tokio::test]
async fn join_then_play_reaches_playing_state() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    assert!(h.session.is_connected().await);

    h.session.play(track("a")).await.unwrap();
    assert!(h.session.is_playing().await);
    assert_eq!(h.session.current_track().await.unwrap().title, "a");

    // Default volume 50% is applied to the fresh resource.
    let player = h.gateway.player().await;
    assert_eq!(*player.volume.lock().await, 0.5);
}

#[tokio::test]
async fn join_is_noop_on_same_channel_and_rejoins_on_different_channel() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.join_channel(10).await.unwrap();
    assert_eq!(h.gateway.join_count().await, 1);

    h.session.join_channel(11).await.unwrap();
    assert_eq!(h.gateway.join_count().await, 1, "rejoin must reuse the link");
    assert_eq!(h.session.voice_channel_id().await, Some(11));
}

#[tokio::test]
async fn failed_join_reports_voice_connection_failed_and_cleans_up() {
    let h = harness();
    h.gateway.fail_join.store(true, Ordering::SeqCst);
    let result = h.session.join_channel(10).await;
    assert!(matches!(result, Err(Error::VoiceConnectionFailed(_))));
    assert!(!h.session.is_connected().await);
    assert_eq!(h.gateway.left.lock().await.as_slice(), &[GUILD]);
}

#[tokio::test]
async fn pause_and_resume_only_from_their_valid_states() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    assert!(!h.session.pause().await, "nothing playing yet");
    assert!(!h.session.resume().await);

    h.session.play(track("a")).await.unwrap();
    assert!(!h.session.resume().await, "resume invalid while playing");
    assert!(h.session.pause().await);
    assert!(h.session.is_paused().await);
    assert!(!h.session.pause().await, "pause invalid while paused");
    assert!(h.session.resume().await);
    assert!(h.session.is_playing().await);
}

#[tokio::test]
async fn stop_clears_current_track_and_queue_idempotently() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.add_to_queue(track("c")).await;

    assert!(h.session.stop().await);
    assert!(h.session.current_track().await.is_none());
    assert!(h.session.queue().await.is_empty());
    assert!(!h.session.is_playing().await);

    assert!(h.session.stop().await, "stop stays valid with a player");
    assert!(h.session.current_track().await.is_none());
}

#[tokio::test]
async fn skip_advances_through_queue_then_goes_idle() {
    // Playing A with B queued; loop off, autoplay off.
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;

    assert!(h.session.skip().await);
    assert_eq!(h.session.current_track().await.unwrap().title, "b");
    assert!(h.session.queue().await.is_empty());

    assert!(h.session.skip().await);
    assert!(h.session.current_track().await.is_none());
    assert!(h.session.is_connected().await, "connected-idle, not torn down");
    assert!(!h.session.skip().await, "nothing left to skip");
}

#[tokio::test]
async fn loop_track_replays_current_without_touching_queue() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.set_loop_mode(LoopMode::Track).await;

    let player = h.gateway.player().await;
    let seq = player.last_seq().await;
    h.session.handle_track_end(seq).await;

    assert_eq!(h.session.current_track().await.unwrap().title, "a");
    assert_eq!(queue_titles(&h.session).await, vec!["b"]);
    assert_eq!(player.play_count().await, 2, "same track resolved again");
}

#[tokio::test]
async fn loop_queue_recycles_finished_track_to_tail() {
    // Playing A, queue [B]: completion must leave current B, queue [A].
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.set_loop_mode(LoopMode::Queue).await;

    let seq = h.gateway.player().await.last_seq().await;
    h.session.handle_track_end(seq).await;

    assert_eq!(h.session.current_track().await.unwrap().title, "b");
    assert_eq!(queue_titles(&h.session).await, vec!["a"]);
}

#[tokio::test]
async fn duplicate_track_end_advances_only_once() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.add_to_queue(track("c")).await;

    let seq = h.gateway.player().await.last_seq().await;
    h.session.handle_track_end(seq).await;
    h.session.handle_track_end(seq).await;

    assert_eq!(h.session.current_track().await.unwrap().title, "b");
    assert_eq!(queue_titles(&h.session).await, vec!["c"]);
}

#[tokio::test]
async fn skip_racing_natural_completion_advances_only_once() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.add_to_queue(track("c")).await;

    let seq = h.gateway.player().await.last_seq().await;
    assert!(h.session.skip().await);
    // The stopped source's end notification arrives after the skip already
    // advanced; it must be recognized as stale.
    h.session.handle_track_end(seq).await;

    assert_eq!(h.session.current_track().await.unwrap().title, "b");
    assert_eq!(queue_titles(&h.session).await, vec!["c"]);
}

#[tokio::test]
async fn stale_end_event_while_idle_does_not_start_playback() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    let seq = h.gateway.player().await.last_seq().await;

    h.session.handle_track_end(seq).await;
    assert!(h.session.current_track().await.is_none());

    // A track queued while idle must only start through an explicit play.
    h.session.add_to_queue(track("b")).await;
    h.session.handle_track_end(seq).await;
    assert!(h.session.current_track().await.is_none());
    assert_eq!(queue_titles(&h.session).await, vec!["b"]);
}

#[tokio::test]
async fn transport_error_event_routes_into_advancement() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;

    let seq = h.gateway.player().await.last_seq().await;
    let events = h.gateway.events.lock().await.clone().unwrap();
    events
        .send(VoiceEvent::TrackErrored {
            seq,
            message: "mid-stream failure".to_string(),
        })
        .unwrap();

    // The pump consumes the event asynchronously.
    for _ in 0..100 {
        if h.session.current_track().await.as_ref().map(|t| t.title.as_str()) == Some("b") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.session.current_track().await.unwrap().title, "b");
}

#[tokio::test]
async fn volume_rejects_out_of_range_and_updates_live_gain() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();

    assert!(!h.session.set_volume(150).await);
    assert!(!h.session.set_volume(-5).await);
    assert_eq!(h.session.volume().await, 50, "rejected values leave volume unchanged");

    assert!(h.session.set_volume(75).await);
    assert_eq!(h.session.volume().await, 75);
    let player = h.gateway.player().await;
    assert_eq!(*player.volume.lock().await, 0.75);
}

#[tokio::test]
async fn volume_persists_across_track_transitions() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.set_volume(20).await;
    h.session.add_to_queue(track("b")).await;

    assert!(h.session.skip().await);
    let player = h.gateway.player().await;
    let played = player.played.lock().await;
    assert_eq!(played.last().unwrap().2, 0.2, "next track starts at stored volume");
}

#[tokio::test]
async fn resolution_failure_reports_playback_failed_and_leaves_idle() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.factory.fail.store(true, Ordering::SeqCst);

    let result = h.session.play(track("a")).await;
    assert!(matches!(result, Err(Error::PlaybackFailed(_))));
    assert!(h.session.current_track().await.is_none());
    assert!(h.session.is_connected().await);
}

#[tokio::test]
async fn autoplay_failure_is_absorbed_silently() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.set_autoplay(true).await;
    h.session.play(track("a")).await.unwrap();

    let seq = h.gateway.player().await.last_seq().await;
    h.session.handle_track_end(seq).await;

    // Empty candidate set: the session settles idle with no error surfaced.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.session.current_track().await.is_none());
    assert!(h.session.is_connected().await);
}

#[tokio::test]
async fn autoplay_picks_a_candidate_on_queue_exhaustion() {
    let candidate = SearchResult {
        id: "reco1".to_string(),
        title: "recommended".to_string(),
        description: String::new(),
        thumbnail: String::new(),
        duration: "2:00".to_string(),
        url: "https://www.youtube.com/watch?v=reco1".to_string(),
        platform: SourcePlatform::Youtube,
        channel_name: "channel".to_string(),
        published_at: String::new(),
    };
    let resolvers = ResolverSet::new([
        Arc::new(FakeResolver {
            platform: SourcePlatform::Youtube,
            recommendations: vec![candidate],
        }) as Arc<dyn TrackResolver>,
        Arc::new(FakeResolver::empty(SourcePlatform::Spotify)) as Arc<dyn TrackResolver>,
    ]);
    let h = harness_with_resolvers(resolvers);

    h.session.join_channel(10).await.unwrap();
    h.session.set_autoplay(true).await;
    h.session.play(track("a")).await.unwrap();

    let seq = h.gateway.player().await.last_seq().await;
    h.session.handle_track_end(seq).await;

    let mut current = None;
    for _ in 0..100 {
        current = h.session.current_track().await;
        if current.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let current = current.expect("autoplay should have started a track");
    assert_eq!(current.title, "recommended");
    assert_eq!(current.requested_by, "autoplay");
}

#[tokio::test]
async fn skip_many_removes_queued_tracks_without_loop_reenqueue() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.add_to_queue(track("c")).await;
    h.session.add_to_queue(track("d")).await;
    h.session.set_loop_mode(LoopMode::Queue).await;

    let skipped = h.session.skip_many(3).await;
    assert_eq!(skipped, 3);
    // The playing track A respects loop=queue and recycles to the tail;
    // the removed queue entries B and C do not.
    assert_eq!(h.session.current_track().await.unwrap().title, "d");
    assert_eq!(queue_titles(&h.session).await, vec!["a"]);
}

#[tokio::test]
async fn skip_many_is_bounded_by_queue_length() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;

    let skipped = h.session.skip_many(10).await;
    assert_eq!(skipped, 2);
    assert!(h.session.current_track().await.is_none());
}

#[tokio::test]
async fn insert_front_gives_play_next_semantics() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.insert_front(track("priority")).await;

    assert!(h.session.skip().await);
    assert_eq!(h.session.current_track().await.unwrap().title, "priority");
    assert_eq!(queue_titles(&h.session).await, vec!["b"]);
}

#[tokio::test]
async fn remove_at_is_bounds_checked_through_the_session() {
    let h = harness();
    h.session.add_to_queue(track("a")).await;
    assert!(h.session.remove_at(3).await.is_none());
    let removed = h.session.remove_at(0).await.unwrap();
    assert_eq!(removed.track.title, "a");
    assert!(h.session.queue().await.is_empty());
}

#[tokio::test]
async fn disconnect_purges_all_session_state() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.set_volume(80).await;
    h.session.set_loop_mode(LoopMode::Queue).await;
    h.session.set_autoplay(true).await;

    h.session.disconnect().await;

    assert!(h.session.is_destroyed());
    assert!(!h.session.is_connected().await);
    assert!(h.session.current_track().await.is_none());
    assert!(h.session.queue().await.is_empty());
    assert_eq!(h.session.volume().await, 50);
    assert_eq!(h.session.loop_mode().await, LoopMode::None);
    assert!(!h.session.autoplay().await);
    assert!(h.gateway.left.lock().await.contains(&GUILD));
}

#[tokio::test]
async fn connection_dropped_event_tears_the_session_down() {
    let h = harness();
    h.session.join_channel(10).await.unwrap();
    h.session.play(track("a")).await.unwrap();

    let events = h.gateway.events.lock().await.clone().unwrap();
    events.send(VoiceEvent::ConnectionDropped).unwrap();

    for _ in 0..100 {
        if h.session.is_destroyed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.session.is_destroyed());
    assert!(h.session.current_track().await.is_none());
}

#[tokio::test]
async fn music_data_snapshot_reflects_session_state() {
    let h = harness();
    h.session.join_channel(42).await.unwrap();
    h.session.play(track("a")).await.unwrap();
    h.session.add_to_queue(track("b")).await;
    h.session.set_volume(60).await;

    let data = h.session.music_data().await;
    assert_eq!(data.guild_id, GUILD);
    assert_eq!(data.current_track.unwrap().title, "a");
    assert_eq!(data.queue.len(), 1);
    assert!(data.is_playing);
    assert!(!data.is_paused);
    assert_eq!(data.volume, 60);
    assert_eq!(data.loop_mode, LoopMode::None);
    assert!(!data.autoplay);
    assert_eq!(data.voice_channel_id, Some(42));
}
