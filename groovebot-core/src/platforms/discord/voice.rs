// File: groovebot-core/src/platforms/discord/voice.rs
//
// songbird-backed implementation of the voice transport traits. A songbird
// Call covers both the link and the mixer; the split into connection and
// player objects here matches the seam the session is written against.

use std::io::{self, ErrorKind, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use songbird::events::{Event, EventContext, EventHandler, TrackEvent};
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::core::io::MediaSource;
use songbird::input::core::probe::Hint;
use songbird::input::{
    AsyncAdapterStream, AsyncMediaSource, AudioStream, AudioStreamError, Input, LiveInput,
};
use songbird::tracks::{PlayMode, Track, TrackHandle};
use songbird::{Call, CoreEvent, Songbird};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use groovebot_common::Error;

use crate::audio::pipeline::AudioSource;
use crate::audio::probe::StreamKind;
use crate::audio::transport::{
    ChannelRef, PlayerStatus, VoiceConnection, VoiceEvent, VoiceGateway, VoicePlayer,
};

const ADAPTER_BUF_LEN: usize = 64 * 1024;

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(
        &self,
        channel: ChannelRef,
        events: UnboundedSender<VoiceEvent>,
    ) -> Result<Arc<dyn VoiceConnection>, Error> {
        let call = self
            .manager
            .join(GuildId::from(channel.guild_id), ChannelId::from(channel.channel_id))
            .await
            .map_err(|e| Error::VoiceConnectionFailed(e.to_string()))?;

        {
            let mut guard = call.lock().await;
            guard.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier { events },
            );
        }

        Ok(Arc::new(SongbirdConnection {
            guild_id: channel.guild_id,
            channel_id: AtomicU64::new(channel.channel_id),
            ready: AtomicBool::new(true),
            manager: self.manager.clone(),
        }))
    }

    async fn create_player(
        &self,
        connection: Arc<dyn VoiceConnection>,
        events: UnboundedSender<VoiceEvent>,
    ) -> Result<Arc<dyn VoicePlayer>, Error> {
        let call = self
            .manager
            .get(GuildId::from(connection.guild_id()))
            .ok_or(Error::NotInVoiceChannel)?;
        Ok(Arc::new(SongbirdPlayer {
            call,
            events,
            handle: Mutex::new(None),
        }))
    }

    async fn leave(&self, guild_id: u64) {
        if let Err(e) = self.manager.remove(GuildId::from(guild_id)).await {
            debug!("songbird remove for guild {}: {}", guild_id, e);
        }
    }
}

struct SongbirdConnection {
    guild_id: u64,
    channel_id: AtomicU64,
    ready: AtomicBool,
    manager: Arc<Songbird>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
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
        // Joining a guild that already has a call moves it to the new
        // channel without tearing the driver down.
        self.manager
            .join(GuildId::from(self.guild_id), ChannelId::from(channel_id))
            .await
            .map_err(|e| Error::VoiceConnectionFailed(e.to_string()))?;
        self.channel_id.store(channel_id, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Err(e) = self.manager.remove(GuildId::from(self.guild_id)).await {
            debug!("songbird remove for guild {}: {}", self.guild_id, e);
        }
    }
}

struct SongbirdPlayer {
    call: Arc<Mutex<Call>>,
    events: UnboundedSender<VoiceEvent>,
    handle: Mutex<Option<TrackHandle>>,
}

#[async_trait]
impl VoicePlayer for SongbirdPlayer {
    async fn play(&self, source: AudioSource, seq: u64, volume: f32) -> Result<(), Error> {
        let input = source_into_input(source);

        let mut guard = self.handle.lock().await;
        if let Some(previous) = guard.take() {
            let _ = previous.stop();
        }

        let mut call = self.call.lock().await;
        let handle = call.play(Track::new(input).volume(volume));
        drop(call);

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackNotifier {
                    seq,
                    errored: false,
                    events: self.events.clone(),
                },
            )
            .map_err(|e| Error::PlaybackFailed(e.to_string()))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackNotifier {
                    seq,
                    errored: true,
                    events: self.events.clone(),
                },
            )
            .map_err(|e| Error::PlaybackFailed(e.to_string()))?;

        *guard = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> bool {
        match self.handle.lock().await.as_ref() {
            Some(handle) => handle.pause().is_ok(),
            None => false,
        }
    }

    async fn resume(&self) -> bool {
        match self.handle.lock().await.as_ref() {
            Some(handle) => handle.play().is_ok(),
            None => false,
        }
    }

    async fn stop(&self) -> bool {
        match self.handle.lock().await.as_ref() {
            Some(handle) => handle.stop().is_ok(),
            None => false,
        }
    }

    async fn set_volume(&self, volume: f32) -> bool {
        match self.handle.lock().await.as_ref() {
            Some(handle) => handle.set_volume(volume).is_ok(),
            None => false,
        }
    }

    async fn status(&self) -> PlayerStatus {
        let guard = self.handle.lock().await;
        let Some(handle) = guard.as_ref() else {
            return PlayerStatus::Idle;
        };
        match handle.get_info().await {
            Ok(state) => match state.playing {
                PlayMode::Play => PlayerStatus::Playing,
                PlayMode::Pause => PlayerStatus::Paused,
                _ => PlayerStatus::Idle,
            },
            Err(_) => PlayerStatus::Idle,
        }
    }
}

struct TrackNotifier {
    seq: u64,
    errored: bool,
    events: UnboundedSender<VoiceEvent>,
}

#[async_trait]
impl EventHandler for TrackNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let event = if self.errored {
            VoiceEvent::TrackErrored {
                seq: self.seq,
                message: "driver reported a track error".to_string(),
            }
        } else {
            VoiceEvent::TrackEnded { seq: self.seq }
        };
        let _ = self.events.send(event);
        None
    }
}

struct DisconnectNotifier {
    events: UnboundedSender<VoiceEvent>,
}

#[async_trait]
impl EventHandler for DisconnectNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.events.send(VoiceEvent::ConnectionDropped);
        None
    }
}

/// Wrap the pipeline's probed byte stream for the driver. The stream is
/// forward-only; seeks are refused rather than faked.
struct StreamMediaSource {
    inner: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

impl AsyncRead for StreamMediaSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for StreamMediaSource {
    fn start_seek(self: Pin<&mut Self>, _position: SeekFrom) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "live audio streams are not seekable",
        ))
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(0))
    }
}

#[async_trait]
impl AsyncMediaSource for StreamMediaSource {
    fn is_seekable(&self) -> bool {
        false
    }

    async fn byte_len(&self) -> Option<u64> {
        None
    }

    async fn try_resume(
        &mut self,
        _offset: u64,
    ) -> Result<Box<dyn AsyncMediaSource>, AudioStreamError> {
        Err(AudioStreamError::Unsupported)
    }
}

fn source_into_input(source: AudioSource) -> Input {
    let media = StreamMediaSource {
        inner: source.reader,
    };
    let adapter = AsyncAdapterStream::new(Box::new(media), ADAPTER_BUF_LEN);
    let stream = AudioStream {
        input: Box::new(adapter) as Box<dyn MediaSource>,
        hint: Some(stream_hint(source.kind)),
    };
    Input::Live(LiveInput::Raw(stream), None)
}

/// Seed the symphonia probe with what our own sniffing already learned.
fn stream_hint(kind: StreamKind) -> Hint {
    let mut hint = Hint::new();
    match kind {
        StreamKind::Matroska => hint.with_extension("webm"),
        StreamKind::Ogg => hint.with_extension("ogg"),
        StreamKind::Mp4 => hint.with_extension("m4a"),
        StreamKind::Mp3 => hint.with_extension("mp3"),
        StreamKind::Aac => hint.with_extension("aac"),
        StreamKind::Flac => hint.with_extension("flac"),
        StreamKind::Wave => hint.with_extension("wav"),
    };
    hint
}
