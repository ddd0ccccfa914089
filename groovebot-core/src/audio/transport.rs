// File: groovebot-core/src/audio/transport.rs
//
// Boundary to the real-time voice layer. The session only ever talks to
// these traits; the songbird-backed implementations live in
// `platforms::discord::voice`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use groovebot_common::Error;

use crate::audio::pipeline::AudioSource;

/// A voice channel reference within a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub guild_id: u64,
    pub channel_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
}

/// Asynchronous transport notifications, delivered on the session's event
/// channel and consumed by its pump task. Track events carry the playback
/// sequence number they were started with so the session can discard
/// notifications for sources it has already moved past.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    TrackEnded { seq: u64 },
    TrackErrored { seq: u64, message: String },
    /// The transport link reached a terminal state (kicked, network loss,
    /// explicit leave observed from the driver side).
    ConnectionDropped,
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn guild_id(&self) -> u64;

    fn channel_id(&self) -> u64;

    /// False once the link has been destroyed.
    fn is_ready(&self) -> bool;

    /// Move the existing link to another channel in the same guild.
    async fn rejoin(&self, channel_id: u64) -> Result<(), Error>;

    async fn destroy(&self);
}

#[async_trait]
pub trait VoicePlayer: Send + Sync {
    /// Start playing `source`, replacing whatever was playing. `seq` tags
    /// the end/error events this source will eventually emit; `volume` is
    /// the initial gain in 0.0..=1.0.
    async fn play(&self, source: AudioSource, seq: u64, volume: f32) -> Result<(), Error>;

    async fn pause(&self) -> bool;

    async fn resume(&self) -> bool;

    async fn stop(&self) -> bool;

    /// Adjust the live gain of the current source.
    async fn set_volume(&self, volume: f32) -> bool;

    async fn status(&self) -> PlayerStatus;
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Open (or fetch) the transport link into `channel`. Resolves once the
    /// link is ready; the caller applies its own deadline and calls
    /// [`VoiceGateway::leave`] if that deadline expires.
    async fn join(
        &self,
        channel: ChannelRef,
        events: UnboundedSender<VoiceEvent>,
    ) -> Result<Arc<dyn VoiceConnection>, Error>;

    /// Create a player subscribed to `connection`, delivering its events
    /// into `events`.
    async fn create_player(
        &self,
        connection: Arc<dyn VoiceConnection>,
        events: UnboundedSender<VoiceEvent>,
    ) -> Result<Arc<dyn VoicePlayer>, Error>;

    /// Tear down whatever link exists for the guild, including half-open
    /// ones left behind by a timed-out join.
    async fn leave(&self, guild_id: u64);
}
