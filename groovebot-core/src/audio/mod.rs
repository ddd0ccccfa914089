// File: groovebot-core/src/audio/mod.rs
//
// The playback core: one session per guild, each owning a voice transport
// link, a player, a queue, and the playback modifiers. The transport itself
// sits behind the traits in `transport.rs`; production wires them to
// songbird (`platforms::discord`), tests wire them to in-memory fakes.

pub mod pipeline;
pub mod probe;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;

pub use pipeline::{AudioPipeline, AudioSource, SourceFactory};
pub use queue::TrackQueue;
pub use registry::{RegistryStats, SessionRegistry};
pub use session::PlaybackSession;
pub use transport::{
    ChannelRef, PlayerStatus, VoiceConnection, VoiceEvent, VoiceGateway, VoicePlayer,
};
