// File: groovebot-common/src/models/mod.rs
pub mod guild;
pub mod music;
pub mod track;
pub mod user;

pub use guild::GuildRecord;
pub use music::{GuildMusicData, LoopMode, QualityTier, QueueItem};
pub use track::{SearchResult, SourcePlatform, Track};
pub use user::{StoredPlaylist, UserRecord, UserSettings};
