// File: groovebot-common/src/models/guild.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::music::LoopMode;

/// Durable per-guild preferences. Playback state (queue, current track) is
/// deliberately absent; only settings survive a restart.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GuildRecord {
    pub guild_id: u64,
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub updated_at: DateTime<Utc>,
}

impl GuildRecord {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            volume: 50,
            loop_mode: LoopMode::None,
            autoplay: false,
            updated_at: Utc::now(),
        }
    }
}
