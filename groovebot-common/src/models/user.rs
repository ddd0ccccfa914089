// File: groovebot-common/src/models/user.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::music::QualityTier;
use crate::models::track::Track;

/// Per-user defaults applied when the user first interacts with a guild
/// session. Stored on disk by the data manager, never by the session.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserSettings {
    pub autoplay: bool,
    pub quality: QualityTier,
    /// 0..=100
    pub volume: u8,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            autoplay: false,
            quality: QualityTier::Medium,
            volume: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserRecord {
    pub discord_id: String,
    pub playlists: Vec<Uuid>,
    pub settings: UserSettings,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(discord_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            discord_id: discord_id.into(),
            playlists: Vec::new(),
            settings: UserSettings::default(),
            created_at: now,
            last_active: now,
        }
    }
}

/// A user-curated playlist persisted across restarts. Distinct from the
/// in-memory playback queue, which never touches disk.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredPlaylist {
    pub id: Uuid,
    pub name: String,
    /// Discord user id of the owner.
    pub owner: String,
    pub tracks: Vec<Track>,
    pub is_public: bool,
    pub shared_with: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredPlaylist {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner: owner.into(),
            tracks: Vec::new(),
            is_public: false,
            shared_with: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
