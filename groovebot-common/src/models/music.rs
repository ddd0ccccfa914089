// File: groovebot-common/src/models/music.rs

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::track::Track;

/// A queued track together with who asked for it and when.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueItem {
    pub track: Track,
    pub requested_by: String,
    pub added_at: DateTime<Utc>,
}

/// What happens when the current track finishes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    None,
    /// Replay the current track indefinitely.
    Track,
    /// Recycle finished tracks to the queue tail.
    Queue,
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::None => write!(f, "none"),
            LoopMode::Track => write!(f, "track"),
            LoopMode::Queue => write!(f, "queue"),
        }
    }
}

impl FromStr for LoopMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(LoopMode::None),
            "track" | "song" => Ok(LoopMode::Track),
            "queue" | "all" => Ok(LoopMode::Queue),
            _ => Err(format!("Unknown loop mode: {}", s)),
        }
    }
}

/// Stream quality preference, mapped to a target audio bitrate when the
/// resource pipeline picks among encoded formats.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

impl QualityTier {
    /// Target bitrate in kbps for format selection.
    pub fn target_bitrate(&self) -> f64 {
        match self {
            QualityTier::Low => 64.0,
            QualityTier::Medium => 128.0,
            QualityTier::High => 192.0,
        }
    }
}

/// Read-only snapshot of a guild's playback state, for display purposes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GuildMusicData {
    pub guild_id: u64,
    pub queue: Vec<QueueItem>,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub is_paused: bool,
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub voice_channel_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_mode_parses_aliases() {
        assert_eq!("off".parse::<LoopMode>().unwrap(), LoopMode::None);
        assert_eq!("track".parse::<LoopMode>().unwrap(), LoopMode::Track);
        assert_eq!("all".parse::<LoopMode>().unwrap(), LoopMode::Queue);
        assert!("forever".parse::<LoopMode>().is_err());
    }

    #[test]
    fn quality_targets_match_tiers() {
        assert_eq!(QualityTier::Low.target_bitrate(), 64.0);
        assert_eq!(QualityTier::Medium.target_bitrate(), 128.0);
        assert_eq!(QualityTier::High.target_bitrate(), 192.0);
    }
}
