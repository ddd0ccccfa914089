// File: groovebot-common/src/models/track.rs

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog a track originates from. Chosen once when the track is created;
/// everything downstream dispatches on this tag instead of re-parsing URLs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    Spotify,
    Youtube,
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePlatform::Spotify => write!(f, "spotify"),
            SourcePlatform::Youtube => write!(f, "youtube"),
        }
    }
}

impl FromStr for SourcePlatform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spotify" => Ok(SourcePlatform::Spotify),
            "youtube" => Ok(SourcePlatform::Youtube),
            _ => Err(format!("Unknown source platform: {}", s)),
        }
    }
}

/// A single playable audio item. Immutable once created; produced by the
/// catalog resolvers and consumed read-only by the playback session.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Track {
    pub title: String,
    pub artist: String,
    /// Human-readable duration, e.g. "3:41" or "1:02:15".
    pub duration: String,
    pub platform: SourcePlatform,
    /// Platform-native identifier (video id / track id).
    pub platform_id: String,
    /// Canonical URL on the source platform.
    pub url: String,
    pub thumbnail: String,
    /// Discord user id of the requester, or "autoplay".
    pub requested_by: String,
    pub added_at: DateTime<Utc>,
    /// Opaque per-platform extras (album, popularity, isrc, ...).
    pub metadata: Value,
}

/// A catalog-neutral search hit, convertible into a [`Track`] by the
/// resolver that produced it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub duration: String,
    pub url: String,
    pub platform: SourcePlatform,
    pub channel_name: String,
    pub published_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_strings() {
        assert_eq!("spotify".parse::<SourcePlatform>().unwrap(), SourcePlatform::Spotify);
        assert_eq!("YouTube".parse::<SourcePlatform>().unwrap(), SourcePlatform::Youtube);
        assert_eq!(SourcePlatform::Spotify.to_string(), "spotify");
        assert!("soundcloud".parse::<SourcePlatform>().is_err());
    }
}
