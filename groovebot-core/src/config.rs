// File: groovebot-core/src/config.rs
//
// Environment-driven configuration plus the fixed operating limits the
// command layer and platform clients share.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use groovebot_common::models::QualityTier;
use groovebot_common::Error;

/// Queue capacity policy enforced by the command layer, not the session.
pub const MAX_QUEUE_SIZE: usize = 100;
/// Tracks taken from a single playlist expansion.
pub const MAX_PLAYLIST_TRACKS: usize = 100;
pub const SEARCH_RESULT_LIMIT: usize = 10;
pub const DEFAULT_VOLUME: u8 = 50;
/// Candidate pool size for autoplay recommendations.
pub const AUTOPLAY_CANDIDATES: usize = 5;

/// Readiness deadline for voice connection establishment.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for opening the resolved audio stream.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for ordinary catalog requests.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for playlist expansion, which pages through more data.
pub const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum spacing between outbound requests, per platform (imposed by the
/// remote APIs, so shared across guilds).
pub const SPOTIFY_MIN_INTERVAL: Duration = Duration::from_millis(100);
pub const YOUTUBE_MIN_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between data-store autosave sweeps.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub discord_token: String,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub youtube_api_key: String,
    /// Netscape-format cookies file handed to yt-dlp for age-gated content.
    pub youtube_cookies: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub default_quality: QualityTier,
}

impl AppConfig {
    /// Load configuration from the process environment. Call
    /// `dotenv::dotenv()` first if a `.env` file should be honored.
    pub fn from_env() -> Result<Self, Error> {
        let required = [
            "DISCORD_TOKEN",
            "SPOTIFY_CLIENT_ID",
            "SPOTIFY_CLIENT_SECRET",
            "YOUTUBE_API_KEY",
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| env::var(name).map(|v| v.is_empty()).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Parse(format!(
                "Missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let youtube_cookies = env::var("YOUTUBE_COOKIES")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let data_dir = env::var("GROOVEBOT_DATA_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let default_quality = env::var("GROOVEBOT_QUALITY")
            .ok()
            .and_then(|v| serde_json::from_value(serde_json::Value::String(v)).ok())
            .unwrap_or(QualityTier::Medium);

        Ok(Self {
            discord_token: env::var("DISCORD_TOKEN").unwrap_or_default(),
            spotify_client_id: env::var("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            spotify_client_secret: env::var("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            youtube_api_key: env::var("YOUTUBE_API_KEY").unwrap_or_default(),
            youtube_cookies,
            data_dir,
            default_quality,
        })
    }
}
