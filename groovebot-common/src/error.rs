// ================================================================
// File: groovebot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Voice connection failed: {0}")]
    VoiceConnectionFailed(String),

    #[error("Not connected to a voice channel")]
    NotInVoiceChannel,

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Catalog lookup failed: {0}")]
    CatalogLookupFailed(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<chrono::format::ParseError> for Error {
    fn from(err: chrono::format::ParseError) -> Self {
        Error::Parse(err.to_string())
    }
}
