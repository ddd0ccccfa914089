// File: groovebot-core/src/platforms/spotify/client.rs
//
// Spotify Web API catalog client. Spotify exposes no streamable audio, so
// resolution to an actual stream goes through a cleaned YouTube search
// query built by `clean_search_query` (see the audio pipeline).

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use groovebot_common::models::{SearchResult, SourcePlatform, Track};
use groovebot_common::Error;

use crate::config::{CATALOG_TIMEOUT, PLAYLIST_TIMEOUT, SPOTIFY_MIN_INTERVAL};
use crate::platforms::{RateGate, TrackResolver};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

static TRACK_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spotify\.com/track/([a-zA-Z0-9]{22})").unwrap());
static ALBUM_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spotify\.com/album/([a-zA-Z0-9]{22})").unwrap());
static PLAYLIST_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spotify\.com/playlist/([a-zA-Z0-9_-]+)").unwrap());
static PLAYLIST_URI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spotify:playlist:([a-zA-Z0-9_-]+)").unwrap());

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)|\[.*?\]").unwrap());
static FEATURING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)feat\.|ft\.|featuring").unwrap());
static REMIX_QUALIFIERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)remix|remastered|remaster").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

struct TokenState {
    access_token: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<TokenState>>,
    gate: RateGate,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
            gate: RateGate::new(SPOTIFY_MIN_INTERVAL),
        }
    }

    /// Client-credentials grant, refreshed a minute before expiry.
    async fn bearer_token(&self) -> Result<String, Error> {
        let mut guard = self.token.lock().await;
        if let Some(state) = guard.as_ref() {
            if Instant::now() < state.expires_at {
                return Ok(state.access_token.clone());
            }
        }

        let basic = BASE64.encode(format!("{}:{}", self.client_id, self.client_secret));
        let resp: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {basic}"))
            .form(&[("grant_type", "client_credentials")])
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Platform(format!("Spotify token request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Platform(format!("Spotify token response invalid: {e}")))?;

        let expires_at =
            Instant::now() + std::time::Duration::from_secs(resp.expires_in.saturating_sub(60));
        let token = resp.access_token.clone();
        *guard = Some(TokenState {
            access_token: resp.access_token,
            expires_at,
        });
        info!("Spotify access token refreshed");
        Ok(token)
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: std::time::Duration,
    ) -> Result<T, Error> {
        let token = self.bearer_token().await?;
        self.gate.acquire().await;
        self.http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::CatalogLookupFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::CatalogLookupFailed(e.to_string()))
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, Error> {
        let resp: SearchResponse = self
            .api_get(
                &format!("{API_BASE}/search"),
                &[
                    ("q", query.to_string()),
                    ("type", "track".to_string()),
                    ("limit", limit.to_string()),
                ],
                CATALOG_TIMEOUT,
            )
            .await
            .map_err(|e| Error::SearchFailed(e.to_string()))?;

        let results: Vec<SearchResult> = resp
            .tracks
            .map(|t| t.items)
            .unwrap_or_default()
            .into_iter()
            .map(track_to_result)
            .collect();
        info!("Spotify search \"{}\" returned {} results", query, results.len());
        Ok(results)
    }

    /// Canonical metadata for one track; `None` when the id is unknown.
    pub async fn get_track(&self, track_id: &str) -> Result<Option<ApiTrack>, Error> {
        match self
            .api_get::<ApiTrack>(
                &format!("{API_BASE}/tracks/{track_id}"),
                &[],
                CATALOG_TIMEOUT,
            )
            .await
        {
            Ok(track) => Ok(Some(track)),
            Err(Error::CatalogLookupFailed(msg)) if msg.contains("404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn album_tracks(
        &self,
        album_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, Error> {
        let album: ApiAlbum = self
            .api_get(
                &format!("{API_BASE}/albums/{album_id}"),
                &[],
                CATALOG_TIMEOUT,
            )
            .await?;
        let listing: AlbumTracksResponse = self
            .api_get(
                &format!("{API_BASE}/albums/{album_id}/tracks"),
                &[("limit", limit.to_string())],
                PLAYLIST_TIMEOUT,
            )
            .await?;

        let thumbnail = album.images.first().map(|i| i.url.clone()).unwrap_or_default();
        let results: Vec<SearchResult> = listing
            .items
            .into_iter()
            .map(|track| {
                let artists = join_artists(&track.artists);
                SearchResult {
                    id: track.id,
                    title: track.name,
                    description: format!("{} - {}", artists, album.name),
                    thumbnail: thumbnail.clone(),
                    duration: format_duration_ms(track.duration_ms),
                    url: track.external_urls.spotify,
                    platform: SourcePlatform::Spotify,
                    channel_name: artists,
                    published_at: album.release_date.clone().unwrap_or_default(),
                }
            })
            .collect();
        info!("Spotify album {} expanded to {} tracks", album_id, results.len());
        Ok(results)
    }

    pub async fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, Error> {
        // Regional playlists 404 without the right market; walk the
        // fallbacks before giving up on the listing itself.
        self.check_playlist_reachable(playlist_id).await?;

        let resp: PlaylistTracksResponse = self
            .api_get(
                &format!("{API_BASE}/playlists/{playlist_id}/tracks"),
                &[
                    ("limit", limit.to_string()),
                    ("market", "from_token".to_string()),
                ],
                PLAYLIST_TIMEOUT,
            )
            .await?;

        let results: Vec<SearchResult> = resp
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .filter(|track| track.kind == "track" && !track.id.is_empty())
            .map(track_to_result)
            .collect();
        info!(
            "Spotify playlist {} expanded to {} tracks",
            playlist_id,
            results.len()
        );
        Ok(results)
    }

    async fn check_playlist_reachable(&self, playlist_id: &str) -> Result<(), Error> {
        let url = format!("{API_BASE}/playlists/{playlist_id}");
        let markets = [None, Some("US"), Some("from_token")];
        let mut last_err = None;
        for market in markets {
            let query: Vec<(&str, String)> = market
                .map(|m| vec![("market", m.to_string())])
                .unwrap_or_default();
            match self
                .api_get::<serde_json::Value>(&url, &query, CATALOG_TIMEOUT)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Spotify playlist {} not reachable (market {:?}): {}",
                        playlist_id, market, e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::CatalogLookupFailed("playlist lookup failed".to_string())
        }))
    }

    pub async fn recommendations(
        &self,
        seed_track_ids: &[String],
        limit: usize,
    ) -> Result<Vec<SearchResult>, Error> {
        let seeds = seed_track_ids
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        let resp: RecommendationsResponse = self
            .api_get(
                &format!("{API_BASE}/recommendations"),
                &[("seed_tracks", seeds), ("limit", limit.to_string())],
                CATALOG_TIMEOUT,
            )
            .await
            .map_err(|e| Error::SearchFailed(e.to_string()))?;
        Ok(resp.tracks.into_iter().map(track_to_result).collect())
    }
}

#[async_trait]
impl TrackResolver for SpotifyClient {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::Spotify
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, Error> {
        SpotifyClient::search(self, query, limit).await
    }

    async fn resolve_by_id(&self, id: &str) -> Result<Option<SearchResult>, Error> {
        Ok(self.get_track(id).await?.map(track_to_result))
    }

    async fn expand_playlist(&self, id: &str, limit: usize) -> Result<Vec<SearchResult>, Error> {
        self.playlist_tracks(id, limit).await
    }

    async fn to_track(&self, result: &SearchResult, requested_by: &str) -> Result<Track, Error> {
        // Pull the canonical record for the richer metadata fields; the
        // search result alone is enough if that lookup fails.
        let info = self.get_track(&result.id).await.unwrap_or(None);

        let metadata = match &info {
            Some(track) => json!({
                "description": result.description,
                "popularity": track.popularity,
                "explicit": track.explicit,
                "preview_url": track.preview_url,
                "isrc": track.external_ids.as_ref().and_then(|e| e.isrc.clone()),
                "album_name": track.album.name,
                "release_date": track.album.release_date,
                "artists": track.artists.iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
            }),
            None => json!({ "description": result.description }),
        };

        Ok(Track {
            title: result.title.clone(),
            artist: if result.channel_name.is_empty() {
                "Unknown Artist".to_string()
            } else {
                result.channel_name.clone()
            },
            duration: result.duration.clone(),
            platform: SourcePlatform::Spotify,
            platform_id: result.id.clone(),
            url: result.url.clone(),
            thumbnail: result.thumbnail.clone(),
            requested_by: requested_by.to_string(),
            added_at: Utc::now(),
            metadata,
        })
    }

    async fn recommend(&self, seed: &Track, limit: usize) -> Result<Vec<SearchResult>, Error> {
        self.recommendations(&[seed.platform_id.clone()], limit).await
    }
}

fn track_to_result(track: ApiTrack) -> SearchResult {
    let artists = join_artists(&track.artists);
    SearchResult {
        id: track.id,
        title: track.name.clone(),
        description: format!("{} - {}", artists, track.album.name),
        thumbnail: track
            .album
            .images
            .first()
            .map(|i| i.url.clone())
            .unwrap_or_default(),
        duration: format_duration_ms(track.duration_ms),
        url: track.external_urls.spotify,
        platform: SourcePlatform::Spotify,
        channel_name: artists,
        published_at: track.album.release_date.unwrap_or_default(),
    }
}

fn join_artists(artists: &[ApiArtist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_duration_ms(duration_ms: u64) -> String {
    let total_seconds = duration_ms / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Build a YouTube search query for a Spotify track: artists + title with
/// parentheticals, featuring markers, and remix/remaster qualifiers
/// stripped.
pub fn clean_search_query(artists: &str, title: &str) -> String {
    let raw = format!("{artists} {title}");
    let cleaned = PARENTHETICAL.replace_all(&raw, "");
    let cleaned = FEATURING.replace_all(&cleaned, "");
    let cleaned = REMIX_QUALIFIERS.replace_all(&cleaned, "");
    MULTI_SPACE.replace_all(&cleaned, " ").trim().to_string()
}

pub fn extract_track_id(url: &str) -> Option<String> {
    TRACK_ID_PATTERN.captures(url).map(|c| c[1].to_string())
}

pub fn extract_album_id(url: &str) -> Option<String> {
    ALBUM_ID_PATTERN.captures(url).map(|c| c[1].to_string())
}

pub fn extract_playlist_id(url: &str) -> Option<String> {
    PLAYLIST_ID_PATTERN
        .captures(url)
        .or_else(|| PLAYLIST_URI_PATTERN.captures(url))
        .map(|c| c[1].to_string())
}

pub fn is_spotify_url(url: &str) -> bool {
    url.contains("spotify.com") || url.starts_with("spotify:")
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<ApiTrack>,
}

#[derive(Deserialize)]
pub struct ApiTrack {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub artists: Vec<ApiArtist>,
    #[serde(default)]
    pub album: ApiAlbum,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub popularity: u32,
    #[serde(default)]
    pub explicit: bool,
    pub preview_url: Option<String>,
    pub external_ids: Option<ExternalIds>,
}

#[derive(Deserialize)]
pub struct ApiArtist {
    pub name: String,
}

fn default_kind() -> String {
    "track".to_string()
}

#[derive(Deserialize, Default)]
pub struct ApiAlbum {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<ApiImage>,
    #[serde(rename = "release_date")]
    pub release_date: Option<String>,
}

#[derive(Deserialize)]
pub struct ApiImage {
    pub url: String,
}

#[derive(Deserialize, Default)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: String,
}

#[derive(Deserialize)]
pub struct ExternalIds {
    pub isrc: Option<String>,
}

#[derive(Deserialize)]
struct AlbumTracksResponse {
    #[serde(default)]
    items: Vec<AlbumTrack>,
}

#[derive(Deserialize)]
struct AlbumTrack {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Deserialize)]
struct PlaylistTracksResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Deserialize)]
struct RecommendationsResponse {
    #[serde(default)]
    tracks: Vec<ApiTrack>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_featuring_and_parentheticals() {
        assert_eq!(
            clean_search_query("Daft Punk", "Get Lucky (feat. Pharrell Williams)"),
            "Daft Punk Get Lucky"
        );
        assert_eq!(
            clean_search_query("Queen", "Bohemian Rhapsody [2011 Remaster]"),
            "Queen Bohemian Rhapsody"
        );
        assert_eq!(
            clean_search_query("Artist", "Song ft. Guest remix"),
            "Artist Song Guest"
        );
    }

    #[test]
    fn clean_query_collapses_whitespace() {
        assert_eq!(
            clean_search_query("A  B", "  C   (Live)  "),
            "A B C"
        );
    }

    #[test]
    fn extracts_spotify_ids() {
        assert_eq!(
            extract_track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            Some("4uLU6hMCjMI75M1A2tKUQC".to_string())
        );
        assert_eq!(
            extract_album_id("https://open.spotify.com/album/2noRn2Aes5aoNVsU6iWThc"),
            Some("2noRn2Aes5aoNVsU6iWThc".to_string())
        );
        assert_eq!(
            extract_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=x"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(
            extract_playlist_id("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(extract_track_id("https://example.com/track/abc"), None);
    }

    #[test]
    fn spotify_url_detection() {
        assert!(is_spotify_url("https://open.spotify.com/track/x"));
        assert!(is_spotify_url("spotify:track:x"));
        assert!(!is_spotify_url("https://youtube.com/watch?v=x"));
    }

    #[test]
    fn formats_millisecond_durations() {
        assert_eq!(format_duration_ms(0), "0:00");
        assert_eq!(format_duration_ms(61_000), "1:01");
        assert_eq!(format_duration_ms(213_500), "3:33");
    }
}
