// File: groovebot-core/src/platforms/youtube/client.rs
//
// YouTube Data API v3 catalog client. Stream URL resolution lives in
// `stream.rs`; this file is metadata only.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use groovebot_common::models::{SearchResult, SourcePlatform, Track};
use groovebot_common::Error;

use crate::config::{CATALOG_TIMEOUT, PLAYLIST_TIMEOUT, YOUTUBE_MIN_INTERVAL};
use crate::platforms::{RateGate, TrackResolver};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:youtube\.com/watch\?v=|youtu\.be/)([a-zA-Z0-9_-]{11})").unwrap(),
        Regex::new(r"youtube\.com/embed/([a-zA-Z0-9_-]{11})").unwrap(),
        Regex::new(r"youtube\.com/v/([a-zA-Z0-9_-]{11})").unwrap(),
    ]
});

static PLAYLIST_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]list=([a-zA-Z0-9_-]+)").unwrap());

static ISO8601_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?").unwrap());

pub struct YouTubeClient {
    http: reqwest::Client,
    api_key: String,
    /// Cookies file handed to yt-dlp for age-gated streams.
    pub(crate) cookies: Option<PathBuf>,
    gate: RateGate,
}

impl YouTubeClient {
    pub fn new(http: reqwest::Client, api_key: String, cookies: Option<PathBuf>) -> Self {
        Self {
            http,
            api_key,
            cookies,
            gate: RateGate::new(YOUTUBE_MIN_INTERVAL),
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, Error> {
        self.gate.acquire().await;

        let max_results = max_results.to_string();
        let resp: SearchResponse = self
            .http
            .get(format!("{API_BASE}/search"))
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
                ("key", self.api_key.as_str()),
                ("videoEmbeddable", "true"),
                ("videoSyndicated", "true"),
            ])
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::SearchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::SearchFailed(e.to_string()))?;

        let mut results: Vec<SearchResult> = resp
            .items
            .into_iter()
            .filter_map(|item| {
                let id = item.id?.video_id?;
                Some(snippet_to_result(id, item.snippet?))
            })
            .collect();

        self.add_duration_info(&mut results).await;
        info!("YouTube search \"{}\" returned {} results", query, results.len());
        Ok(results)
    }

    /// Full metadata for one video; `None` if the id does not resolve.
    pub async fn video_info(&self, video_id: &str) -> Result<Option<SearchResult>, Error> {
        self.gate.acquire().await;

        let resp: VideosResponse = self
            .http
            .get(format!("{API_BASE}/videos"))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", video_id),
                ("key", self.api_key.as_str()),
            ])
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::CatalogLookupFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::CatalogLookupFailed(e.to_string()))?;

        let Some(item) = resp.items.into_iter().next() else {
            return Ok(None);
        };
        let Some(snippet) = item.snippet else {
            return Ok(None);
        };

        let mut result = snippet_to_result(item.id, snippet);
        if let Some(details) = item.content_details {
            result.duration = parse_iso8601_duration(&details.duration);
        }
        Ok(Some(result))
    }

    pub async fn playlist_videos(
        &self,
        playlist_id: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, Error> {
        self.gate.acquire().await;

        let max_results = max_results.to_string();
        let resp: PlaylistItemsResponse = self
            .http
            .get(format!("{API_BASE}/playlistItems"))
            .query(&[
                ("part", "snippet"),
                ("playlistId", playlist_id),
                ("maxResults", max_results.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .timeout(PLAYLIST_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::CatalogLookupFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::CatalogLookupFailed(e.to_string()))?;

        let mut results: Vec<SearchResult> = resp
            .items
            .into_iter()
            .filter_map(|item| {
                let snippet = item.snippet?;
                if snippet.title == "Private video" || snippet.title == "Deleted video" {
                    return None;
                }
                let id = snippet.resource_id.as_ref()?.video_id.clone();
                Some(snippet_to_result(id, snippet))
            })
            .collect();

        self.add_duration_info(&mut results).await;
        info!(
            "YouTube playlist {} expanded to {} videos",
            playlist_id,
            results.len()
        );
        Ok(results)
    }

    /// Search results come back without durations; fetch them in one batched
    /// videos call. Best effort: on failure the "0:00" placeholders stand.
    async fn add_duration_info(&self, results: &mut [SearchResult]) {
        if results.is_empty() {
            return;
        }
        self.gate.acquire().await;

        let ids = results
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let resp = self
            .http
            .get(format!("{API_BASE}/videos"))
            .query(&[
                ("part", "contentDetails"),
                ("id", ids.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .timeout(CATALOG_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let parsed: Result<VideosResponse, _> = match resp {
            Ok(r) => r.json().await,
            Err(e) => {
                error!("YouTube duration lookup failed: {}", e);
                return;
            }
        };
        let Ok(parsed) = parsed else {
            return;
        };

        for item in parsed.items {
            if let Some(details) = item.content_details {
                let human = parse_iso8601_duration(&details.duration);
                if let Some(result) = results.iter_mut().find(|r| r.id == item.id) {
                    result.duration = human;
                }
            }
        }
    }
}

#[async_trait]
impl TrackResolver for YouTubeClient {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::Youtube
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, Error> {
        YouTubeClient::search(self, query, limit).await
    }

    async fn resolve_by_id(&self, id: &str) -> Result<Option<SearchResult>, Error> {
        self.video_info(id).await
    }

    async fn expand_playlist(&self, id: &str, limit: usize) -> Result<Vec<SearchResult>, Error> {
        self.playlist_videos(id, limit).await
    }

    async fn to_track(&self, result: &SearchResult, requested_by: &str) -> Result<Track, Error> {
        Ok(Track {
            title: result.title.clone(),
            artist: if result.channel_name.is_empty() {
                "Unknown Artist".to_string()
            } else {
                result.channel_name.clone()
            },
            duration: result.duration.clone(),
            platform: SourcePlatform::Youtube,
            platform_id: result.id.clone(),
            url: result.url.clone(),
            thumbnail: result.thumbnail.clone(),
            requested_by: requested_by.to_string(),
            added_at: Utc::now(),
            metadata: json!({
                "description": result.description,
                "published_at": result.published_at,
            }),
        })
    }

    async fn recommend(&self, seed: &Track, limit: usize) -> Result<Vec<SearchResult>, Error> {
        // Keyword-similarity search: artist plus the first few title words.
        let head: Vec<&str> = seed.title.split_whitespace().take(3).collect();
        let query = format!("{} {}", seed.artist, head.join(" "));
        YouTubeClient::search(self, query.trim(), limit).await
    }
}

fn snippet_to_result(id: String, snippet: Snippet) -> SearchResult {
    let url = format!("https://www.youtube.com/watch?v={id}");
    let channel_name = snippet
        .video_owner_channel_title
        .unwrap_or(snippet.channel_title);
    SearchResult {
        id,
        title: snippet.title,
        description: snippet.description,
        thumbnail: snippet.thumbnails.best(),
        duration: "0:00".to_string(),
        url,
        platform: SourcePlatform::Youtube,
        channel_name,
        published_at: snippet.published_at,
    }
}

pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|p| p.captures(url))
        .map(|c| c[1].to_string())
}

pub fn extract_playlist_id(url: &str) -> Option<String> {
    PLAYLIST_ID_PATTERN
        .captures(url)
        .map(|c| c[1].to_string())
}

pub fn is_video_url(url: &str) -> bool {
    extract_video_id(url).is_some()
}

pub fn is_playlist_url(url: &str) -> bool {
    extract_playlist_id(url).is_some()
}

/// "PT1H2M3S" -> "1:02:03", "PT3M33S" -> "3:33".
pub fn parse_iso8601_duration(iso: &str) -> String {
    let Some(caps) = ISO8601_DURATION.captures(iso) else {
        return "0:00".to_string();
    };
    let get = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let (hours, minutes, seconds) = (get(1), get(2), get(3));
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: Option<SearchItemId>,
    snippet: Option<Snippet>,
}

#[derive(Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
    #[serde(rename = "videoOwnerChannelTitle")]
    video_owner_channel_title: Option<String>,
    #[serde(rename = "publishedAt", default)]
    published_at: String,
    #[serde(rename = "resourceId")]
    resource_id: Option<ResourceId>,
}

#[derive(Deserialize, Default)]
struct Thumbnails {
    maxres: Option<Thumbnail>,
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    #[serde(rename = "default")]
    fallback: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(self) -> String {
        self.maxres
            .or(self.high)
            .or(self.medium)
            .or(self.fallback)
            .map(|t| t.url)
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
struct ResourceId {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Deserialize)]
struct VideoItem {
    id: String,
    snippet: Option<Snippet>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
}

#[derive(Deserialize)]
struct ContentDetails {
    duration: String,
}

#[derive(Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    snippet: Option<Snippet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_video_ids_from_common_url_shapes() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://www.youtube.com/v/dQw4w9WgXcQ?rel=0"), id);
        assert_eq!(extract_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
        assert_eq!(extract_video_id("not a url"), None);
    }

    #[test]
    fn extracts_playlist_ids() {
        assert_eq!(
            extract_playlist_id("https://www.youtube.com/playlist?list=PLabc123_-xyz"),
            Some("PLabc123_-xyz".to_string())
        );
        assert_eq!(
            extract_playlist_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL0"),
            Some("PL0".to_string())
        );
        assert_eq!(extract_playlist_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), None);
    }

    #[test]
    fn parses_iso8601_durations() {
        assert_eq!(parse_iso8601_duration("PT3M33S"), "3:33");
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), "1:02:03");
        assert_eq!(parse_iso8601_duration("PT45S"), "0:45");
        assert_eq!(parse_iso8601_duration("PT2H"), "2:00:00");
        assert_eq!(parse_iso8601_duration("garbage"), "0:00");
    }
}
