// File: groovebot-core/src/audio/pipeline.rs
//
// Turns a Track into a probed, streamable audio source: platform dispatch
// to a direct stream URL, HTTP materialization with a bounded connect
// deadline, and container sniffing before anything reaches the encoder.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::error;

use groovebot_common::models::{QualityTier, SourcePlatform, Track};
use groovebot_common::Error;

use crate::audio::probe::{StreamKind, detect_stream_kind};
use crate::config::STREAM_TIMEOUT;
use crate::platforms::spotify::SpotifyClient;
use crate::platforms::spotify::client::clean_search_query;
use crate::platforms::youtube::YouTubeClient;
use crate::platforms::youtube::stream::BROWSER_USER_AGENT;

/// Bytes sniffed before the stream is trusted.
const PROBE_LEN: usize = 8192;

/// A decoded-ready audio stream: the resolved URL it came from, the probed
/// framing, and the byte stream itself (probe head re-chained in front).
pub struct AudioSource {
    pub stream_url: String,
    pub kind: StreamKind,
    pub reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

/// Session-facing factory seam. Failure is `None`, never a partial source;
/// the session translates that into `PlaybackFailed`.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn create_source(&self, track: &Track, quality: QualityTier) -> Option<AudioSource>;
}

pub struct AudioPipeline {
    http: reqwest::Client,
    youtube: Arc<YouTubeClient>,
    spotify: Arc<SpotifyClient>,
}

impl AudioPipeline {
    pub fn new(
        http: reqwest::Client,
        youtube: Arc<YouTubeClient>,
        spotify: Arc<SpotifyClient>,
    ) -> Self {
        Self {
            http,
            youtube,
            spotify,
        }
    }

    /// Platform dispatch down to a direct stream URL. Spotify has no
    /// streamable audio, so its tracks route through a cleaned YouTube
    /// search and play the top hit.
    async fn resolve_stream_url(
        &self,
        track: &Track,
        quality: QualityTier,
    ) -> Result<String, Error> {
        match track.platform {
            SourcePlatform::Youtube => self.youtube.stream_url(&track.platform_id, quality).await,
            SourcePlatform::Spotify => {
                let info = self
                    .spotify
                    .get_track(&track.platform_id)
                    .await?
                    .ok_or_else(|| {
                        Error::CatalogLookupFailed(format!(
                            "Spotify track {} not found",
                            track.platform_id
                        ))
                    })?;
                let artists = info
                    .artists
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let query = clean_search_query(&artists, &info.name);
                let hits = self.youtube.search(&query, 1).await?;
                let hit = hits.first().ok_or_else(|| {
                    Error::PlaybackFailed(format!("no YouTube match for \"{query}\""))
                })?;
                self.youtube.stream_url(&hit.id, quality).await
            }
        }
    }

    async fn open_stream(&self, stream_url: String) -> Result<AudioSource, Error> {
        // The deadline covers connect + response headers; the body itself
        // streams for the length of the track.
        let request = self
            .http
            .get(&stream_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT);
        let response = timeout(STREAM_TIMEOUT, request.send())
            .await??
            .error_for_status()?;

        let mut body = response.bytes_stream();
        let mut head: Vec<u8> = Vec::with_capacity(PROBE_LEN);
        while head.len() < PROBE_LEN {
            match timeout(STREAM_TIMEOUT, body.next()).await? {
                Some(chunk) => head.extend_from_slice(&chunk?),
                None => break,
            }
        }

        let kind = detect_stream_kind(&head).ok_or_else(|| {
            Error::PlaybackFailed("unrecognized container framing in stream".to_string())
        })?;

        // Relay the rest of the body through a channel so the reader handed
        // onward is independent of the reqwest response lifetime.
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
        tokio::spawn(async move {
            let mut body = body;
            while let Some(next) = body.next().await {
                let item = next.map_err(std::io::Error::other);
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        let reader = Cursor::new(Bytes::from(head)).chain(StreamReader::new(ReceiverStream::new(rx)));
        Ok(AudioSource {
            stream_url,
            kind,
            reader: Box::new(reader),
        })
    }
}

#[async_trait]
impl SourceFactory for AudioPipeline {
    async fn create_source(&self, track: &Track, quality: QualityTier) -> Option<AudioSource> {
        let stream_url = match self.resolve_stream_url(track, quality).await {
            Ok(url) => url,
            Err(e) => {
                error!("stream resolution failed for \"{}\": {}", track.title, e);
                return None;
            }
        };
        match self.open_stream(stream_url).await {
            Ok(source) => Some(source),
            Err(e) => {
                error!("stream open failed for \"{}\": {}", track.title, e);
                None
            }
        }
    }
}
