// File: groovebot-core/src/platforms/youtube/stream.rs
//
// Direct stream URL resolution via yt-dlp. The catalog API never exposes
// stream URLs, so this shells out to `yt-dlp --dump-single-json` and picks
// a format out of the reported list.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use groovebot_common::models::QualityTier;
use groovebot_common::Error;

use super::client::YouTubeClient;

const YTDLP_BIN: &str = "yt-dlp";
pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// The marker yt-dlp prints when a video is age-gated.
const AGE_GATE_MARKER: &str = "Sign in to confirm your age";

#[derive(Debug, Deserialize)]
pub struct VideoFormat {
    pub url: String,
    /// Audio bitrate in kbps, when reported.
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    #[serde(default)]
    formats: Vec<VideoFormat>,
}

enum CookieSource<'a> {
    Anonymous,
    File(&'a Path),
    Browser(&'a str),
}

async fn dump_stream_info(url: &str, cookies: CookieSource<'_>) -> Result<StreamInfo, Error> {
    let mut cmd = Command::new(YTDLP_BIN);
    cmd.arg("--dump-single-json")
        .arg("--no-check-certificates")
        .arg("--no-warnings")
        .arg("--prefer-free-formats")
        .arg("--age-limit")
        .arg("99")
        .arg("--skip-download")
        .arg("--add-header")
        .arg("referer:youtube.com")
        .arg("--add-header")
        .arg(format!("user-agent:{BROWSER_USER_AGENT}"));

    match cookies {
        CookieSource::Anonymous => {}
        CookieSource::File(path) => {
            cmd.arg("--cookies").arg(path);
        }
        CookieSource::Browser(browser) => {
            cmd.arg("--cookies-from-browser").arg(browser);
        }
    }
    cmd.arg(url);

    let output = cmd.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Platform(format!(
            "yt-dlp failed: {}",
            stderr.trim()
        )));
    }
    Ok(serde_json::from_slice(&output.stdout)?)
}

fn is_age_restricted(err: &Error) -> bool {
    err.to_string().contains(AGE_GATE_MARKER)
}

impl YouTubeClient {
    /// Resolve a time-limited direct stream URL for a video. Age-gated
    /// videos are retried with the configured cookies file, then with
    /// browser cookies; when every retry fails the original failure is the
    /// one reported.
    pub async fn stream_url(
        &self,
        video_id: &str,
        quality: QualityTier,
    ) -> Result<String, Error> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");

        let original = match dump_stream_info(&url, CookieSource::Anonymous).await {
            Ok(info) => return pick_stream_url(&info.formats, quality),
            Err(e) if is_age_restricted(&e) => e,
            Err(e) => return Err(e),
        };

        info!("age-restricted video {}, retrying with credentials", video_id);

        if let Some(path) = &self.cookies {
            match dump_stream_info(&url, CookieSource::File(path)).await {
                Ok(info) => return pick_stream_url(&info.formats, quality),
                Err(e) => warn!("cookie-file retry failed for {}: {}", video_id, e),
            }
        }

        match dump_stream_info(&url, CookieSource::Browser("chrome")).await {
            Ok(info) => pick_stream_url(&info.formats, quality),
            Err(e) => {
                warn!("browser-cookie retry failed for {}: {}", video_id, e);
                Err(original)
            }
        }
    }
}

fn pick_stream_url(formats: &[VideoFormat], quality: QualityTier) -> Result<String, Error> {
    select_best_format(formats, quality)
        .map(|f| f.url.clone())
        .ok_or_else(|| Error::PlaybackFailed("no usable audio format".to_string()))
}

fn has_audio(format: &VideoFormat) -> bool {
    format.acodec.as_deref().is_some_and(|c| c != "none")
}

fn has_video(format: &VideoFormat) -> bool {
    format.vcodec.as_deref().is_some_and(|c| c != "none")
}

/// Prefer audio-only formats, falling back to combined audio+video. Within
/// the pool, take the bitrate numerically closest to the quality target;
/// ties keep the earlier format.
pub fn select_best_format(
    formats: &[VideoFormat],
    quality: QualityTier,
) -> Option<&VideoFormat> {
    let audio_only: Vec<&VideoFormat> = formats
        .iter()
        .filter(|f| has_audio(f) && !has_video(f))
        .collect();

    let pool = if audio_only.is_empty() {
        formats
            .iter()
            .filter(|f| has_audio(f) && has_video(f))
            .collect()
    } else {
        audio_only
    };

    let target = quality.target_bitrate();
    let mut best: Option<&VideoFormat> = None;
    let mut best_diff = f64::INFINITY;
    for format in pool {
        let diff = (format.abr.unwrap_or(128.0) - target).abs();
        if diff < best_diff {
            best = Some(format);
            best_diff = diff;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(url: &str, abr: Option<f64>, acodec: Option<&str>, vcodec: Option<&str>) -> VideoFormat {
        VideoFormat {
            url: url.to_string(),
            abr,
            acodec: acodec.map(str::to_string),
            vcodec: vcodec.map(str::to_string),
        }
    }

    #[test]
    fn prefers_audio_only_formats() {
        let formats = vec![
            fmt("combined", Some(128.0), Some("opus"), Some("vp9")),
            fmt("audio", Some(96.0), Some("opus"), None),
        ];
        let best = select_best_format(&formats, QualityTier::Medium).unwrap();
        assert_eq!(best.url, "audio");
    }

    #[test]
    fn falls_back_to_combined_formats() {
        let formats = vec![
            fmt("video-only", None, Some("none"), Some("vp9")),
            fmt("combined-low", Some(64.0), Some("aac"), Some("h264")),
            fmt("combined-high", Some(192.0), Some("aac"), Some("h264")),
        ];
        let best = select_best_format(&formats, QualityTier::High).unwrap();
        assert_eq!(best.url, "combined-high");
    }

    #[test]
    fn picks_closest_bitrate_to_target() {
        let formats = vec![
            fmt("a", Some(48.0), Some("opus"), Some("none")),
            fmt("b", Some(70.0), Some("opus"), Some("none")),
            fmt("c", Some(160.0), Some("opus"), Some("none")),
        ];
        assert_eq!(select_best_format(&formats, QualityTier::Low).unwrap().url, "b");
        assert_eq!(select_best_format(&formats, QualityTier::High).unwrap().url, "c");
    }

    #[test]
    fn tie_keeps_encounter_order() {
        let formats = vec![
            fmt("first", Some(120.0), Some("opus"), None),
            fmt("second", Some(136.0), Some("opus"), None),
        ];
        // Both are 8 kbps away from the medium target of 128.
        let best = select_best_format(&formats, QualityTier::Medium).unwrap();
        assert_eq!(best.url, "first");
    }

    #[test]
    fn missing_bitrate_defaults_to_medium() {
        let formats = vec![
            fmt("unknown", None, Some("opus"), None),
            fmt("far", Some(320.0), Some("opus"), None),
        ];
        let best = select_best_format(&formats, QualityTier::Medium).unwrap();
        assert_eq!(best.url, "unknown");
    }

    #[test]
    fn no_audio_formats_yields_none() {
        let formats = vec![fmt("video", None, Some("none"), Some("vp9"))];
        assert!(select_best_format(&formats, QualityTier::Medium).is_none());
    }
}
