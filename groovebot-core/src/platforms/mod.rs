// File: groovebot-core/src/platforms/mod.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use groovebot_common::models::{SearchResult, SourcePlatform, Track};
use groovebot_common::Error;

pub mod discord;
pub mod spotify;
pub mod youtube;

/// Capability interface over a source catalog. Selected once at track
/// creation time via the track's platform tag; callers never branch on
/// platform strings.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    fn platform(&self) -> SourcePlatform;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, Error>;

    /// Look up a single item by its platform-native identifier. Absence is
    /// represented, not an error.
    async fn resolve_by_id(&self, id: &str) -> Result<Option<SearchResult>, Error>;

    async fn expand_playlist(&self, id: &str, limit: usize) -> Result<Vec<SearchResult>, Error>;

    async fn to_track(&self, result: &SearchResult, requested_by: &str) -> Result<Track, Error>;

    /// Candidate follow-up tracks similar to `seed`, for autoplay.
    async fn recommend(&self, seed: &Track, limit: usize) -> Result<Vec<SearchResult>, Error>;
}

/// Resolver lookup keyed by platform tag.
pub struct ResolverSet {
    inner: HashMap<SourcePlatform, Arc<dyn TrackResolver>>,
}

impl ResolverSet {
    pub fn new(resolvers: impl IntoIterator<Item = Arc<dyn TrackResolver>>) -> Self {
        let mut inner = HashMap::new();
        for r in resolvers {
            inner.insert(r.platform(), r);
        }
        Self { inner }
    }

    pub fn get(&self, platform: SourcePlatform) -> Option<Arc<dyn TrackResolver>> {
        self.inner.get(&platform).cloned()
    }
}

/// Shared per-platform throttle. The spacing is imposed by the remote API,
/// so one gate serves every guild talking to that platform.
pub struct RateGate {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Waits until at least `min_interval` has passed since the previous
    /// acquisition, then records the new request time.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_gate_spaces_requests() {
        let gate = RateGate::new(Duration::from_millis(40));
        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        // Two enforced gaps after the free first acquisition.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn rate_gate_first_acquire_is_immediate() {
        let gate = RateGate::new(Duration::from_secs(5));
        let start = Instant::now();
        gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
