// File: groovebot-core/src/audio/registry.rs
//
// Guild id -> playback session map. The only creation path is
// get-or-create (implicitly via join); sessions remove themselves through
// the lifecycle channel when their transport dies.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use groovebot_common::models::QualityTier;
use groovebot_common::Error;

use crate::audio::pipeline::SourceFactory;
use crate::audio::session::PlaybackSession;
use crate::audio::transport::VoiceGateway;
use crate::platforms::ResolverSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub active_connections: usize,
    pub total_queued: usize,
    pub total_playing: usize,
}

pub struct SessionRegistry {
    sessions: DashMap<u64, Arc<PlaybackSession>>,
    gateway: Arc<dyn VoiceGateway>,
    sources: Arc<dyn SourceFactory>,
    resolvers: Arc<ResolverSet>,
    quality: QualityTier,
    teardown_tx: mpsc::UnboundedSender<(u64, Uuid)>,
}

impl SessionRegistry {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        sources: Arc<dyn SourceFactory>,
        resolvers: Arc<ResolverSet>,
        quality: QualityTier,
    ) -> Arc<Self> {
        let (teardown_tx, mut teardown_rx) = mpsc::unbounded_channel::<(u64, Uuid)>();
        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            gateway,
            sources,
            resolvers,
            quality,
            teardown_tx,
        });

        // Janitor: drop registry entries for sessions that tore themselves
        // down. Matching on the session id keeps a teardown notification
        // from removing a newer session that already took the guild slot.
        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            while let Some((guild_id, session_id)) = teardown_rx.recv().await {
                let Some(registry) = weak.upgrade() else { break };
                registry
                    .sessions
                    .remove_if(&guild_id, |_, session| session.id() == session_id);
                debug!("registry released session {} for guild {}", session_id, guild_id);
            }
        });

        registry
    }

    fn make_session(&self, guild_id: u64) -> Arc<PlaybackSession> {
        PlaybackSession::spawn(
            guild_id,
            self.gateway.clone(),
            self.sources.clone(),
            self.resolvers.clone(),
            self.quality,
            self.teardown_tx.clone(),
        )
    }

    /// The single creation path. A destroyed session still occupying the
    /// slot is replaced with a fresh one carrying default modifiers.
    pub fn get_or_create(&self, guild_id: u64) -> Arc<PlaybackSession> {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_destroyed() {
                    let fresh = self.make_session(guild_id);
                    entry.insert(fresh.clone());
                    fresh
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                info!("creating playback session for guild {}", guild_id);
                let session = self.make_session(guild_id);
                entry.insert(session.clone());
                session
            }
        }
    }

    /// Lookup without creation; absence (or a dead session) is `None`.
    pub fn get(&self, guild_id: u64) -> Option<Arc<PlaybackSession>> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.is_destroyed())
    }

    /// Get-or-create plus transport join, the canonical entry point for
    /// the command layer.
    pub async fn join_channel(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Arc<PlaybackSession>, Error> {
        let session = self.get_or_create(guild_id);
        session.join_channel(channel_id).await?;
        Ok(session)
    }

    fn live_sessions(&self) -> Vec<Arc<PlaybackSession>> {
        // Snapshot the arcs before awaiting on them; holding dashmap guards
        // across awaits would contend with the janitor.
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub async fn active_guilds(&self) -> Vec<u64> {
        let mut guilds = Vec::new();
        for session in self.live_sessions() {
            if session.is_connected().await {
                guilds.push(session.guild_id());
            }
        }
        guilds
    }

    pub async fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            active_connections: 0,
            total_queued: 0,
            total_playing: 0,
        };
        for session in self.live_sessions() {
            if session.is_connected().await {
                stats.active_connections += 1;
            }
            stats.total_queued += session.queue_len().await;
            if session.is_playing().await {
                stats.total_playing += 1;
            }
        }
        stats
    }

    pub async fn disconnect(&self, guild_id: u64) -> bool {
        match self.get(guild_id) {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Process-shutdown path: tear down every live session.
    pub async fn disconnect_all(&self) {
        let sessions = self.live_sessions();
        info!("disconnecting {} active sessions", sessions.len());
        for session in sessions {
            session.disconnect().await;
        }
    }
}
