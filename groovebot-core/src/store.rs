// File: groovebot-core/src/store.rs
//
// JSON-file data manager for users, playlists, and guild preferences. The
// command layer is the only caller; sessions never touch persistence, and
// nothing in-flight (queues, current track) is ever written.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use groovebot_common::models::{GuildRecord, StoredPlaylist, UserRecord};
use groovebot_common::Error;

const USERS_FILE: &str = "users.json";
const PLAYLISTS_FILE: &str = "playlists.json";
const GUILDS_FILE: &str = "guilds.json";

pub struct DataManager {
    data_dir: PathBuf,
    users: Mutex<HashMap<String, UserRecord>>,
    playlists: Mutex<HashMap<Uuid, StoredPlaylist>>,
    guilds: Mutex<HashMap<u64, GuildRecord>>,
}

async fn load_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn save_file<T: Serialize>(path: &Path, records: &[T]) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(records)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

impl DataManager {
    /// Create the data directory if needed and load whatever records exist;
    /// missing files mean a fresh start, not an error.
    pub async fn load(data_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let users: Vec<UserRecord> = load_file(&data_dir.join(USERS_FILE)).await?;
        let playlists: Vec<StoredPlaylist> = load_file(&data_dir.join(PLAYLISTS_FILE)).await?;
        let guilds: Vec<GuildRecord> = load_file(&data_dir.join(GUILDS_FILE)).await?;

        info!(
            "data manager loaded: {} users, {} playlists, {} guilds",
            users.len(),
            playlists.len(),
            guilds.len()
        );

        Ok(Self {
            data_dir,
            users: Mutex::new(users.into_iter().map(|u| (u.discord_id.clone(), u)).collect()),
            playlists: Mutex::new(playlists.into_iter().map(|p| (p.id, p)).collect()),
            guilds: Mutex::new(guilds.into_iter().map(|g| (g.guild_id, g)).collect()),
        })
    }

    pub async fn save_all(&self) -> Result<(), Error> {
        let users: Vec<UserRecord> = self.users.lock().await.values().cloned().collect();
        save_file(&self.data_dir.join(USERS_FILE), &users).await?;

        let playlists: Vec<StoredPlaylist> =
            self.playlists.lock().await.values().cloned().collect();
        save_file(&self.data_dir.join(PLAYLISTS_FILE), &playlists).await?;

        let guilds: Vec<GuildRecord> = self.guilds.lock().await.values().cloned().collect();
        save_file(&self.data_dir.join(GUILDS_FILE), &guilds).await?;
        Ok(())
    }

    /// Periodic background save. Failures are logged, never fatal.
    pub fn spawn_autosave(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // immediate first tick
            loop {
                tick.tick().await;
                if let Err(e) = store.save_all().await {
                    error!("autosave failed: {}", e);
                }
            }
        })
    }

    pub async fn get_user(&self, discord_id: &str) -> Option<UserRecord> {
        self.users.lock().await.get(discord_id).cloned()
    }

    /// Create-or-touch: records that the user was just active.
    pub async fn touch_user_activity(&self, discord_id: &str) -> UserRecord {
        let mut users = self.users.lock().await;
        let user = users
            .entry(discord_id.to_string())
            .or_insert_with(|| UserRecord::new(discord_id));
        user.last_active = Utc::now();
        user.clone()
    }

    pub async fn create_playlist(&self, name: &str, owner: &str) -> StoredPlaylist {
        let playlist = StoredPlaylist::new(name, owner);
        let mut users = self.users.lock().await;
        users
            .entry(owner.to_string())
            .or_insert_with(|| UserRecord::new(owner))
            .playlists
            .push(playlist.id);
        drop(users);

        self.playlists.lock().await.insert(playlist.id, playlist.clone());
        playlist
    }

    pub async fn get_playlist(&self, id: Uuid) -> Option<StoredPlaylist> {
        self.playlists.lock().await.get(&id).cloned()
    }

    pub async fn delete_playlist(&self, id: Uuid) -> bool {
        let removed = self.playlists.lock().await.remove(&id);
        if let Some(playlist) = &removed {
            if let Some(owner) = self.users.lock().await.get_mut(&playlist.owner) {
                owner.playlists.retain(|p| *p != id);
            }
        }
        removed.is_some()
    }

    pub async fn user_playlists(&self, discord_id: &str) -> Vec<StoredPlaylist> {
        let playlists = self.playlists.lock().await;
        playlists
            .values()
            .filter(|p| p.owner == discord_id)
            .cloned()
            .collect()
    }

    pub async fn update_playlist<F>(&self, id: Uuid, mutate: F) -> Option<StoredPlaylist>
    where
        F: FnOnce(&mut StoredPlaylist),
    {
        let mut playlists = self.playlists.lock().await;
        let playlist = playlists.get_mut(&id)?;
        mutate(playlist);
        playlist.updated_at = Utc::now();
        Some(playlist.clone())
    }

    pub async fn guild_record(&self, guild_id: u64) -> GuildRecord {
        self.guilds
            .lock()
            .await
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildRecord::new(guild_id))
    }

    pub async fn update_guild_record<F>(&self, guild_id: u64, mutate: F) -> GuildRecord
    where
        F: FnOnce(&mut GuildRecord),
    {
        let mut guilds = self.guilds.lock().await;
        let record = guilds
            .entry(guild_id)
            .or_insert_with(|| GuildRecord::new(guild_id));
        mutate(record);
        record.updated_at = Utc::now();
        record.clone()
    }
}

#[cfg(test)]
mod tests {
    use groovebot_common::models::{SourcePlatform, Track};
    use serde_json::json;

    use super::*;

    fn track(title: &str) -> Track {
        Track {
            title: title.to_string(),
            artist: "artist".to_string(),
            duration: "2:30".to_string(),
            platform: SourcePlatform::Spotify,
            platform_id: "id".to_string(),
            url: "https://open.spotify.com/track/id".to_string(),
            thumbnail: String::new(),
            requested_by: "user".to_string(),
            added_at: Utc::now(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn round_trips_users_and_playlists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DataManager::load(dir.path()).await.unwrap();
            store.touch_user_activity("42").await;
            let playlist = store.create_playlist("road trip", "42").await;
            store
                .update_playlist(playlist.id, |p| p.tracks.push(track("song")))
                .await
                .unwrap();
            store
                .update_guild_record(7, |g| {
                    g.volume = 80;
                    g.autoplay = true;
                })
                .await;
            store.save_all().await.unwrap();
        }

        let store = DataManager::load(dir.path()).await.unwrap();
        let user = store.get_user("42").await.expect("user persisted");
        assert_eq!(user.playlists.len(), 1);

        let playlists = store.user_playlists("42").await;
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].name, "road trip");
        assert_eq!(playlists[0].tracks.len(), 1);

        let guild = store.guild_record(7).await;
        assert_eq!(guild.volume, 80);
        assert!(guild.autoplay);
    }

    #[tokio::test]
    async fn missing_files_mean_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataManager::load(dir.path().join("nested")).await.unwrap();
        assert!(store.get_user("nobody").await.is_none());
        assert_eq!(store.guild_record(1).await.volume, 50);
    }

    #[tokio::test]
    async fn delete_playlist_detaches_from_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataManager::load(dir.path()).await.unwrap();
        let playlist = store.create_playlist("gone soon", "9").await;
        assert!(store.delete_playlist(playlist.id).await);
        assert!(!store.delete_playlist(playlist.id).await);
        assert!(store.get_playlist(playlist.id).await.is_none());
        let owner = store.get_user("9").await.unwrap();
        assert!(owner.playlists.is_empty());
    }
}
