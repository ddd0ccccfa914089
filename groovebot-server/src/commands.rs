// File: groovebot-server/src/commands.rs
//
// Slash-command glue over the playback core. Everything user-facing
// (wording, formatting, limits) lives here; the core only reports error
// kinds.

use std::sync::Arc;

use tracing::{error, info};

use groovebot_common::Error;
use groovebot_common::models::{LoopMode, Track};
use groovebot_core::audio::registry::SessionRegistry;
use groovebot_core::config::{MAX_PLAYLIST_TRACKS, MAX_QUEUE_SIZE, SEARCH_RESULT_LIMIT};
use groovebot_core::platforms::TrackResolver;
use groovebot_core::platforms::spotify::{SpotifyClient, client as spotify_urls};
use groovebot_core::platforms::youtube::{YouTubeClient, client as youtube_urls};
use groovebot_core::store::DataManager;

pub struct Data {
    pub registry: Arc<SessionRegistry>,
    pub youtube: Arc<YouTubeClient>,
    pub spotify: Arc<SpotifyClient>,
    pub store: Arc<DataManager>,
}

pub type CommandError = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, CommandError>;

/// Error kind -> user-facing wording.
fn user_message(err: &Error) -> &'static str {
    match err {
        Error::NotInVoiceChannel => "I'm not connected to a voice channel.",
        Error::VoiceConnectionFailed(_) => "Could not connect to the voice channel.",
        Error::PlaybackFailed(_) => "That track could not be played.",
        Error::SearchFailed(_) => "Search failed, please try again.",
        Error::CatalogLookupFailed(_) => "Could not look that up right now.",
        Error::InvalidSource(_) => "That URL is not supported.",
        _ => "Something went wrong, please try again.",
    }
}

/// The caller's current voice channel, if any. The cache guard must not be
/// held across an await point, hence the tight scope.
fn user_voice_channel(ctx: &Context<'_>) -> Option<(u64, u64)> {
    let guild = ctx.guild()?;
    let channel = guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|vs| vs.channel_id)?;
    Some((guild.id.get(), channel.get()))
}

fn is_url(text: &str) -> bool {
    url::Url::parse(text).is_ok()
}

/// Query classification: YouTube video/playlist URL, Spotify
/// track/album/playlist URL or URI, otherwise a text search (YouTube
/// first, Spotify as fallback).
async fn resolve_query(data: &Data, query: &str, requester: &str) -> Result<Vec<Track>, Error> {
    if is_url(query) {
        resolve_url(data, query, requester).await
    } else {
        resolve_text(data, query, requester).await
    }
}

async fn resolve_url(data: &Data, url: &str, requester: &str) -> Result<Vec<Track>, Error> {
    if let Some(video_id) = youtube_urls::extract_video_id(url) {
        let Some(result) = data.youtube.video_info(&video_id).await? else {
            return Ok(Vec::new());
        };
        return Ok(vec![data.youtube.to_track(&result, requester).await?]);
    }

    if youtube_urls::is_playlist_url(url) {
        let playlist_id = youtube_urls::extract_playlist_id(url)
            .ok_or_else(|| Error::InvalidSource(url.to_string()))?;
        let results = data
            .youtube
            .playlist_videos(&playlist_id, MAX_PLAYLIST_TRACKS)
            .await?;
        let mut tracks = Vec::with_capacity(results.len());
        for result in &results {
            tracks.push(data.youtube.to_track(result, requester).await?);
        }
        return Ok(tracks);
    }

    if spotify_urls::is_spotify_url(url) {
        if let Some(track_id) = spotify_urls::extract_track_id(url) {
            let Some(result) = data.spotify.resolve_by_id(&track_id).await? else {
                return Ok(Vec::new());
            };
            return Ok(vec![data.spotify.to_track(&result, requester).await?]);
        }
        if let Some(album_id) = spotify_urls::extract_album_id(url) {
            let results = data
                .spotify
                .album_tracks(&album_id, MAX_PLAYLIST_TRACKS)
                .await?;
            let mut tracks = Vec::with_capacity(results.len());
            for result in &results {
                tracks.push(data.spotify.to_track(result, requester).await?);
            }
            return Ok(tracks);
        }
        if let Some(playlist_id) = spotify_urls::extract_playlist_id(url) {
            let results = data
                .spotify
                .playlist_tracks(&playlist_id, MAX_PLAYLIST_TRACKS)
                .await?;
            let mut tracks = Vec::with_capacity(results.len());
            for result in &results {
                tracks.push(data.spotify.to_track(result, requester).await?);
            }
            return Ok(tracks);
        }
        return Err(Error::InvalidSource(url.to_string()));
    }

    Err(Error::InvalidSource(url.to_string()))
}

async fn resolve_text(data: &Data, query: &str, requester: &str) -> Result<Vec<Track>, Error> {
    let youtube_hits = data.youtube.search(query, SEARCH_RESULT_LIMIT).await?;
    if let Some(best) = youtube_hits.first() {
        return Ok(vec![data.youtube.to_track(best, requester).await?]);
    }

    let spotify_hits = data.spotify.search(query, SEARCH_RESULT_LIMIT).await?;
    if let Some(best) = spotify_hits.first() {
        return Ok(vec![data.spotify.to_track(best, requester).await?]);
    }

    Ok(Vec::new())
}

/// Play a track or playlist from a query or URL.
#[poise::command(slash_command, guild_only)]
pub async fn play(
    ctx: Context<'_>,
    #[description = "Song name, artist, or YouTube/Spotify URL"] query: String,
    #[description = "Insert at the front of the queue"] next: Option<bool>,
) -> Result<(), CommandError> {
    ctx.defer().await?;

    let Some((guild_id, channel_id)) = user_voice_channel(&ctx) else {
        ctx.say("You must be in a voice channel.").await?;
        return Ok(());
    };

    let data = ctx.data();
    let session = match data.registry.join_channel(guild_id, channel_id).await {
        Ok(session) => session,
        Err(e) => {
            error!("join failed for guild {}: {}", guild_id, e);
            ctx.say(user_message(&e)).await?;
            return Ok(());
        }
    };

    let requester = ctx.author().id.to_string();
    let tracks = match resolve_query(data, &query, &requester).await {
        Ok(tracks) => tracks,
        Err(e) => {
            error!("query \"{}\" failed: {}", query, e);
            ctx.say(user_message(&e)).await?;
            return Ok(());
        }
    };
    if tracks.is_empty() {
        ctx.say("No results found.").await?;
        return Ok(());
    }

    // Activity recording is best-effort; the reply never waits on it.
    {
        let store = data.store.clone();
        let user_id = requester.clone();
        tokio::spawn(async move {
            store.touch_user_activity(&user_id).await;
        });
    }

    if let [track] = tracks.as_slice() {
        let track = track.clone();
        let idle = session.current_track().await.is_none() && !session.is_playing().await;
        if idle {
            match session.play(track.clone()).await {
                Ok(()) => {
                    ctx.say(format!(
                        "Now playing **{}** by {} [{}]",
                        track.title, track.artist, track.duration
                    ))
                    .await?;
                }
                Err(e) => {
                    ctx.say(user_message(&e)).await?;
                }
            }
        } else if session.queue_len().await >= MAX_QUEUE_SIZE {
            ctx.say(format!("The queue is full ({MAX_QUEUE_SIZE} tracks max)."))
                .await?;
        } else if next.unwrap_or(false) {
            session.insert_front(track.clone()).await;
            ctx.say(format!("**{}** will play next.", track.title)).await?;
        } else {
            session.add_to_queue(track.clone()).await;
            let position = session.queue_len().await;
            ctx.say(format!(
                "Queued **{}** by {} (position {position})",
                track.title, track.artist
            ))
            .await?;
        }
        return Ok(());
    }

    // Playlist: play the first track if nothing is on, queue the rest.
    let total = tracks.len().min(MAX_PLAYLIST_TRACKS);
    let mut added = 0usize;
    for track in tracks.into_iter().take(MAX_PLAYLIST_TRACKS) {
        if added == 0 && session.current_track().await.is_none() {
            if session.play(track).await.is_ok() {
                added += 1;
            }
            continue;
        }
        if session.queue_len().await >= MAX_QUEUE_SIZE {
            break;
        }
        session.add_to_queue(track).await;
        added += 1;
    }
    info!("playlist added {added}/{total} tracks in guild {guild_id}");
    ctx.say(format!("Added **{added}** tracks to the queue.")).await?;
    Ok(())
}

/// Pause the current track.
#[poise::command(slash_command, guild_only)]
pub async fn pause(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    if session.pause().await {
        ctx.say("Paused.").await?;
    } else {
        ctx.say("Nothing is playing.").await?;
    }
    Ok(())
}

/// Resume a paused track.
#[poise::command(slash_command, guild_only)]
pub async fn resume(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    if session.resume().await {
        ctx.say("Resumed.").await?;
    } else {
        ctx.say("Nothing is paused.").await?;
    }
    Ok(())
}

/// Skip the current track (optionally several at once).
#[poise::command(slash_command, guild_only)]
pub async fn skip(
    ctx: Context<'_>,
    #[description = "How many tracks to skip"]
    #[min = 1]
    #[max = 10]
    count: Option<u32>,
) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    let Some(current) = session.current_track().await else {
        ctx.say("Nothing is playing.").await?;
        return Ok(());
    };

    let count = count.unwrap_or(1) as usize;
    let skipped = if count == 1 {
        usize::from(session.skip().await)
    } else {
        session.skip_many(count).await
    };
    if skipped == 0 {
        ctx.say("Nothing to skip.").await?;
        return Ok(());
    }

    let mut reply = if skipped == 1 {
        format!("Skipped **{}**.", current.title)
    } else {
        format!("Skipped **{skipped}** tracks.")
    };
    match session.current_track().await {
        Some(track) => reply.push_str(&format!(" Now playing **{}**.", track.title)),
        None if session.autoplay().await => reply.push_str(" Looking for something similar..."),
        None => reply.push_str(" The queue is empty."),
    }
    ctx.say(reply).await?;
    Ok(())
}

/// Stop playback and clear the queue.
#[poise::command(slash_command, guild_only)]
pub async fn stop(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    if session.stop().await {
        ctx.say("Stopped playback and cleared the queue.").await?;
    } else {
        ctx.say("Nothing is playing.").await?;
    }
    Ok(())
}

/// Show the current queue.
#[poise::command(slash_command, guild_only)]
pub async fn queue(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };

    let data = session.music_data().await;
    let mut lines = Vec::new();
    match &data.current_track {
        Some(track) => lines.push(format!(
            "Now playing: **{}** by {} [{}]",
            track.title, track.artist, track.duration
        )),
        None => lines.push("Nothing is playing.".to_string()),
    }
    if data.queue.is_empty() {
        lines.push("The queue is empty.".to_string());
    } else {
        for (i, item) in data.queue.iter().take(10).enumerate() {
            lines.push(format!(
                "{}. **{}** by {} [{}]",
                i + 1,
                item.track.title,
                item.track.artist,
                item.track.duration
            ));
        }
        if data.queue.len() > 10 {
            lines.push(format!("... and {} more", data.queue.len() - 10));
        }
    }
    ctx.say(lines.join("\n")).await?;
    Ok(())
}

/// Show what's playing and the session settings.
#[poise::command(slash_command, guild_only)]
pub async fn nowplaying(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };

    let data = session.music_data().await;
    let Some(track) = data.current_track else {
        ctx.say("Nothing is playing.").await?;
        return Ok(());
    };
    let state = if data.is_paused { "paused" } else { "playing" };
    ctx.say(format!(
        "**{}** by {} [{}] ({state})\nRequested by <@{}> | volume {}% | loop {} | autoplay {}",
        track.title,
        track.artist,
        track.duration,
        track.requested_by,
        data.volume,
        data.loop_mode,
        if data.autoplay { "on" } else { "off" },
    ))
    .await?;
    Ok(())
}

/// Set the playback volume (0-100).
#[poise::command(slash_command, guild_only)]
pub async fn volume(
    ctx: Context<'_>,
    #[description = "Volume percentage (0-100)"] level: i64,
) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    if session.set_volume(level).await {
        ctx.say(format!("Volume set to {level}%.")).await?;
        let store = ctx.data().store.clone();
        tokio::spawn(async move {
            store
                .update_guild_record(guild_id, |g| g.volume = level as u8)
                .await;
        });
    } else {
        ctx.say("Volume must be between 0 and 100.").await?;
    }
    Ok(())
}

#[derive(poise::ChoiceParameter)]
pub enum LoopChoice {
    #[name = "none"]
    None,
    #[name = "track"]
    Track,
    #[name = "queue"]
    Queue,
}

impl From<LoopChoice> for LoopMode {
    fn from(choice: LoopChoice) -> Self {
        match choice {
            LoopChoice::None => LoopMode::None,
            LoopChoice::Track => LoopMode::Track,
            LoopChoice::Queue => LoopMode::Queue,
        }
    }
}

/// Set the loop mode.
#[poise::command(slash_command, guild_only, rename = "loop")]
pub async fn loop_mode(
    ctx: Context<'_>,
    #[description = "What repeats when a track ends"] mode: LoopChoice,
) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    let mode = LoopMode::from(mode);
    session.set_loop_mode(mode).await;
    ctx.say(format!("Loop mode set to **{mode}**.")).await?;

    let store = ctx.data().store.clone();
    tokio::spawn(async move {
        store.update_guild_record(guild_id, |g| g.loop_mode = mode).await;
    });
    Ok(())
}

/// Toggle autoplay of similar tracks when the queue runs out.
#[poise::command(slash_command, guild_only)]
pub async fn autoplay(
    ctx: Context<'_>,
    #[description = "Play similar tracks when the queue is empty"] enabled: bool,
) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    session.set_autoplay(enabled).await;
    ctx.say(if enabled {
        "Autoplay is on."
    } else {
        "Autoplay is off."
    })
    .await?;

    let store = ctx.data().store.clone();
    tokio::spawn(async move {
        store.update_guild_record(guild_id, |g| g.autoplay = enabled).await;
    });
    Ok(())
}

/// Clear the queue without stopping the current track.
#[poise::command(slash_command, guild_only)]
pub async fn clear(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    session.clear_queue().await;
    ctx.say("Queue cleared.").await?;
    Ok(())
}

/// Shuffle the queue.
#[poise::command(slash_command, guild_only)]
pub async fn shuffle(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    if session.queue_len().await < 2 {
        ctx.say("Not enough queued tracks to shuffle.").await?;
        return Ok(());
    }
    session.shuffle_queue().await;
    ctx.say("Queue shuffled.").await?;
    Ok(())
}

/// Remove a queued track by its position.
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Queue position (as shown by /queue)"]
    #[min = 1]
    position: u32,
) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    let Some(session) = ctx.data().registry.get(guild_id) else {
        ctx.say("I'm not connected to a voice channel.").await?;
        return Ok(());
    };
    match session.remove_at(position as usize - 1).await {
        Some(item) => {
            ctx.say(format!("Removed **{}** from the queue.", item.track.title))
                .await?;
        }
        None => {
            ctx.say("No track at that position.").await?;
        }
    }
    Ok(())
}

/// Leave the voice channel and forget the session.
#[poise::command(slash_command, guild_only)]
pub async fn disconnect(ctx: Context<'_>) -> Result<(), CommandError> {
    let Some(guild_id) = ctx.guild_id().map(|g| g.get()) else {
        return Ok(());
    };
    if ctx.data().registry.disconnect(guild_id).await {
        ctx.say("Disconnected.").await?;
    } else {
        ctx.say("I'm not connected to a voice channel.").await?;
    }
    Ok(())
}

/// Bot-wide playback statistics.
#[poise::command(slash_command)]
pub async fn stats(ctx: Context<'_>) -> Result<(), CommandError> {
    let stats = ctx.data().registry.stats().await;
    ctx.say(format!(
        "Active voice connections: {}\nGuilds playing: {}\nQueued tracks: {}",
        stats.active_connections, stats.total_playing, stats.total_queued
    ))
    .await?;
    Ok(())
}
