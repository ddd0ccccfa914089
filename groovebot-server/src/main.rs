// File: groovebot-server/src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use once_cell::sync::OnceCell;
use poise::serenity_prelude as serenity;
use songbird::SerenityInit;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use groovebot_core::audio::pipeline::AudioPipeline;
use groovebot_core::audio::registry::SessionRegistry;
use groovebot_core::config::{AppConfig, AUTOSAVE_INTERVAL, STREAM_TIMEOUT};
use groovebot_core::platforms::discord::SongbirdGateway;
use groovebot_core::platforms::spotify::SpotifyClient;
use groovebot_core::platforms::youtube::YouTubeClient;
use groovebot_core::platforms::{ResolverSet, TrackResolver};
use groovebot_core::store::DataManager;

mod commands;
use commands::Data;

#[derive(Parser, Debug, Clone)]
#[command(name = "groovebot")]
#[command(author, version, about = "Discord music bot streaming Spotify and YouTube catalogs")]
struct Args {
    /// Where users/playlists/guild settings are stored (overrides
    /// GROOVEBOT_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("groovebot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = AppConfig::from_env().context("loading configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    let http = reqwest::Client::builder()
        .connect_timeout(STREAM_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let youtube = Arc::new(YouTubeClient::new(
        http.clone(),
        config.youtube_api_key.clone(),
        config.youtube_cookies.clone(),
    ));
    let spotify = Arc::new(SpotifyClient::new(
        http.clone(),
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
    ));
    let pipeline = Arc::new(AudioPipeline::new(http, youtube.clone(), spotify.clone()));
    let resolvers = Arc::new(ResolverSet::new([
        youtube.clone() as Arc<dyn TrackResolver>,
        spotify.clone() as Arc<dyn TrackResolver>,
    ]));

    let store = Arc::new(
        DataManager::load(&config.data_dir)
            .await
            .context("loading data store")?,
    );
    let _autosave = store.clone().spawn_autosave(AUTOSAVE_INTERVAL);

    // The registry needs the songbird manager, which only exists once the
    // gateway client is built; the slot lets the shutdown path reach it.
    let registry_slot: Arc<OnceCell<Arc<SessionRegistry>>> = Arc::new(OnceCell::new());

    let quality = config.default_quality;
    let setup_slot = registry_slot.clone();
    let setup_store = store.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::play(),
                commands::pause(),
                commands::resume(),
                commands::skip(),
                commands::stop(),
                commands::queue(),
                commands::nowplaying(),
                commands::volume(),
                commands::loop_mode(),
                commands::autoplay(),
                commands::clear(),
                commands::shuffle(),
                commands::remove(),
                commands::disconnect(),
                commands::stats(),
            ],
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let manager = songbird::get(ctx)
                    .await
                    .ok_or("songbird was not registered on the client")?;
                let gateway = Arc::new(SongbirdGateway::new(manager));
                let registry = SessionRegistry::new(gateway, pipeline, resolvers, quality);
                let _ = setup_slot.set(registry.clone());

                info!("logged in as {}", ready.user.name);
                Ok(Data {
                    registry,
                    youtube,
                    spotify,
                    store: setup_store,
                })
            })
        })
        .build();

    let intents =
        serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::GUILD_VOICE_STATES;
    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .register_songbird()
        .framework(framework)
        .await
        .context("building Discord client")?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_slot = registry_slot.clone();
    let shutdown_store = store.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("shutdown signal received");
        if let Some(registry) = shutdown_slot.get() {
            registry.disconnect_all().await;
        }
        if let Err(e) = shutdown_store.save_all().await {
            error!("final save failed: {}", e);
        }
        shard_manager.shutdown_all().await;
    });

    client.start().await.context("running Discord client")?;

    if let Err(e) = store.save_all().await {
        error!("final save failed: {}", e);
    }
    info!("groovebot stopped");
    Ok(())
}
