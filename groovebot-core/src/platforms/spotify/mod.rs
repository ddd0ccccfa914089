// File: groovebot-core/src/platforms/spotify/mod.rs

pub mod client;

pub use client::SpotifyClient;
