//! Local player access
//!
//! The engine reads and drives the local audio player through the `Player`
//! trait. `HttpPlayer` talks to a player exposing a Cider-style REST API.

mod client;
mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::sync::PlaybackState;

pub use client::HttpPlayer;
pub use types::*;

/// Errors that can occur when communicating with the player
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Player is not running or not reachable")]
    NotReachable,

    #[error("Invalid API token")]
    Unauthorized,

    #[error("API error: {0}")]
    Api(String),
}

#[async_trait]
pub trait Player: Send + Sync {
    /// Current song, position, volume, play state and repeat mode
    async fn snapshot(&self) -> Result<PlaybackState, PlayerError>;

    /// Make the player match `target`
    async fn apply(&self, target: &PlaybackState) -> Result<(), PlayerError>;

    /// Resolves at the next point the player can take a state change
    async fn next_render(&self) {
        tokio::task::yield_now().await
    }
}
