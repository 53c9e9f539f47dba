//! Playmirror - Core Library
//!
//! Mirrors one host's audio playback onto follower clients in the same
//! room. The host broadcasts playback snapshots when its player changes;
//! followers predict where the host is by the time a snapshot lands and
//! apply that to their local player.

pub mod broadcaster;
pub mod channel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod latency;
pub mod monitor;
pub mod network;
pub mod player;
pub mod predictor;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use channel::{ChannelError, ChannelEvent, RoomChannel};
pub use config::SyncConfig;
pub use engine::{EngineHandle, SessionNotice, SyncEngine};
pub use monitor::ChannelMonitor;
pub use player::{HttpPlayer, Player};
pub use predictor::FollowerPredictor;
pub use sync::{PlaybackSnapshot, PlaybackState, SyncMessage};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
