//! Room channel abstraction
//!
//! The engine consumes a room-scoped multicast channel through this trait.
//! Delivery is assumed at-least-once and ordered within a room; the engine
//! never retries a send.

use thiserror::Error;

use crate::sync::SyncMessage;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("{0} cannot be sent by a client")]
    Unsupported(&'static str),

    #[error("send failed: {0}")]
    Send(String),
}

/// Events delivered by a channel implementation
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The relay is reachable
    Connected,
    Disconnected,
    Message(SyncMessage),
}

/// Outbound half of the room channel
pub trait RoomChannel: Send + Sync {
    /// Fire-and-forget send
    fn send(&self, message: SyncMessage) -> Result<(), ChannelError>;
}
