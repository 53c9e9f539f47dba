//! Sync Protocol
//!
//! Wire messages exchanged over the room channel and the session state
//! they drive.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
