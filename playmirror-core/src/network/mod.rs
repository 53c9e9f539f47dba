//! P2P Networking
//!
//! A `RoomChannel` over libp2p gossipsub, for rooms without a relay server.

mod behaviour;

pub use behaviour::{
    room_topic_name, route_inbound, Inbound, NetworkError, NetworkHandle, NetworkManager,
    RoomPeers,
};
