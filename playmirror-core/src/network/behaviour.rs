//! libp2p room channel
//!
//! Runs a libp2p swarm with:
//! - mDNS for local network discovery
//! - TCP + QUIC transports
//! - gossipsub, one topic per room
//!
//! With no relay server in between, this side also plays the relay's part:
//! it answers joins, turns a peer's `playback_event` into a local
//! `sync_event`, and echoes RTT pings.

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChannelEvent, RoomChannel};
use crate::config::NetworkConfig;
use crate::sync::{SyncMessage, JOIN_STATUS_JOINED};

/// Gossipsub topic for a room
pub fn room_topic_name(room_id: &str) -> String {
    format!("playmirror-room-{}", room_id)
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Invalid address {0}: {1}")]
    InvalidAddress(String, String),

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Not in a room")]
    NotInRoom,

    #[error("libp2p error: {0}")]
    Libp2p(String),

    #[error("Network task closed")]
    Closed,
}

#[derive(NetworkBehaviour)]
pub struct RoomBehaviour {
    /// Ping for connection keep-alive
    ping: ping::Behaviour,
    /// mDNS for local network discovery (optional)
    mdns: Toggle<mdns::tokio::Behaviour>,
    identify: identify::Behaviour,
    /// Pub/sub for room messages
    gossipsub: gossipsub::Behaviour,
}

/// Commands sent to the swarm task
#[derive(Debug)]
pub enum NetworkCommand {
    Send(SyncMessage),
    /// Dial a peer directly by multiaddr (outside the LAN)
    DialPeer(Multiaddr),
    Shutdown,
}

/// What to do with a message received from a room peer
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Hand to the local engine
    Deliver(SyncMessage),
    /// Publish back to the room
    Echo(SyncMessage),
    Ignore,
}

/// Relay-side handling of a peer's message
pub fn route_inbound(message: SyncMessage) -> Inbound {
    match message {
        SyncMessage::PlaybackEvent(snapshot) => Inbound::Deliver(SyncMessage::SyncEvent(snapshot)),
        SyncMessage::RttPing { timestamp } => Inbound::Echo(SyncMessage::RttPong { timestamp }),
        message @ (SyncMessage::RttPong { .. } | SyncMessage::RoomClosed { .. }) => {
            Inbound::Deliver(message)
        }
        SyncMessage::JoinRoom { .. }
        | SyncMessage::LeaveRoom { .. }
        | SyncMessage::JoinStatus { .. }
        | SyncMessage::SyncEvent(_) => Inbound::Ignore,
    }
}

/// Peers subscribed to the current room topic. Connectivity is "up" while
/// at least one is present.
#[derive(Debug, Default)]
pub struct RoomPeers {
    peers: HashSet<PeerId>,
}

impl RoomPeers {
    /// Returns `Connected` when this is the first peer
    pub fn insert(&mut self, peer: PeerId) -> Option<ChannelEvent> {
        let was_empty = self.peers.is_empty();
        (self.peers.insert(peer) && was_empty).then_some(ChannelEvent::Connected)
    }

    /// Returns `Disconnected` when this was the last peer
    pub fn remove(&mut self, peer: &PeerId) -> Option<ChannelEvent> {
        (self.peers.remove(peer) && self.peers.is_empty()).then_some(ChannelEvent::Disconnected)
    }

    pub fn clear(&mut self) -> Option<ChannelEvent> {
        let was_empty = self.peers.is_empty();
        self.peers.clear();
        (!was_empty).then_some(ChannelEvent::Disconnected)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Handle to communicate with the running network
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    pub fn dial_peer(&self, multiaddr: &str) -> Result<(), NetworkError> {
        let addr = multiaddr
            .parse::<Multiaddr>()
            .map_err(|e| NetworkError::InvalidAddress(multiaddr.to_string(), e.to_string()))?;
        self.command_tx
            .send(NetworkCommand::DialPeer(addr))
            .map_err(|_| NetworkError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

impl RoomChannel for NetworkHandle {
    fn send(&self, message: SyncMessage) -> Result<(), ChannelError> {
        match &message {
            SyncMessage::JoinStatus { .. } | SyncMessage::SyncEvent(_) => {
                Err(ChannelError::Unsupported(message.kind()))
            }
            _ => self
                .command_tx
                .send(NetworkCommand::Send(message))
                .map_err(|_| ChannelError::Closed),
        }
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    local_peer_id: PeerId,
    keypair: identity::Keypair,
    config: NetworkConfig,
    /// Current room topic (if in a room)
    room_topic: Option<gossipsub::IdentTopic>,
    room_peers: RoomPeers,
}

impl NetworkManager {
    pub fn new(config: NetworkConfig) -> Result<Self, NetworkError> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);

        Ok(Self {
            local_peer_id,
            keypair,
            config,
            room_topic: None,
            room_peers: RoomPeers::default(),
        })
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Start the network and return a handle plus the event stream
    pub fn start(
        self,
    ) -> Result<(NetworkHandle, mpsc::UnboundedReceiver<ChannelEvent>), NetworkError> {
        let swarm = self.create_swarm()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };

        tokio::spawn(async move {
            if let Err(e) = self.run(swarm, event_tx, command_rx).await {
                warn!("Network task error: {}", e);
            }
        });

        Ok((handle, event_rx))
    }

    fn create_swarm(&self) -> Result<Swarm<RoomBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_behaviour(|keypair| {
                // Ping for keep-alive (every 15 seconds)
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                // Gossipsub config - tuned for small rooms
                // Must satisfy: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .mesh_outbound_min(0)
                    .mesh_n_low(1)
                    .mesh_n(3)
                    .mesh_n_high(6)
                    .gossip_lazy(3)
                    .build()
                    .map_err(|e| e.to_string())?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    "/playmirror/1.0.0".into(),
                    keypair.public(),
                ));

                Ok(RoomBehaviour {
                    ping,
                    mdns: Toggle::from(mdns),
                    identify,
                    gossipsub,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        Ok(swarm)
    }

    async fn run(
        mut self,
        mut swarm: Swarm<RoomBehaviour>,
        event_tx: mpsc::UnboundedSender<ChannelEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        for addr_str in &self.config.listen_addresses {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => match swarm.listen_on(addr) {
                    Ok(id) => info!("Listener started on {}: {:?}", addr_str, id),
                    Err(e) => warn!("Failed to listen on {}: {:?}", addr_str, e),
                },
                Err(e) => warn!("Invalid listen address {}: {}", addr_str, e),
            }
        }

        for addr_str in &self.config.bootstrap_peers {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => {
                    info!("Dialing bootstrap peer: {}", addr);
                    if let Err(e) = swarm.dial(addr) {
                        debug!("Failed to dial bootstrap peer {}: {}", addr_str, e);
                    }
                }
                Err(e) => warn!("Invalid bootstrap address {}: {}", addr_str, e),
            }
        }

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx);
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(NetworkCommand::Send(message)) => {
                            self.handle_outbound(&mut swarm, message, &event_tx);
                        }
                        Some(NetworkCommand::DialPeer(addr)) => {
                            info!("Dialing peer at {}", addr);
                            if let Err(e) = swarm.dial(addr) {
                                warn!("Failed to dial peer: {}", e);
                            }
                        }
                        Some(NetworkCommand::Shutdown) | None => {
                            info!("Network shutting down");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_outbound(
        &mut self,
        swarm: &mut Swarm<RoomBehaviour>,
        message: SyncMessage,
        event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    ) {
        match message {
            SyncMessage::JoinRoom { room_id, role } => {
                let status = match self.join_room(swarm, &room_id) {
                    Ok(()) => {
                        info!(room_id = %room_id, ?role, "Subscribed to room");
                        JOIN_STATUS_JOINED.to_string()
                    }
                    Err(e) => e.to_string(),
                };
                let _ = event_tx.send(ChannelEvent::Message(SyncMessage::JoinStatus {
                    message: status,
                }));
            }
            SyncMessage::LeaveRoom { .. } => {
                if let Some(event) = self.leave_room(swarm) {
                    let _ = event_tx.send(event);
                }
            }
            message => {
                if let Err(e) = self.publish(swarm, &message) {
                    debug!(kind = message.kind(), "Publish error (may be no peers yet): {}", e);
                }
            }
        }
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<RoomBehaviour>,
        event: SwarmEvent<RoomBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.local_peer_id);
            }

            // mDNS discovered peers (local network)
            SwarmEvent::Behaviour(RoomBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id != self.local_peer_id {
                        info!("mDNS discovered peer: {} at {}", peer_id, addr);
                        swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        if swarm.dial(addr).is_ok() {
                            debug!("Dialing discovered peer {}", peer_id);
                        }
                    }
                }
            }

            SwarmEvent::Behaviour(RoomBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }

            SwarmEvent::Behaviour(RoomBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let sync_msg = match SyncMessage::decode(&message.data) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("Dropping message from {}: {}", propagation_source, e);
                        return;
                    }
                };
                debug!(kind = sync_msg.kind(), from = %propagation_source, "Received room message");

                match route_inbound(sync_msg) {
                    Inbound::Deliver(m) => {
                        let _ = event_tx.send(ChannelEvent::Message(m));
                    }
                    Inbound::Echo(m) => {
                        if let Err(e) = self.publish(swarm, &m) {
                            debug!("Failed to echo {}: {}", m.kind(), e);
                        }
                    }
                    Inbound::Ignore => {}
                }
            }

            SwarmEvent::Behaviour(RoomBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if self.room_topic.as_ref().is_some_and(|t| t.hash() == topic) {
                    info!("Peer {} subscribed to room", peer_id);
                    if let Some(event) = self.room_peers.insert(peer_id) {
                        let _ = event_tx.send(event);
                    }
                }
            }

            SwarmEvent::Behaviour(RoomBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if self.room_topic.as_ref().is_some_and(|t| t.hash() == topic) {
                    info!("Peer {} unsubscribed from room", peer_id);
                    if let Some(event) = self.room_peers.remove(&peer_id) {
                        let _ = event_tx.send(event);
                    }
                }
            }

            SwarmEvent::Behaviour(RoomBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Identified peer {} running {}", peer_id, info.protocol_version);
            }

            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                info!("Connection established with {} via {:?}", peer_id, endpoint);
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                debug!("Connection closed with {}", peer_id);
                if num_established == 0 {
                    if let Some(event) = self.room_peers.remove(&peer_id) {
                        let _ = event_tx.send(event);
                    }
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                if let Some(peer) = peer_id {
                    warn!("Failed to connect to {}: {}", peer, error);
                } else {
                    warn!("Outgoing connection error: {}", error);
                }
            }

            SwarmEvent::ListenerError { listener_id, error } => {
                warn!("Listener {} error: {}", listener_id, error);
            }

            _ => {}
        }
    }

    fn join_room(
        &mut self,
        swarm: &mut Swarm<RoomBehaviour>,
        room_id: &str,
    ) -> Result<(), NetworkError> {
        if self.room_topic.is_some() {
            return Err(NetworkError::AlreadyInRoom);
        }

        let topic = gossipsub::IdentTopic::new(room_topic_name(room_id));
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        self.room_topic = Some(topic);
        self.room_peers.clear();
        Ok(())
    }

    /// Unsubscribe. Returns `Disconnected` if room peers were present.
    fn leave_room(&mut self, swarm: &mut Swarm<RoomBehaviour>) -> Option<ChannelEvent> {
        if let Some(topic) = self.room_topic.take() {
            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
            info!("Left room topic {}", topic);
        }
        self.room_peers.clear()
    }

    fn publish(
        &self,
        swarm: &mut Swarm<RoomBehaviour>,
        message: &SyncMessage,
    ) -> Result<(), NetworkError> {
        let topic = self.room_topic.as_ref().ok_or(NetworkError::NotInRoom)?;
        let data = message
            .encode()
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic.clone(), data)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        Ok(())
    }
}
