//! Session implementation for FFI

use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::channel::RoomChannel;
use crate::config::SyncConfig;
use crate::engine::{EngineHandle, SessionNotice, SyncEngine};
use crate::network::{NetworkHandle, NetworkManager};
use crate::player::{HttpPlayer, Player, PlayerError};
use crate::sync::PlaybackState;

use super::types::*;

static TRACING_INIT: Once = Once::new();

type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

/// The HTTP player currently configured; swapped when the token changes
#[derive(Clone)]
struct SessionPlayer(Arc<RwLock<HttpPlayer>>);

#[async_trait]
impl Player for SessionPlayer {
    async fn snapshot(&self) -> Result<PlaybackState, PlayerError> {
        let player = self.0.read().clone();
        player.snapshot().await
    }

    async fn apply(&self, target: &PlaybackState) -> Result<(), PlayerError> {
        let player = self.0.read().clone();
        player.apply(target).await
    }

    async fn next_render(&self) {
        let player = self.0.read().clone();
        player.next_render().await
    }
}

/// Running engine plus the network it talks through
#[derive(Clone)]
struct Running {
    engine: EngineHandle,
    network: NetworkHandle,
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct SyncSession {
    runtime: Runtime,
    config: RwLock<SyncConfig>,
    player: SessionPlayer,
    callback: SharedCallback,
    running: RwLock<Option<Running>>,
}

#[uniffi::export]
impl SyncSession {
    #[uniffi::constructor]
    pub fn new() -> Result<Self, CoreError> {
        // Initialize tracing once
        TRACING_INIT.call_once(|| {
            let mut filter = tracing_subscriber::EnvFilter::from_default_env();
            for directive in [
                "playmirror_core=debug",
                "libp2p_mdns=info",
                "libp2p_gossipsub=info",
                "hyper_util=off",
                "reqwest=off",
                "hyper=off",
            ] {
                if let Ok(d) = directive.parse() {
                    filter = filter.add_directive(d);
                }
            }
            let _ = tracing_subscriber::fmt()
                .with_ansi(false) // Disable colors for Xcode console
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing playmirror session");

        let runtime = Runtime::new().map_err(|e| CoreError::Internal(e.to_string()))?;
        let config = SyncConfig::default();
        let player = HttpPlayer::new(&config.player)?;

        Ok(Self {
            runtime,
            config: RwLock::new(config),
            player: SessionPlayer(Arc::new(RwLock::new(player))),
            callback: Arc::new(RwLock::new(None)),
            running: RwLock::new(None),
        })
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Replace the configuration with a TOML document. Only possible
    /// before the first room is joined.
    pub fn load_config(&self, toml: String) -> Result<(), CoreError> {
        if self.running.read().is_some() {
            return Err(CoreError::ConfigError(
                "configuration cannot change while the engine is running".to_string(),
            ));
        }

        let config = SyncConfig::from_toml_str(&toml)?;
        *self.player.0.write() = HttpPlayer::new(&config.player)?;
        *self.config.write() = config;
        info!("Configuration loaded");
        Ok(())
    }

    /// Set the player API token
    pub fn set_player_token(&self, token: Option<String>) -> Result<(), CoreError> {
        let mut config = self.config.write();
        config.player.api_token = token;
        *self.player.0.write() = HttpPlayer::new(&config.player)?;
        Ok(())
    }

    /// Check if the local player is reachable
    pub fn check_player_connection(&self) -> Result<(), CoreError> {
        debug!("Checking player connection...");
        let player = self.player.0.read().clone();
        let result = self
            .runtime
            .block_on(player.check_connection())
            .map_err(CoreError::from);
        match &result {
            Ok(()) => info!("Player connection OK"),
            Err(e) => warn!("Player connection failed: {:?}", e),
        }
        result
    }

    /// Join a room as host or follower. Starts the network on first use.
    pub fn join_room(&self, room_id: String, role: SessionRole) -> Result<(), CoreError> {
        let running = self.ensure_running()?;
        running.engine.join_room(room_id, role.into())?;
        Ok(())
    }

    /// Leave the current room
    pub fn leave_room(&self) -> Result<(), CoreError> {
        let running = self.running.read().clone().ok_or(CoreError::NotInRoom)?;
        running.engine.leave_room()?;
        Ok(())
    }

    /// Check if we are in a room (joined or joining)
    pub fn is_in_room(&self) -> bool {
        self.current_session().is_some()
    }

    pub fn current_session(&self) -> Option<SessionInfo> {
        let running = self.running.read().clone()?;
        running.engine.session().map(SessionInfo::from)
    }

    pub fn network_stats(&self) -> NetworkStatsInfo {
        match self.running.read().as_ref() {
            Some(running) => NetworkStatsInfo::new(
                &running.engine.network_stats(),
                running.engine.is_connected(),
            ),
            None => NetworkStatsInfo::new(&Default::default(), false),
        }
    }

    /// Send an RTT probe now. Returns false when not connected.
    pub fn force_rtt_probe(&self) -> bool {
        let Some(running) = self.running.read().clone() else {
            return false;
        };
        let _guard = self.runtime.enter();
        running.engine.force_probe()
    }

    /// Connect to a peer outside the local network
    pub fn dial_peer(&self, multiaddr: String) -> Result<(), CoreError> {
        let running = self.ensure_running()?;
        running.network.dial_peer(&multiaddr)?;
        Ok(())
    }

    pub fn local_peer_id(&self) -> Option<String> {
        self.running
            .read()
            .as_ref()
            .map(|r| r.network.local_peer_id.clone())
    }
}

impl SyncSession {
    /// Start the network and the engine if not running yet
    fn ensure_running(&self) -> Result<Running, CoreError> {
        let mut running = self.running.write();
        if let Some(r) = running.as_ref() {
            return Ok(r.clone());
        }

        let config = self.config.read().clone();
        let _guard = self.runtime.enter();

        let (network, channel_events) = NetworkManager::new(config.network.clone())?.start()?;
        let channel: Arc<dyn RoomChannel> = Arc::new(network.clone());
        let player: Arc<dyn Player> = Arc::new(self.player.clone());

        let (engine, mut notices) = SyncEngine::start(config, channel, player, channel_events);

        let callback = Arc::clone(&self.callback);
        self.runtime.spawn(async move {
            while let Some(notice) = notices.recv().await {
                let cb = callback.read().clone();
                if let Some(cb) = cb {
                    dispatch_notice(cb.as_ref(), notice);
                }
            }
        });

        info!("Sync engine running, local peer {}", network.local_peer_id);
        let started = Running { engine, network };
        *running = Some(started.clone());
        Ok(started)
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.write().take() {
            running.engine.shutdown();
            running.network.shutdown();
        }
    }
}

fn dispatch_notice(cb: &dyn SessionCallback, notice: SessionNotice) {
    match notice {
        SessionNotice::Joined(session) => cb.on_joined(session.into()),
        SessionNotice::JoinRejected { room_id, reason } => cb.on_join_rejected(room_id, reason),
        SessionNotice::Left { room_id } => cb.on_left(room_id),
        SessionNotice::RoomClosed { room_id, reason } => cb.on_room_closed(room_id, reason),
        SessionNotice::Connected => cb.on_connected(),
        SessionNotice::Disconnected => cb.on_disconnected(),
        SessionNotice::SyncApplied(report) => cb.on_sync_applied(SyncReportInfo::from(&report)),
        SessionNotice::Error(message) => cb.on_error(message),
    }
}
