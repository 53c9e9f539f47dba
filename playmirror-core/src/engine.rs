//! Sync Engine
//!
//! Drives one client's room participation. Commands from the embedding app
//! and messages from the room channel are handled one at a time on a single
//! task, so snapshots are applied in arrival order. RTT pongs bypass that
//! queue and go straight to the channel monitor.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broadcaster::HostBroadcaster;
use crate::channel::{ChannelEvent, RoomChannel};
use crate::config::SyncConfig;
use crate::latency::NetworkStats;
use crate::monitor::ChannelMonitor;
use crate::player::Player;
use crate::predictor::{FollowerPredictor, SyncOutcome, SyncReport};
use crate::sync::{
    Action, PlaybackSnapshot, PlaybackState, Role, Session, SyncMessage, JOIN_STATUS_JOINED,
};

/// Reason announced to the room when the host leaves
pub const HOST_LEFT_REASON: &str = "Host left the room";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Sync engine stopped")]
    Stopped,
}

/// Requests handled on the engine task
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Join { room_id: String, role: Role },
    Leave,
    /// One reading of the host player
    ObserveHost(PlaybackState),
    /// Heartbeat timer fired
    Heartbeat,
    Shutdown,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Joined(Session),
    JoinRejected { room_id: String, reason: String },
    Left { room_id: String },
    RoomClosed { room_id: String, reason: String },
    Connected,
    Disconnected,
    SyncApplied(SyncReport),
    Error(String),
}

#[derive(Debug)]
pub(crate) enum EngineEvent {
    Command(EngineCommand),
    /// A channel event and the instant it came off the channel
    Channel(ChannelEvent, Instant),
}

pub type SharedSession = Arc<RwLock<Option<Session>>>;

/// Cloneable control surface of a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
    session: SharedSession,
    monitor: ChannelMonitor,
}

impl EngineHandle {
    /// Request to join `room_id`. The session stays inactive until the
    /// relay confirms.
    pub fn join_room(&self, room_id: impl Into<String>, role: Role) -> Result<(), EngineError> {
        let room_id = room_id.into();
        {
            let mut session = self.session.write();
            if session.is_some() {
                return Err(EngineError::AlreadyInRoom);
            }
            *session = Some(Session::pending(room_id.clone(), role));
        }

        if let Err(e) = self.command(EngineCommand::Join { room_id, role }) {
            *self.session.write() = None;
            return Err(e);
        }
        Ok(())
    }

    pub fn leave_room(&self) -> Result<(), EngineError> {
        if self.session.read().is_none() {
            return Err(EngineError::NotInRoom);
        }
        self.command(EngineCommand::Leave)
    }

    /// Push a host player reading (in addition to the built-in polling)
    pub fn observe_host_state(&self, state: PlaybackState) -> Result<(), EngineError> {
        self.command(EngineCommand::ObserveHost(state))
    }

    /// Send an RTT probe now. Returns false when disconnected.
    pub fn force_probe(&self) -> bool {
        self.monitor.force_probe()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.monitor.stats()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn shutdown(&self) {
        let _ = self.command(EngineCommand::Shutdown);
    }

    fn command(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx
            .send(EngineEvent::Command(command))
            .map_err(|_| EngineError::Stopped)
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    channel: Arc<dyn RoomChannel>,
    player: Arc<dyn Player>,
    session: SharedSession,
    monitor: ChannelMonitor,
    broadcaster: HostBroadcaster,
    predictor: FollowerPredictor,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    /// Handle for cancelling the host poll/heartbeat loop
    host_loop_cancel: Option<oneshot::Sender<()>>,
}

impl SyncEngine {
    /// Build an engine without starting it
    pub fn new(
        config: SyncConfig,
        channel: Arc<dyn RoomChannel>,
        player: Arc<dyn Player>,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let session: SharedSession = Arc::new(RwLock::new(None));
        let monitor = ChannelMonitor::new(config.monitor.clone(), Arc::clone(&channel));
        let broadcaster = HostBroadcaster::new(&config.broadcaster);
        let predictor = FollowerPredictor::new(
            config.predictor.clone(),
            config.device.clone(),
            config.monitor.fallback_rtt_ms,
        );

        let handle = EngineHandle {
            tx: events_tx.clone(),
            session: Arc::clone(&session),
            monitor: monitor.clone(),
        };

        let engine = Self {
            config,
            channel,
            player,
            session,
            monitor,
            broadcaster,
            predictor,
            events_tx,
            events_rx,
            notices: notices_tx,
            host_loop_cancel: None,
        };

        (engine, handle, notices_rx)
    }

    /// Spawn the engine and the channel event router
    pub fn start(
        config: SyncConfig,
        channel: Arc<dyn RoomChannel>,
        player: Arc<dyn Player>,
        channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> (EngineHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let (engine, handle, notices) = Self::new(config, channel, player);

        spawn_router(channel_events, engine.monitor.clone(), engine.events_tx.clone());
        tokio::spawn(engine.run());

        (handle, notices)
    }

    pub async fn run(mut self) {
        info!("Sync engine started");
        while self.step().await {}

        self.stop_host_loop();
        self.monitor.shutdown();
        info!("Sync engine stopped");
    }

    /// Handle one queued event. Returns false once the engine should stop.
    pub(crate) async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            None | Some(EngineEvent::Command(EngineCommand::Shutdown)) => false,
            Some(EngineEvent::Command(command)) => {
                self.handle_command(command).await;
                true
            }
            Some(EngineEvent::Channel(event, received_at)) => {
                self.handle_received(event, received_at).await;
                true
            }
        }
    }

    pub(crate) async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Join { room_id, role } => self.join(room_id, role),
            EngineCommand::Leave => self.leave(),
            EngineCommand::ObserveHost(state) => self.observe_host(state).await,
            EngineCommand::Heartbeat => self.heartbeat().await,
            EngineCommand::Shutdown => {}
        }
    }

    /// Handle a channel event that arrived just now
    pub(crate) async fn handle_channel_event(&mut self, event: ChannelEvent) {
        self.handle_received(event, Instant::now()).await
    }

    async fn handle_received(&mut self, event: ChannelEvent, received_at: Instant) {
        match event {
            ChannelEvent::Connected => {
                self.predictor.on_reconnect();
                self.notify(SessionNotice::Connected);
            }
            ChannelEvent::Disconnected => {
                self.notify(SessionNotice::Disconnected);
            }
            ChannelEvent::Message(message) => self.handle_message(message, received_at).await,
        }
    }

    async fn handle_message(&mut self, message: SyncMessage, received_at: Instant) {
        match message {
            SyncMessage::JoinStatus { message } => self.on_join_status(message),
            SyncMessage::RoomClosed { reason } => self.on_room_closed(reason),
            SyncMessage::SyncEvent(snapshot) => self.on_sync_event(snapshot, received_at).await,
            SyncMessage::RttPong { timestamp } => {
                self.monitor.handle_pong(timestamp);
            }
            other => {
                debug!(kind = other.kind(), "Ignoring message not meant for clients");
            }
        }
    }

    // === Room lifecycle ===

    fn join(&mut self, room_id: String, role: Role) {
        info!(room_id = %room_id, ?role, "Joining room");
        let message = SyncMessage::JoinRoom {
            room_id: room_id.clone(),
            role,
        };
        if let Err(e) = self.channel.send(message) {
            warn!("Failed to send join request: {}", e);
            self.teardown();
            self.notify(SessionNotice::JoinRejected {
                room_id,
                reason: e.to_string(),
            });
        }
    }

    fn on_join_status(&mut self, status: String) {
        let pending = self.session.read().clone().filter(|s| !s.active);
        let Some(mut session) = pending else {
            debug!(status = %status, "Join status without a pending join");
            return;
        };

        if status != JOIN_STATUS_JOINED {
            warn!(room_id = %session.room_id, reason = %status, "Join rejected");
            self.teardown();
            self.notify(SessionNotice::JoinRejected {
                room_id: session.room_id,
                reason: status,
            });
            return;
        }

        session.active = true;
        *self.session.write() = Some(session.clone());
        info!(room_id = %session.room_id, role = ?session.role, "Joined room");

        if session.is_host() {
            self.start_host_loop();
        }
        self.notify(SessionNotice::Joined(session));
    }

    fn leave(&mut self) {
        let Some(session) = self.session.read().clone() else {
            return;
        };

        if session.is_active_host() {
            self.send(SyncMessage::RoomClosed {
                reason: HOST_LEFT_REASON.to_string(),
            });
        }
        self.send(SyncMessage::LeaveRoom {
            room_id: session.room_id.clone(),
        });

        self.teardown();
        info!(room_id = %session.room_id, "Left room");
        self.notify(SessionNotice::Left {
            room_id: session.room_id,
        });
    }

    fn on_room_closed(&mut self, reason: String) {
        let Some(session) = self.session.read().clone() else {
            debug!(reason = %reason, "Room closed while not in a room");
            return;
        };

        warn!(room_id = %session.room_id, reason = %reason, "Room closed");
        self.send(SyncMessage::LeaveRoom {
            room_id: session.room_id.clone(),
        });
        self.teardown();
        self.notify(SessionNotice::RoomClosed {
            room_id: session.room_id,
            reason,
        });
    }

    fn teardown(&mut self) {
        self.stop_host_loop();
        self.broadcaster.reset();
        *self.session.write() = None;
    }

    fn active_host_room(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .filter(|s| s.is_active_host())
            .map(|s| s.room_id.clone())
    }

    // === Host ===

    async fn observe_host(&mut self, state: PlaybackState) {
        if self.active_host_room().is_none() {
            return;
        }
        if let Some(action) = self.broadcaster.observe(state.clone()) {
            self.emit(action, state).await;
        }
    }

    async fn heartbeat(&mut self) {
        if self.active_host_room().is_none() {
            return;
        }
        let Some(observed) = self.broadcaster.last_observed().cloned() else {
            return;
        };
        self.emit(Action::Heartbeat, observed).await;
    }

    /// Re-read the player and send the snapshot, timestamped last
    async fn emit(&mut self, action: Action, observed: PlaybackState) {
        let freshest = match self.player.snapshot().await {
            Ok(state) => state,
            Err(e) => {
                debug!("Player unreadable at emit, using observed state: {}", e);
                observed
            }
        };

        // The session may have ended while the player was being read
        let Some(room_id) = self.active_host_room() else {
            return;
        };

        let snapshot = HostBroadcaster::snapshot(&room_id, action, &freshest);
        debug!(
            action = action.as_str(),
            position = snapshot.currently_playing_on,
            is_playing = snapshot.is_playing,
            "Broadcasting snapshot"
        );
        self.send(SyncMessage::PlaybackEvent(snapshot));
    }

    fn start_host_loop(&mut self) {
        // Stop any existing loop first
        self.stop_host_loop();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.host_loop_cancel = Some(cancel_tx);

        let player = Arc::clone(&self.player);
        let tx = self.events_tx.clone();
        let poll_period = self.config.broadcaster.poll_interval().max(MIN_PERIOD);
        let heartbeat_enabled = self.config.broadcaster.heartbeat_enabled;
        let heartbeat_period = self.config.broadcaster.heartbeat_interval().max(MIN_PERIOD);

        tokio::spawn(async move {
            info!("Host poll loop started");

            let mut poll = tokio::time::interval(poll_period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut heartbeat =
                tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let command = tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = poll.tick() => match player.snapshot().await {
                        Ok(state) => EngineCommand::ObserveHost(state),
                        Err(e) => {
                            debug!("Could not read host player: {}", e);
                            continue;
                        }
                    },
                    _ = heartbeat.tick(), if heartbeat_enabled => EngineCommand::Heartbeat,
                };

                if tx.send(EngineEvent::Command(command)).is_err() {
                    break;
                }
            }

            info!("Host poll loop ended");
        });
    }

    fn stop_host_loop(&mut self) {
        if let Some(tx) = self.host_loop_cancel.take() {
            let _ = tx.send(());
        }
    }

    // === Follower ===

    async fn on_sync_event(&mut self, snapshot: PlaybackSnapshot, received_at: Instant) {
        let in_room = self
            .session
            .read()
            .as_ref()
            .is_some_and(|s| s.is_active_follower() && s.room_id == snapshot.room_id);
        if !in_room {
            debug!(room_id = %snapshot.room_id, "Ignoring snapshot outside an active follower session");
            return;
        }

        let stats = self.monitor.stats();
        match self
            .predictor
            .handle_snapshot(&snapshot, received_at, &stats, self.player.as_ref())
            .await
        {
            Ok(SyncOutcome::Applied(report)) => self.notify(SessionNotice::SyncApplied(report)),
            Ok(SyncOutcome::Dropped(_)) => {}
            Err(e) => {
                warn!(action = snapshot.action.as_str(), "Failed to apply snapshot: {}", e);
                self.notify(SessionNotice::Error(format!("Failed to apply playback: {}", e)));
            }
        }
    }

    // === Helpers ===

    /// Fire-and-forget send
    fn send(&self, message: SyncMessage) {
        let kind = message.kind();
        if let Err(e) = self.channel.send(message) {
            warn!(kind, "Failed to send: {}", e);
        }
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }
}

/// Shortest timer period accepted from config
const MIN_PERIOD: std::time::Duration = std::time::Duration::from_millis(1);

/// Forward channel events to the engine stamped with their arrival time,
/// answering pongs on the way
fn spawn_router(
    mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    monitor: ChannelMonitor,
    engine: mpsc::UnboundedSender<EngineEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = channel_events.recv().await {
            match &event {
                ChannelEvent::Message(SyncMessage::RttPong { timestamp }) => {
                    monitor.handle_pong(*timestamp);
                    continue;
                }
                ChannelEvent::Connected => monitor.on_connected(),
                ChannelEvent::Disconnected => monitor.on_disconnected(),
                ChannelEvent::Message(_) => {}
            }

            if engine.send(EngineEvent::Channel(event, Instant::now())).is_err() {
                break;
            }
        }
        debug!("Channel event router ended");
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sync::{RepeatMode, Song};
    use crate::testing::{FakeChannel, FakePlayer};

    struct Harness {
        engine: SyncEngine,
        handle: EngineHandle,
        notices: mpsc::UnboundedReceiver<SessionNotice>,
        channel: Arc<FakeChannel>,
        player: Arc<FakePlayer>,
    }

    fn harness() -> Harness {
        let channel = Arc::new(FakeChannel::default());
        let player = Arc::new(FakePlayer::default());
        let (engine, handle, notices) =
            SyncEngine::new(SyncConfig::default(), channel.clone(), player.clone());
        Harness {
            engine,
            handle,
            notices,
            channel,
            player,
        }
    }

    fn playing(song_id: &str, position: f64, is_playing: bool) -> PlaybackState {
        PlaybackState {
            song: Some(Song {
                id: song_id.to_string(),
                title: String::new(),
                artist: String::new(),
                duration_secs: Some(200.0),
            }),
            volume: 0.5,
            position,
            is_playing,
            repeat_mode: RepeatMode::None,
        }
    }

    fn snapshot(room_id: &str, action: Action) -> PlaybackSnapshot {
        HostBroadcaster::snapshot(room_id, action, &playing("s1", 30.0, true))
    }

    async fn joined(h: &mut Harness, role: Role) {
        h.handle.join_room("r1", role).unwrap();
        assert!(h.engine.step().await);
        h.engine
            .handle_channel_event(ChannelEvent::Message(SyncMessage::JoinStatus {
                message: JOIN_STATUS_JOINED.to_string(),
            }))
            .await;
        assert!(matches!(h.notices.try_recv(), Ok(SessionNotice::Joined(_))));
        h.channel.take();
    }

    #[tokio::test]
    async fn test_join_activates_session() {
        let mut h = harness();

        h.handle.join_room("r1", Role::Follower).unwrap();
        assert_eq!(h.handle.session(), Some(Session::pending("r1", Role::Follower)));

        assert!(h.engine.step().await);
        assert_eq!(
            h.channel.sent(),
            vec![SyncMessage::JoinRoom {
                room_id: "r1".to_string(),
                role: Role::Follower
            }]
        );

        h.engine
            .handle_channel_event(ChannelEvent::Message(SyncMessage::JoinStatus {
                message: "joined".to_string(),
            }))
            .await;

        let session = h.handle.session().unwrap();
        assert!(session.is_active_follower());
        assert_eq!(h.notices.try_recv().unwrap(), SessionNotice::Joined(session));
    }

    #[tokio::test]
    async fn test_join_rejected() {
        let mut h = harness();
        h.handle.join_room("r1", Role::Host).unwrap();
        h.engine.step().await;

        h.engine
            .handle_channel_event(ChannelEvent::Message(SyncMessage::JoinStatus {
                message: "Room is full".to_string(),
            }))
            .await;

        assert_eq!(h.handle.session(), None);
        assert_eq!(
            h.notices.try_recv().unwrap(),
            SessionNotice::JoinRejected {
                room_id: "r1".to_string(),
                reason: "Room is full".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_join_send_failure_rejects() {
        let mut h = harness();
        h.channel.close();
        h.handle.join_room("r1", Role::Follower).unwrap();
        h.engine.step().await;

        assert_eq!(h.handle.session(), None);
        assert!(matches!(
            h.notices.try_recv(),
            Ok(SessionNotice::JoinRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_session() {
        let h = harness();
        h.handle.join_room("r1", Role::Follower).unwrap();
        assert!(matches!(
            h.handle.join_room("r2", Role::Host),
            Err(EngineError::AlreadyInRoom)
        ));
        assert_eq!(h.handle.session().unwrap().room_id, "r1");

        let idle = harness();
        assert!(matches!(idle.handle.leave_room(), Err(EngineError::NotInRoom)));
    }

    #[tokio::test]
    async fn test_room_closed_tears_down_any_role() {
        for role in [Role::Host, Role::Follower] {
            let mut h = harness();
            joined(&mut h, role).await;

            h.engine
                .handle_channel_event(ChannelEvent::Message(SyncMessage::RoomClosed {
                    reason: "Host left the room".to_string(),
                }))
                .await;

            assert_eq!(h.handle.session(), None, "{:?}", role);
            assert_eq!(
                h.channel.sent(),
                vec![SyncMessage::LeaveRoom {
                    room_id: "r1".to_string()
                }]
            );
            assert_eq!(
                h.notices.try_recv().unwrap(),
                SessionNotice::RoomClosed {
                    room_id: "r1".to_string(),
                    reason: "Host left the room".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_host_leave_announces_closure() {
        let mut h = harness();
        joined(&mut h, Role::Host).await;

        h.handle.leave_room().unwrap();
        assert!(h.engine.step().await);

        assert_eq!(
            h.channel.sent(),
            vec![
                SyncMessage::RoomClosed {
                    reason: HOST_LEFT_REASON.to_string()
                },
                SyncMessage::LeaveRoom {
                    room_id: "r1".to_string()
                },
            ]
        );
        assert_eq!(h.handle.session(), None);
        assert_eq!(
            h.notices.try_recv().unwrap(),
            SessionNotice::Left {
                room_id: "r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_follower_leave_is_quiet() {
        let mut h = harness();
        joined(&mut h, Role::Follower).await;

        h.handle.leave_room().unwrap();
        h.engine.step().await;

        assert_eq!(
            h.channel.sent(),
            vec![SyncMessage::LeaveRoom {
                room_id: "r1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_host_emits_freshest_state() {
        let mut h = harness();
        joined(&mut h, Role::Host).await;

        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s1", 10.0, true)))
            .await;
        assert!(h.channel.playback_events().is_empty());

        // Player has moved on by the time the snapshot is built
        h.player.set_state(playing("s2", 0.4, true));
        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s2", 0.0, true)))
            .await;

        let events = h.channel.playback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::NewSong);
        assert_eq!(events[0].room_id, "r1");
        assert_eq!(events[0].currently_playing_on, 0.4);
    }

    #[tokio::test]
    async fn test_emit_falls_back_to_observed() {
        let mut h = harness();
        joined(&mut h, Role::Host).await;
        h.player.set_unreadable(true);

        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s1", 10.0, true)))
            .await;
        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s1", 10.0, false)))
            .await;

        let events = h.channel.playback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::Pause);
        assert!(!events[0].is_playing);
    }

    #[tokio::test]
    async fn test_heartbeat_needs_baseline() {
        let mut h = harness();
        joined(&mut h, Role::Host).await;

        h.engine.handle_command(EngineCommand::Heartbeat).await;
        assert!(h.channel.playback_events().is_empty());

        h.player.set_state(playing("s1", 12.0, true));
        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s1", 11.9, true)))
            .await;
        h.engine.handle_command(EngineCommand::Heartbeat).await;

        let events = h.channel.playback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::Heartbeat);
        assert_eq!(events[0].currently_playing_on, 12.0);
    }

    #[tokio::test]
    async fn test_follower_never_broadcasts() {
        let mut h = harness();
        joined(&mut h, Role::Follower).await;

        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s1", 10.0, true)))
            .await;
        h.engine
            .handle_command(EngineCommand::ObserveHost(playing("s2", 0.0, true)))
            .await;
        h.engine.handle_command(EngineCommand::Heartbeat).await;

        assert!(h.channel.playback_events().is_empty());
    }

    #[tokio::test]
    async fn test_follower_applies_snapshot() {
        let mut h = harness();
        joined(&mut h, Role::Follower).await;

        h.engine
            .handle_channel_event(ChannelEvent::Message(SyncMessage::SyncEvent(snapshot(
                "r1",
                Action::Seek,
            ))))
            .await;

        let applied = h.player.applied();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].position > 30.0);
        let Ok(SessionNotice::SyncApplied(report)) = h.notices.try_recv() else {
            panic!("expected a sync report");
        };
        assert_eq!(report.action, Action::Seek);
        assert_eq!(report.predicted_position, applied[0].position);
    }

    #[tokio::test]
    async fn test_snapshots_ignored_outside_follower_session() {
        let mut h = harness();
        let event = || {
            ChannelEvent::Message(SyncMessage::SyncEvent(snapshot("r1", Action::Play)))
        };

        // No session
        h.engine.handle_channel_event(event()).await;

        // Host
        joined(&mut h, Role::Host).await;
        h.engine.handle_channel_event(event()).await;

        assert!(h.player.applied().is_empty());
    }

    #[tokio::test]
    async fn test_apply_failure_reported() {
        let mut h = harness();
        joined(&mut h, Role::Follower).await;
        h.player.fail_next_apply();

        h.engine
            .handle_channel_event(ChannelEvent::Message(SyncMessage::SyncEvent(snapshot(
                "r1",
                Action::Play,
            ))))
            .await;

        assert!(matches!(h.notices.try_recv(), Ok(SessionNotice::Error(_))));
        assert_eq!(h.engine.predictor.performance().measurements().count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_resets_performance() {
        let mut h = harness();
        joined(&mut h, Role::Follower).await;
        h.engine
            .handle_channel_event(ChannelEvent::Message(SyncMessage::SyncEvent(snapshot(
                "r1",
                Action::Play,
            ))))
            .await;
        assert_eq!(h.engine.predictor.performance().measurements().count(), 1);
        let _ = h.notices.try_recv();

        h.engine.handle_channel_event(ChannelEvent::Connected).await;

        assert_eq!(h.engine.predictor.performance().measurements().count(), 0);
        assert_eq!(h.engine.predictor.performance().adaptive_multiplier(), 1.0);
        assert_eq!(h.notices.try_recv().unwrap(), SessionNotice::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_engine_host_flow() {
        let channel = Arc::new(FakeChannel::default());
        let player = Arc::new(FakePlayer::default());
        player.set_state(playing("s1", 10.0, false));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, mut notices) =
            SyncEngine::start(SyncConfig::default(), channel.clone(), player.clone(), events_rx);

        events_tx.send(ChannelEvent::Connected).unwrap();
        handle.join_room("r1", Role::Host).unwrap();
        events_tx
            .send(ChannelEvent::Message(SyncMessage::JoinStatus {
                message: JOIN_STATUS_JOINED.to_string(),
            }))
            .unwrap();

        assert_eq!(notices.recv().await, Some(SessionNotice::Connected));
        assert!(matches!(notices.recv().await, Some(SessionNotice::Joined(_))));

        // Pong goes straight to the monitor
        tokio::time::sleep(Duration::from_millis(1)).await;
        let ping = channel.ping_timestamps()[0];
        tokio::time::sleep(Duration::from_millis(40)).await;
        events_tx
            .send(ChannelEvent::Message(SyncMessage::RttPong { timestamp: ping }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.network_stats().sample_count, 1);

        // First poll only captured the baseline
        assert!(channel.playback_events().is_empty());

        player.set_state(playing("s1", 10.5, true));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let events = channel.playback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::Play);

        handle.shutdown();
    }

    async fn started_in_room(
        config: SyncConfig,
        role: Role,
        player: Arc<FakePlayer>,
    ) -> (
        EngineHandle,
        mpsc::UnboundedReceiver<SessionNotice>,
        mpsc::UnboundedSender<ChannelEvent>,
        Arc<FakeChannel>,
    ) {
        let channel = Arc::new(FakeChannel::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, mut notices) =
            SyncEngine::start(config, channel.clone(), player, events_rx);

        handle.join_room("r1", role).unwrap();
        events_tx
            .send(ChannelEvent::Message(SyncMessage::JoinStatus {
                message: JOIN_STATUS_JOINED.to_string(),
            }))
            .unwrap();
        assert!(matches!(notices.recv().await, Some(SessionNotice::Joined(_))));

        (handle, notices, events_tx, channel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_queued_behind_apply_is_throttled() {
        let player = Arc::new(FakePlayer::with_apply_delay(Duration::from_millis(50)));
        let (handle, mut notices, events_tx, _channel) =
            started_in_room(SyncConfig::default(), Role::Follower, player.clone()).await;

        let volume = || ChannelEvent::Message(SyncMessage::SyncEvent(snapshot("r1", Action::Volume)));
        events_tx.send(volume()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Arrives while the first apply is still running
        events_tx.send(volume()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(player.applied().len(), 1);
        assert!(matches!(notices.try_recv(), Ok(SessionNotice::SyncApplied(_))));
        assert!(notices.try_recv().is_err());

        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_host_sends_heartbeats() {
        let mut config = SyncConfig::default();
        config.broadcaster.heartbeat_enabled = true;
        config.broadcaster.heartbeat_interval_ms = 2000;

        let player = Arc::new(FakePlayer::default());
        player.set_state(playing("s1", 10.0, true));
        let (handle, _notices, _events_tx, channel) =
            started_in_room(config, Role::Host, player.clone()).await;

        // Unchanged state: polls are silent, only the heartbeat speaks
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(channel.playback_events().is_empty());

        player.set_state(playing("s1", 11.0, true));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let events = channel.playback_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, Action::Heartbeat);
        assert_eq!(events[0].currently_playing_on, 11.0);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        let actions: Vec<_> = channel.playback_events().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![Action::Heartbeat, Action::Heartbeat]);

        handle.shutdown();
    }
}
