use std::collections::HashMap;
use std::time::Instant;

use glam::Vec3;
use rand::seq::SliceRandom;

use crate::net::{
    MessagePayload, PeerId, SignalingState, Transport, TransportError, TransportEvent, random_hex,
};
use crate::simulation::{
    ArenaLevel, InputSnapshot, KinematicMovement, Level, MAX_STEP_SECS, MovementModel,
    SendCadence,
};
use crate::snapshot::{Entity, EntityHandle, World};
use crate::sync::NetworkComponent;

use super::config::SessionConfig;
use super::debug::{PeerDebugInfo, PlayerDebugInfo, SessionDebugInfo};
use super::directory::{NetworkId, PeerDirectory};
use super::onboarding::{FullStateAssembly, PendingOnboarding};

const CONNECTION_FAILED: &str = "connection failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    SinglePlayer,
    Multiplayer(Role),
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::SinglePlayer => "single-player",
            SessionMode::Multiplayer(Role::Host) => "host",
            SessionMode::Multiplayer(Role::Client) => "client",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender: String,
    pub text: String,
    pub local: bool,
}

/// Owns the transport, the entity set and the PeerId <-> NetworkId map, and
/// moves the process between single-player and multiplayer.
pub struct Session {
    pub(super) config: SessionConfig,
    pub(super) transport: Transport,
    pub(super) world: World,
    pub(super) level: Box<dyn Level>,
    pub(super) movement: Box<dyn MovementModel>,
    pub(super) mode: SessionMode,
    pub(super) session_id: Option<String>,
    pub(super) directory: PeerDirectory,
    pub(super) next_network_id: NetworkId,
    pub(super) local_player: Option<EntityHandle>,
    pub(super) awaiting_full_state: bool,
    pub(super) input_sequence: u32,
    pub(super) chat_log: Vec<ChatLine>,
    pub(super) last_connection_failure: Option<String>,
    pub(super) onboarding: HashMap<PeerId, PendingOnboarding>,
    pub(super) next_transfer_id: u32,
    pub(super) full_state_assembly: Option<FullStateAssembly>,
    pub(super) awaiting_since: Option<Instant>,
    epoch: Instant,
    broadcast: SendCadence,
    last_tick: Option<Instant>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_collaborators(
            config,
            Box::new(ArenaLevel::default()),
            Box::new(KinematicMovement::default()),
        )
    }

    pub fn with_collaborators(
        config: SessionConfig,
        level: Box<dyn Level>,
        movement: Box<dyn MovementModel>,
    ) -> Self {
        let transport = Transport::new(config.transport.clone());
        let mut world = World::new();
        let local_player = Some(level.build(&mut world, &config.player_name));
        let broadcast = SendCadence::new(config.broadcast_rate_hz);

        Self {
            config,
            transport,
            world,
            level,
            movement,
            mode: SessionMode::SinglePlayer,
            session_id: None,
            directory: PeerDirectory::new(),
            next_network_id: NetworkId::HOST.next(),
            local_player,
            awaiting_full_state: false,
            input_sequence: 0,
            chat_log: Vec::new(),
            last_connection_failure: None,
            onboarding: HashMap::new(),
            next_transfer_id: 0,
            full_state_assembly: None,
            awaiting_since: None,
            epoch: Instant::now(),
            broadcast,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn local_player(&self) -> Option<EntityHandle> {
        self.local_player
    }

    pub fn local_entity(&self) -> Option<&Entity> {
        self.local_player.and_then(|h| self.world.get(h))
    }

    pub fn local_network_id(&self) -> Option<NetworkId> {
        self.directory.network_id(self.transport.local_peer_id())
    }

    pub fn chat_log(&self) -> &[ChatLine] {
        &self.chat_log
    }

    pub fn last_connection_failure(&self) -> Option<&str> {
        self.last_connection_failure.as_deref()
    }

    pub fn is_awaiting_full_state(&self) -> bool {
        self.awaiting_full_state
    }

    pub fn is_multiplayer_host(&self) -> bool {
        self.mode == SessionMode::Multiplayer(Role::Host)
    }

    pub fn is_multiplayer_connected(&self) -> bool {
        matches!(self.mode, SessionMode::Multiplayer(_)) && self.transport.open_peer_count() > 0
    }

    /// Creates an offer for a new guest. Allowed in single-player and while
    /// already hosting.
    pub fn host_invite(&mut self) -> Result<String, TransportError> {
        if self.mode == SessionMode::Multiplayer(Role::Client) {
            return Err(TransportError::AlreadyConnected);
        }
        self.last_connection_failure = None;
        self.transport.create_offer()
    }

    pub fn complete_invite(&mut self, answer: &str) -> Result<PeerId, TransportError> {
        self.transport.complete_connection(answer)
    }

    /// Applies a host's offer; the local world keeps running until the
    /// host's full state arrives.
    pub fn join(&mut self, offer: &str) -> Result<String, TransportError> {
        if self.mode != SessionMode::SinglePlayer {
            return Err(TransportError::AlreadyConnected);
        }
        self.last_connection_failure = None;
        self.transport.accept_offer(offer)
    }

    pub fn disconnect(&mut self) {
        if self.mode == SessionMode::SinglePlayer {
            self.transport.disconnect_all();
            self.transport.drain_events().for_each(drop);
            return;
        }
        self.reset_to_single_player();
    }

    pub fn send_chat(&mut self, text: &str) {
        let sender = self.config.player_name.clone();
        self.chat_log.push(ChatLine {
            sender: sender.clone(),
            text: text.to_string(),
            local: true,
        });

        if matches!(self.mode, SessionMode::Multiplayer(_)) {
            self.transport.send_message(MessagePayload::Chat {
                sender,
                text: text.to_string(),
            });
        }
    }

    pub fn tick(&mut self, input: Option<&InputSnapshot>) {
        self.tick_at(Instant::now(), input);
    }

    /// One frame: transport events, local simulation, smoothing, periodic
    /// broadcast, flush.
    pub fn tick_at(&mut self, now: Instant, input: Option<&InputSnapshot>) {
        let dt = match self.last_tick {
            Some(last) => now.saturating_duration_since(last).as_secs_f32().min(MAX_STEP_SECS),
            None => 1.0 / self.config.tick_rate.max(1) as f32,
        };
        self.last_tick = Some(now);

        self.transport.update_at(now);
        let events: Vec<TransportEvent> = self.transport.drain_events().collect();
        for event in events {
            self.handle_event(event, now);
        }
        self.check_onboarding(now);

        self.simulate_local(input.copied().unwrap_or_default(), dt, now);

        let now_ms = self.clock_ms(now);
        for entity in self.world.entities_mut() {
            if let Some(net) = entity.net.as_mut() {
                net.update(&mut entity.transform, now_ms);
            }
        }

        if matches!(self.mode, SessionMode::Multiplayer(_)) {
            if self.broadcast.advance(dt) {
                match self.mode {
                    SessionMode::Multiplayer(Role::Host) => self.broadcast_deltas(),
                    SessionMode::Multiplayer(Role::Client) => self.send_own_pose(),
                    SessionMode::SinglePlayer => {}
                }
            }
        } else {
            self.broadcast.reset();
        }

        self.transport.flush_at(now);
    }

    pub(super) fn clock_ms(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.epoch).as_secs_f64() * 1000.0
    }

    pub(super) fn new_component(
        &self,
        owner: Option<NetworkId>,
        locally_controlled: bool,
    ) -> NetworkComponent {
        NetworkComponent::new(self.config.sync, owner, locally_controlled)
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::PeerJoined(peer_id) => {
                log::info!("Peer {} joined", peer_id);
            }
            TransportEvent::DataChannelReady(peer_id) => {
                self.handle_channel_ready(peer_id, now);
            }
            TransportEvent::PeerLeft { peer_id, reason } => {
                log::info!("Peer {} left ({})", peer_id, reason.as_str());
                self.handle_peer_left(&peer_id);
            }
            TransportEvent::MessageReceived { from, message } => {
                self.handle_message(&from, message, now);
            }
            TransportEvent::ConnectionStateChanged(state) => {
                self.handle_signaling_state(state);
            }
            TransportEvent::ChatReceived { from, sender, text } => {
                log::info!("[chat] {}: {}", sender, text);
                if self.is_multiplayer_host() {
                    self.transport.send_message_except(
                        &from,
                        MessagePayload::Chat {
                            sender: sender.clone(),
                            text: text.clone(),
                        },
                    );
                }
                self.chat_log.push(ChatLine {
                    sender,
                    text,
                    local: false,
                });
            }
        }
    }

    fn handle_channel_ready(&mut self, peer_id: PeerId, now: Instant) {
        if self.transport.is_host() {
            if self.mode == SessionMode::SinglePlayer {
                self.become_host();
            }
            self.onboard_peer(peer_id, now);
        } else {
            self.mode = SessionMode::Multiplayer(Role::Client);
            self.awaiting_full_state = true;
            self.awaiting_since = Some(now);
            self.full_state_assembly = None;
            log::info!("Connected to host, waiting for full game state");
        }
    }

    /// Host: resend unacknowledged full states. Client: give up on a full
    /// state that never completes.
    fn check_onboarding(&mut self, now: Instant) {
        match self.mode {
            SessionMode::Multiplayer(Role::Host) => self.resend_full_states(now),
            SessionMode::Multiplayer(Role::Client) if self.awaiting_full_state => {
                let timeout = self.config.full_state_timeout();
                let expired = self
                    .awaiting_since
                    .is_some_and(|since| now.saturating_duration_since(since) > timeout);
                if expired {
                    log::warn!("No full game state from host within {:?}", timeout);
                    self.last_connection_failure = Some(CONNECTION_FAILED.to_string());
                    self.reset_to_single_player();
                }
            }
            _ => {}
        }
    }

    fn handle_signaling_state(&mut self, state: SignalingState) {
        if state != SignalingState::Failed {
            log::debug!("Signaling state: {}", state.as_str());
            return;
        }

        log::warn!("Connection attempt failed");
        self.last_connection_failure = Some(CONNECTION_FAILED.to_string());

        // A failed extra invite must not tear down a running session.
        if self.mode == SessionMode::SinglePlayer {
            self.transport.disconnect_all();
            self.transport.drain_events().for_each(drop);
        }
    }

    /// SinglePlayer -> Multiplayer(Host). The existing world is kept and
    /// every entity gets a network component.
    pub(super) fn become_host(&mut self) {
        let local_peer = self.transport.local_peer_id().clone();

        self.mode = SessionMode::Multiplayer(Role::Host);
        self.session_id = Some(random_hex(8));
        self.directory.clear();
        self.onboarding.clear();
        if let Err(e) = self.directory.insert(local_peer.clone(), NetworkId::HOST) {
            log::warn!("Could not register host identity: {}", e);
        }
        self.next_network_id = NetworkId::HOST.next();

        let sync = self.config.sync;
        let local = self.local_player;
        for entity in self.world.entities_mut() {
            let is_local = Some(entity.handle()) == local;
            let owner = is_local.then_some(NetworkId::HOST);
            if is_local {
                if let Some(player) = entity.player.as_mut() {
                    player.peer_id = Some(local_peer.clone());
                    player.network_id = Some(NetworkId::HOST);
                    player.is_local = true;
                }
            }
            entity.net = Some(NetworkComponent::new(sync, owner, is_local));
        }

        log::info!(
            "Hosting session {} as {} ({} entities)",
            self.session_id.as_deref().unwrap_or_default(),
            local_peer,
            self.world.entity_count()
        );
    }

    pub(super) fn choose_spawn_point(&self) -> Vec3 {
        let points = self.world.spawn_points();
        points
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_else(|| Vec3::from(self.config.fallback_spawn))
    }

    pub(super) fn handle_peer_left(&mut self, peer_id: &PeerId) {
        match self.mode {
            SessionMode::Multiplayer(Role::Client) if peer_id.is_host_key() => {
                log::warn!("Lost connection to host, returning to single-player");
                self.reset_to_single_player();
            }
            SessionMode::Multiplayer(Role::Host) => {
                self.onboarding.remove(peer_id);
                let Some(network_id) = self.directory.remove_peer(peer_id) else {
                    log::warn!("PeerLeft for unmapped peer {}", peer_id);
                    return;
                };

                self.remove_player(network_id);
                self.transport.send_message(MessagePayload::PlayerLeave {
                    peer_id: peer_id.to_string(),
                    network_id: network_id.get(),
                });
            }
            _ => {
                log::debug!("Ignoring departure of {} outside a session", peer_id);
            }
        }
    }

    pub(super) fn remove_player(&mut self, network_id: NetworkId) {
        let Some(handle) = self.world.find_player(network_id) else {
            log::warn!("No entity for departed player {}", network_id);
            return;
        };

        self.world.despawn(handle);
        if self.local_player == Some(handle) {
            log::warn!("Local player entity was removed");
            self.local_player = None;
        }
        log::info!("Removed player {} (entity {})", network_id, handle.id());
    }

    /// Multiplayer -> SinglePlayer: drop every connection and rebuild the
    /// level from scratch.
    pub(super) fn reset_to_single_player(&mut self) {
        self.transport.disconnect_all();
        self.transport.drain_events().for_each(drop);

        self.world.clear();
        self.directory.clear();
        self.mode = SessionMode::SinglePlayer;
        self.session_id = None;
        self.awaiting_full_state = false;
        self.awaiting_since = None;
        self.full_state_assembly = None;
        self.onboarding.clear();
        self.next_network_id = NetworkId::HOST.next();
        self.input_sequence = 0;
        self.broadcast.reset();
        self.local_player = Some(self.level.build(&mut self.world, &self.config.player_name));

        log::info!("Returned to single-player");
    }

    fn simulate_local(&mut self, input: InputSnapshot, dt: f32, now: Instant) {
        let Some(handle) = self.local_player else {
            return;
        };
        let dt = dt.clamp(0.0, MAX_STEP_SECS);
        let predicting =
            self.mode == SessionMode::Multiplayer(Role::Client) && !self.awaiting_full_state;
        let local_network_id = self.local_network_id();
        let now_ms = self.clock_ms(now);

        let Some(entity) = self.world.get_mut(handle) else {
            return;
        };
        // A stale handle can name someone else's entity after a full state.
        if predicting && (local_network_id.is_none() || entity.network_id() != local_network_id) {
            return;
        }
        self.movement.apply(&mut entity.transform, &input, dt);

        if !predicting {
            return;
        }

        self.input_sequence = self.input_sequence.wrapping_add(1);
        let sequence = self.input_sequence;
        if let Some(net) = entity.net.as_mut() {
            net.save_prediction(sequence, &entity.transform, now_ms);
        }

        self.transport.send_message_to_peer(
            &PeerId::host(),
            MessagePayload::PlayerInput(input.to_wire(sequence, dt)),
        );
    }

    pub fn debug_snapshot(&self) -> SessionDebugInfo {
        let mut players: Vec<PlayerDebugInfo> = self
            .world
            .entities()
            .filter_map(|e| {
                e.player.as_ref().map(|p| PlayerDebugInfo {
                    network_id: p.network_id.map(NetworkId::get),
                    name: p.name.clone(),
                    is_local: Some(e.handle()) == self.local_player,
                    position: e.transform.position.to_array(),
                })
            })
            .collect();
        players.sort_by_key(|p| p.network_id);

        let mut peers: Vec<PeerDebugInfo> = self
            .transport
            .open_peer_ids()
            .into_iter()
            .map(|peer_id| PeerDebugInfo {
                network_id: self.directory.network_id(&peer_id).map(NetworkId::get),
                latency_ms: self.transport.latency_ms(&peer_id),
                peer_id: peer_id.to_string(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        let stats = self.transport.stats();

        SessionDebugInfo {
            mode: self.mode.as_str(),
            is_host: self.is_multiplayer_host(),
            connected: self.is_multiplayer_connected(),
            session_id: self.session_id.clone(),
            local_peer_id: self.transport.local_peer_id().to_string(),
            signaling: self.transport.signaling_state().as_str(),
            entity_count: self.world.entity_count(),
            players,
            peers,
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::InputKeys;

    #[test]
    fn test_starts_single_player() {
        let session = Session::new(SessionConfig::default());

        assert_eq!(session.mode(), SessionMode::SinglePlayer);
        assert!(!session.is_multiplayer_host());
        assert!(!session.is_multiplayer_connected());
        assert!(session.local_entity().is_some());
        assert_eq!(session.debug_snapshot().mode, "single-player");
    }

    #[test]
    fn test_single_player_applies_input_directly() {
        let mut session = Session::new(SessionConfig::default());
        let start = session.local_entity().unwrap().position();

        let now = Instant::now();
        let input = InputSnapshot::new(InputKeys::FORWARD);
        session.tick_at(now, Some(&input));
        session.tick_at(now + std::time::Duration::from_millis(100), Some(&input));

        let end = session.local_entity().unwrap().position();
        assert!(end.z < start.z);
        assert_eq!(session.transport().open_peer_count(), 0);
    }

    #[test]
    fn test_spawn_falls_back_without_markers() {
        let mut session = Session::new(SessionConfig::default());
        session.world_mut().clear();
        assert_eq!(session.choose_spawn_point(), Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn test_spawn_uses_markers() {
        let session = Session::new(SessionConfig::default());
        let points = session.world().spawn_points();
        assert!(points.contains(&session.choose_spawn_point()));
    }

    #[test]
    fn test_become_host_retrofits_components() {
        let mut session = Session::new(SessionConfig::default());
        let count = session.world().entity_count();

        session.become_host();

        assert!(session.is_multiplayer_host());
        assert_eq!(session.world().entity_count(), count);
        assert!(session.world().entities().all(|e| e.net.is_some()));
        assert_eq!(session.local_network_id(), Some(NetworkId::HOST));
        assert_eq!(
            session.local_entity().and_then(Entity::network_id),
            Some(NetworkId::HOST)
        );
        assert!(session.session_id().is_some());
    }

    #[test]
    fn test_disconnect_rebuilds_world() {
        let mut session = Session::new(SessionConfig::default());
        session.become_host();
        session.world_mut().spawn(crate::snapshot::EntityKind::Prop);

        session.disconnect();

        assert_eq!(session.mode(), SessionMode::SinglePlayer);
        assert!(session.directory().is_empty());
        assert!(session.world().entities().all(|e| e.net.is_none()));
        assert!(session.local_entity().is_some());
    }

    #[test]
    fn test_chat_is_logged_locally() {
        let mut session = Session::new(SessionConfig::default());
        session.send_chat("hello");
        assert_eq!(session.chat_log().len(), 1);
        assert!(session.chat_log()[0].local);
    }

    #[test]
    fn test_missing_full_state_fails_connection() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.mode = SessionMode::Multiplayer(Role::Client);
        session.awaiting_full_state = true;
        session.awaiting_since = Some(now);

        session.tick_at(now + std::time::Duration::from_secs(5), None);
        assert_eq!(session.mode(), SessionMode::Multiplayer(Role::Client));
        assert!(session.last_connection_failure().is_none());

        session.tick_at(now + std::time::Duration::from_secs(11), None);
        assert_eq!(session.mode(), SessionMode::SinglePlayer);
        assert!(!session.is_awaiting_full_state());
        assert_eq!(session.last_connection_failure(), Some("connection failed"));
        assert!(session.local_entity().is_some());
    }
}
