use std::time::Instant;

use crate::net::{
    EntitySnapshot, EntityUpdateData, FullGameState, MessagePayload, NetworkMessage, PeerId,
    PlayerInputData,
};
use crate::simulation::{InputSnapshot, MAX_STEP_SECS};
use crate::snapshot::{Entity, EntityHandle, PlayerRole, Transform};
use crate::sync::ReconcileOutcome;

use super::directory::{NetworkId, PeerDirectory};
use super::onboarding::{FullStateAssembly, PendingOnboarding, split_full_state};
use super::orchestrator::{Role, Session, SessionMode};

/// Deltas per ENTITY_UPDATE so a broadcast of a large world stays under the
/// datagram budget.
const DELTAS_PER_MESSAGE: usize = 256;

impl Session {
    pub(super) fn handle_message(&mut self, from: &PeerId, message: NetworkMessage, now: Instant) {
        let timestamp = message.timestamp;
        match message.payload {
            MessagePayload::FullGameState(chunk) => self.on_full_game_state(chunk),
            MessagePayload::PlayerJoin { player } => self.on_player_join(from, player),
            MessagePayload::PlayerLeave {
                peer_id,
                network_id,
            } => self.on_player_leave(&PeerId::new(peer_id), NetworkId::new(network_id)),
            MessagePayload::EntityUpdate(data) => self.on_entity_update(from, data, timestamp, now),
            MessagePayload::PlayerInput(input) => self.on_player_input(from, input),
            other => {
                log::debug!("Unhandled {} from {}", other.message_type(), from);
            }
        }
    }

    /// Guest onboarding on the host: NetworkId, avatar, full state, announce.
    pub(super) fn onboard_peer(&mut self, peer_id: PeerId, now: Instant) {
        if let Some(existing) = self.directory.network_id(&peer_id) {
            log::debug!("Peer {} already onboarded as {}", peer_id, existing);
            return;
        }

        let network_id = self.next_network_id;
        if let Err(e) = self.directory.insert(peer_id.clone(), network_id) {
            log::warn!("Cannot onboard {}: {}", peer_id, e);
            return;
        }
        self.next_network_id = network_id.next();

        let spawn = self.choose_spawn_point();
        let mut role = PlayerRole::new(format!("player-{}", network_id.get()));
        role.peer_id = Some(peer_id.clone());
        role.network_id = Some(network_id);
        let handle = self.world.spawn_player(spawn, role);
        let component = self.new_component(Some(network_id), false);
        let Some(entity) = self.world.get_mut(handle) else {
            return;
        };
        entity.net = Some(component);
        let announcement = entity.to_snapshot();

        log::info!("Onboarding {} as {} at {:?}", peer_id, network_id, spawn);
        let transfer_id = self.send_full_state(&peer_id);
        self.onboarding
            .insert(peer_id.clone(), PendingOnboarding::new(transfer_id, now));

        self.transport.send_message_except(
            &peer_id,
            MessagePayload::PlayerJoin {
                player: announcement,
            },
        );
    }

    /// Sends a fresh snapshot of the world to one guest, chunked so no
    /// single message outgrows a datagram. Returns the transfer id used.
    pub(super) fn send_full_state(&mut self, peer_id: &PeerId) -> u32 {
        self.next_transfer_id = self.next_transfer_id.wrapping_add(1);
        let transfer_id = self.next_transfer_id;

        let state = FullGameState {
            session_id: self.session_id.clone().unwrap_or_default(),
            host_peer_id: self.transport.local_peer_id().to_string(),
            entities: self.world.snapshots(),
            peers: self.directory.to_mappings(),
            transfer_id,
            chunk_index: 0,
            chunk_count: 1,
        };
        let chunks = split_full_state(&state, transfer_id);
        log::debug!(
            "Full state {} for {}: {} entities in {} chunk(s)",
            transfer_id,
            peer_id,
            state.entities.len(),
            chunks.len()
        );

        for chunk in chunks {
            self.transport
                .send_message_to_peer(peer_id, MessagePayload::FullGameState(chunk));
        }
        transfer_id
    }

    /// Host: repeats the full state for guests whose PLAYER_JOIN has not
    /// arrived yet.
    pub(super) fn resend_full_states(&mut self, now: Instant) {
        let interval = self.config.full_state_resend();
        let due: Vec<PeerId> = self
            .onboarding
            .iter()
            .filter(|(_, pending)| pending.resend_due(now, interval))
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        for peer_id in due {
            let transfer_id = self.send_full_state(&peer_id);
            if let Some(pending) = self.onboarding.get_mut(&peer_id) {
                pending.mark_sent(transfer_id, now);
                log::info!(
                    "Resending full state to {} (attempt {})",
                    peer_id,
                    pending.attempts
                );
            }
        }
    }

    fn on_full_game_state(&mut self, chunk: FullGameState) {
        if self.mode != SessionMode::Multiplayer(Role::Client) {
            log::warn!("Ignoring FULL_GAME_STATE: this process is not a client");
            return;
        }

        if !self.awaiting_full_state {
            // The host missed our PLAYER_JOIN and is resending.
            if chunk.chunk_index == 0 {
                log::debug!("Full state {} after joining, acknowledging again", chunk.transfer_id);
                self.send_join_details();
            }
            return;
        }

        let Some(state) = FullStateAssembly::accept(&mut self.full_state_assembly, chunk) else {
            return;
        };
        self.ingest_full_state(state);
    }

    fn ingest_full_state(&mut self, state: FullGameState) {
        let directory = PeerDirectory::from_mappings(&state.peers);
        let local_network_id = directory.network_id(self.transport.local_peer_id());

        self.world.clear();
        for snapshot in &state.entities {
            let mut entity = Entity::from_snapshot(snapshot);
            let owner = entity.network_id();
            entity.net = Some(self.new_component(owner, false));
            self.world.insert(entity);
        }
        self.directory = directory;
        self.session_id = Some(state.session_id);

        let local = local_network_id.and_then(|id| self.world.find_player(id));
        match local {
            Some(handle) => {
                if let Some(entity) = self.world.get_mut(handle) {
                    if let Some(player) = entity.player.as_mut() {
                        player.is_local = true;
                        player.name = self.config.player_name.clone();
                    }
                    if let Some(net) = entity.net.as_mut() {
                        net.set_locally_controlled(true);
                    }
                }
                self.local_player = Some(handle);
            }
            None => {
                log::error!(
                    "No entity in full state matches local peer {}",
                    self.transport.local_peer_id()
                );
            }
        }

        self.awaiting_full_state = false;
        self.awaiting_since = None;
        self.input_sequence = 0;
        log::info!(
            "Joined session {} as {} ({} entities, host {})",
            self.session_id.as_deref().unwrap_or_default(),
            local_network_id.map_or_else(|| "?".to_string(), |id| id.to_string()),
            self.world.entity_count(),
            state.host_peer_id
        );

        self.send_join_details();
    }

    /// Client: describes the local player to the host. Doubles as the
    /// acknowledgement of the full state.
    fn send_join_details(&mut self) {
        let local_network_id = self.local_network_id();
        let Some(player) = self
            .local_entity()
            .filter(|e| local_network_id.is_some() && e.network_id() == local_network_id)
            .map(Entity::to_snapshot)
        else {
            return;
        };
        self.transport
            .send_message_to_peer(&PeerId::host(), MessagePayload::PlayerJoin { player });
    }

    fn on_player_join(&mut self, from: &PeerId, snapshot: EntitySnapshot) {
        match self.mode {
            SessionMode::Multiplayer(Role::Host) => self.accept_join_details(from, snapshot),
            SessionMode::Multiplayer(Role::Client) if !self.awaiting_full_state => {
                self.add_remote_player(snapshot)
            }
            _ => log::debug!("Ignoring PLAYER_JOIN from {}", from),
        }
    }

    /// A guest's self-description after onboarding: name and cosmetics only.
    fn accept_join_details(&mut self, from: &PeerId, snapshot: EntitySnapshot) {
        if let Some(pending) = self.onboarding.remove(from) {
            log::debug!(
                "Peer {} acknowledged full state {} after {} send(s)",
                from,
                pending.transfer_id,
                pending.attempts
            );
        }
        let Some(handle) = self.owned_entity(from) else {
            return;
        };
        if handle.id() != snapshot.entity_id {
            log::warn!(
                "Peer {} described entity {} it does not own",
                from,
                snapshot.entity_id
            );
            return;
        }

        let Some(entity) = self.world.get_mut(handle) else {
            return;
        };
        if let (Some(player), Some(remote)) = (entity.player.as_mut(), snapshot.player.as_ref()) {
            player.name = remote.name.clone();
        }
        let remote = Entity::from_snapshot(&snapshot);
        entity.apply_cosmetics(&remote.to_delta());

        let player = entity.to_snapshot();
        log::info!("Peer {} is now known as {:?}", from, player.player.as_ref().map(|p| &p.name));
        self.transport
            .send_message_except(from, MessagePayload::PlayerJoin { player });
    }

    fn add_remote_player(&mut self, snapshot: EntitySnapshot) {
        let mut entity = Entity::from_snapshot(&snapshot);
        let Some(network_id) = entity.network_id() else {
            log::warn!("PLAYER_JOIN for entity {} without a NetworkId", snapshot.entity_id);
            return;
        };
        if Some(network_id) == self.local_network_id() {
            return;
        }

        if let Some(peer_id) = entity.peer_id().cloned() {
            if let Err(e) = self.directory.insert(peer_id, network_id) {
                log::warn!("Inconsistent PLAYER_JOIN: {}", e);
                return;
            }
        }

        if let Some(existing) = self.world.get_by_id_mut(snapshot.entity_id) {
            if let (Some(player), Some(remote)) = (existing.player.as_mut(), entity.player.take()) {
                player.name = remote.name;
                player.head_position = remote.head_position;
                player.head_rotation = remote.head_rotation;
            }
            existing.model_id = entity.model_id;
            existing.frame = entity.frame;
            return;
        }

        entity.net = Some(self.new_component(Some(network_id), false));
        log::info!(
            "Player {} joined ({:?})",
            network_id,
            entity.player.as_ref().map(|p| &p.name)
        );
        self.world.insert(entity);
    }

    fn on_player_leave(&mut self, peer_id: &PeerId, network_id: NetworkId) {
        if self.mode != SessionMode::Multiplayer(Role::Client) {
            log::warn!("Ignoring PLAYER_LEAVE for {}: not a client", peer_id);
            return;
        }

        match self.directory.remove_peer(peer_id) {
            Some(mapped) if mapped != network_id => {
                log::warn!(
                    "PLAYER_LEAVE for {} names {} but map had {}",
                    peer_id,
                    network_id,
                    mapped
                );
            }
            Some(_) => {}
            None => log::warn!("PLAYER_LEAVE for unmapped peer {}", peer_id),
        }
        self.remove_player(network_id);
    }

    fn on_entity_update(
        &mut self,
        from: &PeerId,
        data: EntityUpdateData,
        timestamp: u64,
        now: Instant,
    ) {
        match self.mode {
            SessionMode::Multiplayer(Role::Host) => {
                let Some(owned) = self.owned_entity(from) else {
                    return;
                };
                for delta in &data.updates {
                    if delta.entity_id != owned.id() {
                        log::warn!("Peer {} sent update for entity {}", from, delta.entity_id);
                        continue;
                    }
                    if let Some(entity) = self.world.get_mut(owned) {
                        entity.apply_cosmetics(delta);
                    }
                }
            }
            SessionMode::Multiplayer(Role::Client) if !self.awaiting_full_state => {
                let now_ms = self.clock_ms(now);
                let local = self.local_player;
                for delta in &data.updates {
                    let Some(entity) = self.world.get_by_id_mut(delta.entity_id) else {
                        log::warn!("Update for unknown entity {}", delta.entity_id);
                        continue;
                    };
                    let target = Transform::from_delta(delta);
                    let is_local = Some(entity.handle()) == local;
                    let Some(net) = entity.net.as_mut() else {
                        entity.transform = target;
                        continue;
                    };

                    if is_local {
                        if let Some(sequence) = data.input_sequence {
                            let outcome =
                                net.reconcile(sequence, &target, &mut entity.transform, now_ms);
                            if let ReconcileOutcome::Corrected { error } = outcome {
                                log::debug!("Corrected local pose by {:.3}", error);
                            }
                        }
                        continue;
                    }

                    net.apply_remote_update(
                        &mut entity.transform,
                        target,
                        timestamp,
                        data.authoritative,
                        now_ms,
                    );
                    entity.apply_cosmetics(delta);
                }
            }
            _ => {}
        }
    }

    fn on_player_input(&mut self, from: &PeerId, input: PlayerInputData) {
        if !self.is_multiplayer_host() {
            log::warn!("Ignoring PLAYER_INPUT from {}: not the host", from);
            return;
        }

        let Some(handle) = self.owned_entity(from) else {
            return;
        };
        let Some(entity) = self.world.get_mut(handle) else {
            return;
        };

        let snapshot = InputSnapshot::from_wire(&input);
        let dt = input.dt.clamp(0.0, MAX_STEP_SECS);
        self.movement.apply(&mut entity.transform, &snapshot, dt);
        let delta = entity.to_delta();

        self.transport
            .send_message(MessagePayload::EntityUpdate(EntityUpdateData {
                updates: vec![delta],
                input_sequence: Some(input.sequence),
                authoritative: false,
            }));
    }

    /// Host: 20 Hz per-peer deltas, each omitting the receiver's own avatar.
    pub(super) fn broadcast_deltas(&mut self) {
        let mut deltas: Vec<(Option<NetworkId>, _)> = self
            .world
            .entities()
            .map(|e| (e.network_id(), e.to_delta()))
            .collect();
        deltas.sort_by_key(|(_, d)| d.entity_id);

        for peer_id in self.transport.open_peer_ids() {
            let receiver = self.directory.network_id(&peer_id);
            let updates: Vec<_> = deltas
                .iter()
                .filter(|(owner, _)| owner.is_none() || *owner != receiver)
                .map(|(_, d)| d.clone())
                .collect();
            for chunk in updates.chunks(DELTAS_PER_MESSAGE) {
                self.transport.send_message_to_peer(
                    &peer_id,
                    MessagePayload::EntityUpdate(EntityUpdateData {
                        updates: chunk.to_vec(),
                        input_sequence: None,
                        authoritative: false,
                    }),
                );
            }
        }
    }

    /// Client: own pose for the host's cosmetic fields.
    pub(super) fn send_own_pose(&mut self) {
        let local_network_id = self.local_network_id();
        let Some(delta) = self
            .local_entity()
            .filter(|e| local_network_id.is_some() && e.network_id() == local_network_id)
            .map(Entity::to_delta)
        else {
            return;
        };
        self.transport.send_message_to_peer(
            &PeerId::host(),
            MessagePayload::EntityUpdate(EntityUpdateData {
                updates: vec![delta],
                input_sequence: None,
                authoritative: false,
            }),
        );
    }

    fn owned_entity(&self, peer_id: &PeerId) -> Option<EntityHandle> {
        let Some(network_id) = self.directory.network_id(peer_id) else {
            log::warn!("Message from unmapped peer {}", peer_id);
            return None;
        };
        let handle = self.world.find_player(network_id);
        if handle.is_none() {
            log::warn!("No entity for {} ({})", network_id, peer_id);
        }
        handle
    }
}
