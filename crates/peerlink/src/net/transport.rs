use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use super::config::TransportConfig;
use super::connection::{ConnectionState, PeerConnection, PeerId};
use super::events::{LeaveReason, SignalingState, TransportEvent};
use super::protocol::{Datagram, DatagramBody, MessagePayload, NetworkMessage, PacketError};
use super::signaling::{
    SessionDescription, SetupRole, SignalType, SignalingBlob, SignalingError, gather_candidates,
};
use super::stats::{NetworkStats, rand_u64, random_hex};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("no pending offer to complete")]
    NoPendingOffer,
    #[error("already connected to a session")]
    AlreadyConnected,
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Host side of a handshake waiting for the guest's answer.
#[derive(Debug)]
struct PendingOffer {
    socket: UdpSocket,
    ice_token: String,
    created_at: Instant,
}

/// Peer-to-peer message transport. One UDP socket per connection acts as its
/// data channel; everything is polled from `update_at`.
pub struct Transport {
    config: TransportConfig,
    local_peer_id: PeerId,
    is_host: bool,
    peers: HashMap<PeerId, PeerConnection>,
    pending_offer: Option<PendingOffer>,
    pending_answer: Option<PeerConnection>,
    signaling_state: SignalingState,
    pending_events: VecDeque<TransportEvent>,
    next_sequence: u32,
    session_version: u64,
    closed_stats: NetworkStats,
    epoch: Instant,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            local_peer_id: PeerId::generate(),
            is_host: false,
            peers: HashMap::new(),
            pending_offer: None,
            pending_answer: None,
            signaling_state: SignalingState::Idle,
            pending_events: VecDeque::new(),
            next_sequence: 0,
            session_version: rand_u64() >> 1,
            closed_stats: NetworkStats::default(),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn open_peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|c| c.is_open())
            .map(|c| c.peer_id.clone())
            .collect()
    }

    pub fn open_peer_count(&self) -> usize {
        self.peers.values().filter(|c| c.is_open()).count()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_peer_open(&self, peer_id: &PeerId) -> bool {
        self.peers.get(peer_id).is_some_and(|c| c.is_open())
    }

    pub fn has_pending_offer(&self) -> bool {
        self.pending_offer.is_some()
    }

    pub fn latency_ms(&self, peer_id: &PeerId) -> Option<f32> {
        self.peers.get(peer_id).and_then(|c| c.rtt.srtt())
    }

    pub fn stats(&self) -> NetworkStats {
        let mut total = self.closed_stats.clone();
        for conn in self.peers.values() {
            total.merge(&conn.stats);
        }
        total
    }

    /// Starts hosting: binds a fresh data-channel socket and returns the offer
    /// blob for the guest. Replaces any unanswered offer.
    pub fn create_offer(&mut self) -> Result<String, TransportError> {
        if !self.is_host && (self.pending_answer.is_some() || !self.peers.is_empty()) {
            return Err(TransportError::AlreadyConnected);
        }

        let result = self.try_create_offer();
        if result.is_err() {
            self.set_signaling_state(SignalingState::Failed);
        }
        result
    }

    fn try_create_offer(&mut self) -> Result<String, TransportError> {
        if self.pending_offer.take().is_some() {
            log::info!("Replacing unanswered offer");
        }

        let socket = UdpSocket::bind(self.config.bind_addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        let candidates = gather_candidates(local_addr, &self.config.candidate_hosts);
        let candidate_count = candidates.len();

        let description = SessionDescription {
            peer_id: self.local_peer_id.to_string(),
            session_version: self.next_session_version(),
            ice_token: random_hex(8),
            setup: SetupRole::ActPass,
        };
        let blob = SignalingBlob::new(SignalType::Offer, &description, candidates).to_json()?;

        log::info!("Created offer on {} ({} candidates)", local_addr, candidate_count);

        self.is_host = true;
        self.pending_offer = Some(PendingOffer {
            socket,
            ice_token: description.ice_token,
            created_at: Instant::now(),
        });
        self.set_signaling_state(SignalingState::OfferCreated);

        Ok(blob)
    }

    /// Joins as a guest: applies the host's offer and returns the answer blob.
    /// The channel opens once the host's connectivity check reaches us.
    pub fn accept_offer(&mut self, offer: &str) -> Result<String, TransportError> {
        if !self.peers.is_empty() {
            return Err(TransportError::AlreadyConnected);
        }

        let result = self.try_accept_offer(offer);
        if result.is_err() {
            self.set_signaling_state(SignalingState::Failed);
        }
        result
    }

    fn try_accept_offer(&mut self, offer: &str) -> Result<String, TransportError> {
        let blob = SignalingBlob::from_json(offer, SignalType::Offer)?;
        let remote = blob.description()?;
        let remote_candidates = blob.candidate_addrs()?;

        if self.pending_offer.take().is_some() {
            log::info!("Dropping own offer to join {}", remote.peer_id);
        }
        self.is_host = false;

        let socket = UdpSocket::bind(self.config.bind_addr)?;
        let now = Instant::now();
        let conn = PeerConnection::new(
            PeerId::host(),
            socket,
            remote.ice_token.clone(),
            remote_candidates,
            true,
            now,
        )?;
        let candidates = gather_candidates(conn.local_addr(), &self.config.candidate_hosts);

        let description = SessionDescription {
            peer_id: self.local_peer_id.to_string(),
            session_version: self.next_session_version(),
            ice_token: remote.ice_token,
            setup: SetupRole::Active,
        };
        let blob = SignalingBlob::new(SignalType::Answer, &description, candidates).to_json()?;

        log::info!(
            "Accepted offer from {}, answering on {}",
            remote.peer_id,
            conn.local_addr()
        );

        self.pending_answer = Some(conn);
        self.set_signaling_state(SignalingState::AnswerCreated);

        Ok(blob)
    }

    /// Applies the guest's answer to the pending offer and starts
    /// connectivity checks. Returns the identity assigned to the guest.
    pub fn complete_connection(&mut self, answer: &str) -> Result<PeerId, TransportError> {
        let pending = self
            .pending_offer
            .take()
            .ok_or(TransportError::NoPendingOffer)?;

        let result = self.try_complete_connection(pending, answer);
        if result.is_err() {
            self.set_signaling_state(SignalingState::Failed);
        }
        result
    }

    fn try_complete_connection(
        &mut self,
        pending: PendingOffer,
        answer: &str,
    ) -> Result<PeerId, TransportError> {
        let blob = SignalingBlob::from_json(answer, SignalType::Answer)?;
        let remote = blob.description()?;
        if remote.ice_token != pending.ice_token {
            return Err(SignalingError::TokenMismatch.into());
        }
        let remote_candidates = blob.candidate_addrs()?;

        let peer_id = PeerId::generate();
        let now = Instant::now();
        let conn = PeerConnection::new(
            peer_id.clone(),
            pending.socket,
            pending.ice_token,
            remote_candidates,
            false,
            now,
        )?;

        log::info!("Answer from {} accepted as peer {}", remote.peer_id, peer_id);

        self.peers.insert(peer_id.clone(), conn);
        self.set_signaling_state(SignalingState::AnswerReceived);
        self.send_checks(now);

        Ok(peer_id)
    }

    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// One transport step: receive, dispatch, liveness, keep-alive, flush.
    pub fn update_at(&mut self, now: Instant) {
        self.poll_pending_answer(now);
        self.poll_peers(now);
        self.send_checks(now);
        self.expire_signaling(now);
        self.evict_stale(now);
        self.send_keepalives(now);
        self.flush_due(now);
    }

    pub fn send_message(&mut self, payload: MessagePayload) -> usize {
        let message = self.next_message(payload);
        let mut queued = 0;
        for conn in self.peers.values_mut().filter(|c| c.is_open()) {
            conn.enqueue(message.clone());
            queued += 1;
        }
        queued
    }

    pub fn send_message_to_peer(&mut self, peer_id: &PeerId, payload: MessagePayload) -> bool {
        let message = self.next_message(payload);
        match self.peers.get_mut(peer_id) {
            Some(conn) if conn.is_open() => {
                conn.enqueue(message);
                true
            }
            _ => {
                log::debug!(
                    "Dropping {} for {}: channel not open",
                    message.message_type(),
                    peer_id
                );
                false
            }
        }
    }

    pub fn send_message_except(&mut self, except: &PeerId, payload: MessagePayload) -> usize {
        let message = self.next_message(payload);
        let mut queued = 0;
        for conn in self
            .peers
            .values_mut()
            .filter(|c| c.is_open() && &c.peer_id != except)
        {
            conn.enqueue(message.clone());
            queued += 1;
        }
        queued
    }

    pub fn flush_due(&mut self, now: Instant) {
        let interval = self.config.batch_interval();
        for conn in self.peers.values_mut() {
            if conn.flush_due(now, interval) {
                if let Err(e) = conn.flush(now) {
                    log::warn!("Flush to {} failed: {}", conn.peer_id, e);
                }
            }
        }
    }

    /// Sends every queued message regardless of the batch interval.
    pub fn flush_at(&mut self, now: Instant) {
        for conn in self.peers.values_mut() {
            if let Err(e) = conn.flush(now) {
                log::warn!("Flush to {} failed: {}", conn.peer_id, e);
            }
        }
    }

    pub fn flush(&mut self) {
        self.flush_at(Instant::now());
    }

    pub fn disconnect_peer(&mut self, peer_id: &PeerId) -> bool {
        self.close_peer(peer_id, LeaveReason::Local)
    }

    /// Closes every connection and abandons any handshake in progress.
    pub fn disconnect_all(&mut self) {
        let peer_ids = self.peer_ids();
        for peer_id in &peer_ids {
            self.close_peer(peer_id, LeaveReason::Local);
        }

        self.pending_offer = None;
        self.pending_answer = None;
        self.is_host = false;
        self.local_peer_id = PeerId::generate();
        if self.signaling_state != SignalingState::Idle {
            self.signaling_state = SignalingState::Idle;
            self.pending_events
                .push_back(TransportEvent::ConnectionStateChanged(SignalingState::Idle));
        }

        if !peer_ids.is_empty() {
            log::info!("Disconnected from {} peer(s)", peer_ids.len());
        }
    }

    fn close_peer(&mut self, peer_id: &PeerId, reason: LeaveReason) -> bool {
        let Some(mut conn) = self.peers.remove(peer_id) else {
            return false;
        };

        if conn.is_open() && reason != LeaveReason::Graceful {
            let _ = conn.send(DatagramBody::Close);
        }
        conn.clear_queue();
        let was_open = conn.is_open();
        conn.state = ConnectionState::Closed;
        self.closed_stats.merge(&conn.stats);

        if was_open {
            log::info!("Peer {} left: {}", peer_id, reason.as_str());
            self.pending_events.push_back(TransportEvent::PeerLeft {
                peer_id: peer_id.clone(),
                reason,
            });
        } else {
            log::info!("Abandoned handshake with {}: {}", peer_id, reason.as_str());
        }
        true
    }

    fn next_message(&mut self, payload: MessagePayload) -> NetworkMessage {
        self.next_sequence = self.next_sequence.wrapping_add(1);
        NetworkMessage::new(self.next_sequence, unix_millis(), payload)
    }

    fn next_session_version(&mut self) -> u64 {
        self.session_version = self.session_version.wrapping_add(1);
        self.session_version
    }

    fn clock_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn set_signaling_state(&mut self, state: SignalingState) {
        if self.signaling_state == state {
            return;
        }

        log::info!(
            "Signaling: {} -> {}",
            self.signaling_state.as_str(),
            state.as_str()
        );
        self.signaling_state = state;
        self.pending_events
            .push_back(TransportEvent::ConnectionStateChanged(state));
    }

    fn poll_pending_answer(&mut self, now: Instant) {
        let Some(conn) = self.pending_answer.as_mut() else {
            return;
        };

        let datagrams = match conn.receive() {
            Ok(datagrams) => datagrams,
            Err(e) => {
                log::warn!("Receive on pending answer failed: {}", e);
                self.pending_answer = None;
                self.set_signaling_state(SignalingState::Failed);
                return;
            }
        };

        for (datagram, addr) in datagrams {
            let DatagramBody::Hello {
                token,
                host_peer_id,
                assigned_peer_id,
            } = datagram.body
            else {
                log::debug!("Ignoring datagram from {} before channel open", addr);
                continue;
            };

            if token != conn.ice_token {
                log::warn!("Connectivity check from {} with wrong token", addr);
                continue;
            }

            conn.open(addr, now);
            if let Err(e) = conn.send(DatagramBody::HelloAck { token }) {
                log::warn!("Failed to acknowledge host check: {}", e);
            }

            if let Some(conn) = self.pending_answer.take() {
                self.local_peer_id = PeerId::new(assigned_peer_id);
                log::info!(
                    "Data channel to host {} open via {}, local id {}",
                    host_peer_id,
                    addr,
                    self.local_peer_id
                );
                self.peers.insert(PeerId::host(), conn);
                self.pending_events
                    .push_back(TransportEvent::PeerJoined(PeerId::host()));
                self.pending_events
                    .push_back(TransportEvent::DataChannelReady(PeerId::host()));
                self.set_signaling_state(SignalingState::Connected);
            }
            return;
        }
    }

    fn poll_peers(&mut self, now: Instant) {
        let peer_ids = self.peer_ids();
        for peer_id in peer_ids {
            let received = match self.peers.get_mut(&peer_id) {
                Some(conn) => conn.receive(),
                None => continue,
            };

            match received {
                Ok(datagrams) => {
                    for (datagram, addr) in datagrams {
                        self.handle_datagram(&peer_id, datagram, addr, now);
                    }
                }
                Err(e) => {
                    log::warn!("Receive from {} failed: {}", peer_id, e);
                    self.close_peer(&peer_id, LeaveReason::Error);
                }
            }
        }
    }

    fn handle_datagram(&mut self, peer_id: &PeerId, datagram: Datagram, addr: SocketAddr, now: Instant) {
        let Some(conn) = self.peers.get_mut(peer_id) else {
            return;
        };

        match datagram.body {
            DatagramBody::Hello { token, .. } => {
                // Retransmitted check after our ack was lost.
                if conn.is_host && token == conn.ice_token {
                    conn.touch(now);
                    let _ = conn.send_to(DatagramBody::HelloAck { token }, addr);
                }
            }
            DatagramBody::HelloAck { token } => {
                if conn.is_host || token != conn.ice_token {
                    log::warn!("Unexpected HelloAck from {}", addr);
                    return;
                }
                if conn.is_open() {
                    conn.touch(now);
                    return;
                }

                conn.open(addr, now);
                log::info!("Data channel to {} open via {}", peer_id, addr);
                self.pending_events
                    .push_back(TransportEvent::PeerJoined(peer_id.clone()));
                self.pending_events
                    .push_back(TransportEvent::DataChannelReady(peer_id.clone()));
                self.set_signaling_state(SignalingState::Connected);
            }
            DatagramBody::Batch(messages) => {
                if !conn.is_open() {
                    log::debug!("Dropping batch from {} before channel open", addr);
                    return;
                }
                conn.touch(now);
                conn.stats.messages_received += messages.len() as u64;

                for message in messages {
                    self.dispatch(peer_id, message, now);
                }
            }
            DatagramBody::Close => {
                self.close_peer(peer_id, LeaveReason::Graceful);
            }
        }
    }

    fn dispatch(&mut self, from: &PeerId, message: NetworkMessage, now: Instant) {
        match message.payload {
            MessagePayload::Ping { timestamp } => {
                let pong = self.next_message(MessagePayload::Pong { timestamp });
                if let Some(conn) = self.peers.get_mut(from) {
                    if let Err(e) = conn.send(DatagramBody::Batch(vec![pong])) {
                        log::debug!("Pong to {} failed: {}", from, e);
                    }
                }
            }
            MessagePayload::Pong { timestamp } => {
                let rtt = self.clock_ms(now).saturating_sub(timestamp) as f32;
                if let Some(conn) = self.peers.get_mut(from) {
                    conn.rtt.record(rtt);
                    log::debug!("RTT to {}: {:.1} ms", from, rtt);
                }
            }
            MessagePayload::Chat { sender, text } => {
                self.pending_events.push_back(TransportEvent::ChatReceived {
                    from: from.clone(),
                    sender,
                    text,
                });
            }
            payload => {
                log::debug!("{} from {}", payload.message_type(), from);
                let message = NetworkMessage {
                    priority: message.priority,
                    sequence_number: message.sequence_number,
                    timestamp: message.timestamp,
                    payload,
                };
                self.pending_events.push_back(TransportEvent::MessageReceived {
                    from: from.clone(),
                    message,
                });
            }
        }
    }

    /// Host side: re-send `Hello` to every candidate until one acknowledges.
    fn send_checks(&mut self, now: Instant) {
        let interval = self.config.check_interval();
        let host_peer_id = self.local_peer_id.to_string();

        for conn in self.peers.values_mut() {
            if conn.is_host || conn.state != ConnectionState::Checking {
                continue;
            }
            if conn
                .last_check
                .is_some_and(|t| now.saturating_duration_since(t) < interval)
            {
                continue;
            }
            conn.last_check = Some(now);

            let candidates = conn.remote_candidates.clone();
            for addr in candidates {
                let hello = DatagramBody::Hello {
                    token: conn.ice_token.clone(),
                    host_peer_id: host_peer_id.clone(),
                    assigned_peer_id: conn.peer_id.to_string(),
                };
                if let Err(e) = conn.send_to(hello, addr) {
                    log::debug!("Check to {} failed: {}", addr, e);
                }
            }
        }
    }

    fn expire_signaling(&mut self, now: Instant) {
        let timeout = self.config.signaling_timeout();
        let mut expired = false;

        if self
            .pending_offer
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.created_at) > timeout)
        {
            log::warn!("Offer was not answered within {:?}", timeout);
            self.pending_offer = None;
            expired = true;
        }

        if self
            .pending_answer
            .as_ref()
            .is_some_and(|c| c.is_timed_out(now, timeout))
        {
            log::warn!("Host never reached us within {:?}", timeout);
            self.pending_answer = None;
            expired = true;
        }

        let stuck: Vec<PeerId> = self
            .peers
            .values()
            .filter(|c| c.state == ConnectionState::Checking && c.is_timed_out(now, timeout))
            .map(|c| c.peer_id.clone())
            .collect();
        for peer_id in &stuck {
            self.close_peer(peer_id, LeaveReason::Timeout);
        }
        expired |= !stuck.is_empty();

        if expired {
            self.set_signaling_state(SignalingState::Failed);
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        let timeout = self.config.peer_timeout();
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|c| c.is_open() && c.is_timed_out(now, timeout))
            .map(|c| c.peer_id.clone())
            .collect();

        for peer_id in stale {
            self.close_peer(&peer_id, LeaveReason::Timeout);
        }
    }

    fn send_keepalives(&mut self, now: Instant) {
        let interval = self.config.ping_interval();
        let due: Vec<PeerId> = self
            .peers
            .values()
            .filter(|c| c.is_open() && now.saturating_duration_since(c.last_ping) >= interval)
            .map(|c| c.peer_id.clone())
            .collect();

        for peer_id in due {
            let ping = self.next_message(MessagePayload::Ping {
                timestamp: self.clock_ms(now),
            });
            if let Some(conn) = self.peers.get_mut(&peer_id) {
                conn.last_ping = now;
                conn.enqueue(ping);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for conn in self.peers.values_mut().filter(|c| c.is_open()) {
            let _ = conn.send(DatagramBody::Close);
        }
    }
}
