use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::protocol::{
    Datagram, DatagramBody, DatagramHeader, MAX_DATAGRAM_SIZE, NetworkMessage, encoded_len,
};
use super::stats::{NetworkStats, random_hex};
use super::tracking::{ReceiveTracker, RttEstimator};

const HOST_KEY: &str = "host";
const DATAGRAM_OVERHEAD: usize = 256;

/// Transport-assigned identity of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(random_hex(8))
    }

    /// Key under which a guest stores its connection to the host.
    pub fn host() -> Self {
        Self(HOST_KEY.to_string())
    }

    pub fn is_host_key(&self) -> bool {
        self.0 == HOST_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connectivity checks in flight; no application data yet.
    Checking,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct PeerConnection {
    pub peer_id: PeerId,
    pub is_host: bool,
    pub state: ConnectionState,
    pub ice_token: String,
    pub remote_candidates: Vec<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub last_activity: Instant,
    pub last_check: Option<Instant>,
    pub last_ping: Instant,
    pub last_flush: Instant,
    pub send_sequence: u32,
    pub receive_tracker: ReceiveTracker,
    pub rtt: RttEstimator,
    pub stats: NetworkStats,
    socket: UdpSocket,
    local_addr: SocketAddr,
    outgoing: Vec<NetworkMessage>,
    recv_buffer: Vec<u8>,
}

impl PeerConnection {
    pub fn new(
        peer_id: PeerId,
        socket: UdpSocket,
        ice_token: String,
        remote_candidates: Vec<SocketAddr>,
        is_host: bool,
        now: Instant,
    ) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            peer_id,
            is_host,
            state: ConnectionState::Checking,
            ice_token,
            remote_candidates,
            remote_addr: None,
            last_activity: now,
            last_check: None,
            last_ping: now,
            last_flush: now,
            send_sequence: 0,
            receive_tracker: ReceiveTracker::new(),
            rtt: RttEstimator::new(),
            stats: NetworkStats::default(),
            socket,
            local_addr,
            outgoing: Vec::new(),
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    pub fn open(&mut self, remote_addr: SocketAddr, now: Instant) {
        self.remote_addr = Some(remote_addr);
        self.state = ConnectionState::Open;
        self.last_ping = now;
        self.last_flush = now;
        self.touch(now);
    }

    pub fn queued(&self) -> usize {
        self.outgoing.len()
    }

    pub fn enqueue(&mut self, message: NetworkMessage) {
        self.outgoing.push(message);
    }

    pub fn send_to(&mut self, body: DatagramBody, addr: SocketAddr) -> io::Result<usize> {
        self.send_sequence = self.send_sequence.wrapping_add(1);
        let datagram = Datagram::new(DatagramHeader::new(self.send_sequence), body);

        let data = datagram.serialize().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )
        })?;

        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds maximum size",
            ));
        }

        let bytes = self.socket.send_to(&data, addr)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    pub fn send(&mut self, body: DatagramBody) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;
        self.send_to(body, addr)
    }

    /// Drains the socket. Invalid or foreign datagrams are dropped here.
    pub fn receive(&mut self) -> io::Result<Vec<(Datagram, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let datagram = match Datagram::deserialize(&self.recv_buffer[..size]) {
                        Ok(datagram) => datagram,
                        Err(e) => {
                            log::warn!("Malformed datagram from {}: {}", addr, e);
                            self.stats.packets_dropped += 1;
                            continue;
                        }
                    };

                    if !datagram.header.is_valid() {
                        log::warn!("Datagram from {} has invalid header", addr);
                        self.stats.packets_dropped += 1;
                        continue;
                    }

                    if !self.receive_tracker.record_received(datagram.header.sequence) {
                        self.stats.duplicates += 1;
                        continue;
                    }

                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    datagrams.push((datagram, addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }

    pub fn flush_due(&self, now: Instant, interval: Duration) -> bool {
        !self.outgoing.is_empty() && now.saturating_duration_since(self.last_flush) >= interval
    }

    /// Sends everything queued, highest priority first, split across as many
    /// datagrams as needed. Returns the number of datagrams sent.
    pub fn flush(&mut self, now: Instant) -> io::Result<usize> {
        self.last_flush = now;
        if !self.is_open() {
            self.outgoing.clear();
            return Ok(0);
        }
        if self.outgoing.is_empty() {
            return Ok(0);
        }

        let mut pending = std::mem::take(&mut self.outgoing);
        pending.sort_by_key(|m| m.priority);

        let budget = MAX_DATAGRAM_SIZE - DATAGRAM_OVERHEAD;
        let mut batches: Vec<Vec<NetworkMessage>> = Vec::new();
        let mut current = Vec::new();
        let mut current_len = 0;

        for message in pending {
            let len = match encoded_len(&message) {
                Ok(len) => len,
                Err(e) => {
                    log::warn!("Dropping unencodable {}: {}", message.message_type(), e);
                    continue;
                }
            };

            if len > budget {
                log::warn!(
                    "Dropping oversized {} ({} bytes) for {}",
                    message.message_type(),
                    len,
                    self.peer_id
                );
                continue;
            }

            if current_len + len > budget && !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current_len += len;
            current.push(message);
        }
        if !current.is_empty() {
            batches.push(current);
        }

        let count = batches.len();
        for batch in batches {
            self.stats.messages_sent += batch.len() as u64;
            self.send(DatagramBody::Batch(batch))?;
        }

        Ok(count)
    }

    pub fn clear_queue(&mut self) {
        self.outgoing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{MessagePayload, Priority};

    fn loopback_pair() -> (PeerConnection, UdpSocket) {
        let now = Instant::now();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut conn = PeerConnection::new(
            PeerId::new("peer"),
            socket,
            "token".into(),
            vec![receiver.local_addr().unwrap()],
            false,
            now,
        )
        .unwrap();
        conn.open(receiver.local_addr().unwrap(), now);
        (conn, receiver)
    }

    #[test]
    fn test_peer_id_display() {
        let id = PeerId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert_eq!(format!("{}", PeerId::host()), "host");
        assert!(PeerId::host().is_host_key());
    }

    #[test]
    fn test_timeout_uses_last_activity() {
        let (mut conn, _rx) = loopback_pair();
        let start = conn.last_activity;
        assert!(!conn.is_timed_out(start + Duration::from_secs(29), Duration::from_secs(30)));
        assert!(conn.is_timed_out(start + Duration::from_secs(31), Duration::from_secs(30)));

        conn.touch(start + Duration::from_secs(20));
        assert!(!conn.is_timed_out(start + Duration::from_secs(31), Duration::from_secs(30)));
    }

    #[test]
    fn test_flush_orders_by_priority() {
        let (mut conn, receiver) = loopback_pair();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        conn.enqueue(NetworkMessage::new(
            1,
            0,
            MessagePayload::Chat {
                sender: "a".into(),
                text: "hi".into(),
            },
        ));
        conn.enqueue(NetworkMessage::new(2, 0, MessagePayload::Ping { timestamp: 1 }));
        conn.enqueue(NetworkMessage::new(
            3,
            0,
            MessagePayload::PlayerLeave {
                peer_id: "x".into(),
                network_id: 3,
            },
        ));

        assert_eq!(conn.flush(Instant::now()).unwrap(), 1);
        assert_eq!(conn.queued(), 0);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (size, _) = receiver.recv_from(&mut buf).unwrap();
        let datagram = Datagram::deserialize(&buf[..size]).unwrap();
        let DatagramBody::Batch(messages) = datagram.body else {
            panic!("expected batch");
        };

        let priorities: Vec<Priority> = messages.iter().map(|m| m.priority).collect();
        assert_eq!(priorities, vec![Priority::Critical, Priority::Low, Priority::Low]);
        assert_eq!(messages[1].sequence_number, 1);
        assert_eq!(messages[2].sequence_number, 2);
    }

    #[test]
    fn test_closed_channel_keeps_nothing_on_flush() {
        let (mut conn, _rx) = loopback_pair();
        conn.state = ConnectionState::Closed;
        conn.enqueue(NetworkMessage::new(1, 0, MessagePayload::Ping { timestamp: 1 }));
        assert_eq!(conn.flush(Instant::now()).unwrap(), 0);
        assert_eq!(conn.queued(), 0);
    }
}
