use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use peerlink::net::{
    Datagram, DatagramBody, DatagramHeader, LeaveReason, MessagePayload, NetworkMessage,
    PeerConnection, PeerId, SignalingState, Transport, TransportConfig, TransportEvent,
};

fn test_config() -> TransportConfig {
    TransportConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        check_interval_ms: 20,
        batch_interval_ms: 1,
        ..Default::default()
    }
}

fn pump(
    a: &mut Transport,
    b: &mut Transport,
    events_a: &mut Vec<TransportEvent>,
    events_b: &mut Vec<TransportEvent>,
) {
    a.update();
    b.update();
    a.flush();
    b.flush();
    events_a.extend(a.drain_events());
    events_b.extend(b.drain_events());
}

fn wait_until(
    a: &mut Transport,
    b: &mut Transport,
    events_a: &mut Vec<TransportEvent>,
    events_b: &mut Vec<TransportEvent>,
    timeout_ms: u64,
    mut done: impl FnMut(&Transport, &Transport) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        pump(a, b, events_a, events_b);
        if done(a, b) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Runs offer/answer between two fresh transports and waits for both
/// channels to open. Returns the guest's id as assigned by the host.
fn connect(
    host: &mut Transport,
    guest: &mut Transport,
    host_events: &mut Vec<TransportEvent>,
    guest_events: &mut Vec<TransportEvent>,
) -> PeerId {
    let offer = host.create_offer().unwrap();
    let answer = guest.accept_offer(&offer).unwrap();
    let guest_id = host.complete_connection(&answer).unwrap();

    let connected = wait_until(host, guest, host_events, guest_events, 2000, |h, g| {
        h.open_peer_count() == 1 && g.open_peer_count() == 1
    });
    assert!(connected, "handshake did not complete");
    guest_id
}

#[test]
fn test_offer_answer_opens_channel() {
    let mut host = Transport::new(test_config());
    let mut guest = Transport::new(test_config());
    let (mut host_events, mut guest_events) = (Vec::new(), Vec::new());

    let guest_id = connect(&mut host, &mut guest, &mut host_events, &mut guest_events);

    assert!(host.is_host());
    assert!(!guest.is_host());
    assert_eq!(guest.local_peer_id(), &guest_id);
    assert!(host.is_peer_open(&guest_id));
    assert!(guest.is_peer_open(&PeerId::host()));
    assert_eq!(host.signaling_state(), SignalingState::Connected);
    assert_eq!(guest.signaling_state(), SignalingState::Connected);

    assert!(
        host_events
            .iter()
            .any(|e| matches!(e, TransportEvent::DataChannelReady(id) if *id == guest_id))
    );
    assert!(
        guest_events
            .iter()
            .any(|e| matches!(e, TransportEvent::DataChannelReady(id) if id.is_host_key()))
    );
}

#[test]
fn test_messages_flow_both_ways() {
    let mut host = Transport::new(test_config());
    let mut guest = Transport::new(test_config());
    let (mut host_events, mut guest_events) = (Vec::new(), Vec::new());
    let guest_id = connect(&mut host, &mut guest, &mut host_events, &mut guest_events);
    guest_events.clear();

    assert_eq!(
        host.send_message(MessagePayload::Chat {
            sender: "host".into(),
            text: "hi".into(),
        }),
        1
    );
    assert!(guest.send_message_to_peer(
        &PeerId::host(),
        MessagePayload::PlayerLeave {
            peer_id: "x".into(),
            network_id: 9,
        }
    ));

    let guest_got_chat = |events: &[TransportEvent]| {
        events.iter().any(|e| {
            matches!(e, TransportEvent::ChatReceived { sender, text, .. } if sender == "host" && text == "hi")
        })
    };
    let host_got_leave = |events: &[TransportEvent]| {
        events.iter().any(|e| match e {
            TransportEvent::MessageReceived { from, message } => {
                *from == guest_id
                    && matches!(
                        message.payload,
                        MessagePayload::PlayerLeave { network_id: 9, .. }
                    )
            }
            _ => false,
        })
    };

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(1000)
        && !(guest_got_chat(&guest_events) && host_got_leave(&host_events))
    {
        pump(&mut host, &mut guest, &mut host_events, &mut guest_events);
        thread::sleep(Duration::from_millis(2));
    }

    assert!(guest_got_chat(&guest_events));
    assert!(host_got_leave(&host_events));
}

#[test]
fn test_latency_from_ping_pong() {
    let config = TransportConfig {
        ping_interval_secs: 0.02,
        ..test_config()
    };
    let mut host = Transport::new(config.clone());
    let mut guest = Transport::new(config);
    let (mut host_events, mut guest_events) = (Vec::new(), Vec::new());
    let guest_id = connect(&mut host, &mut guest, &mut host_events, &mut guest_events);

    let measured = wait_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        2000,
        |h, _| h.latency_ms(&guest_id).is_some(),
    );

    assert!(measured);
    assert!(host.latency_ms(&guest_id).unwrap() >= 0.0);
}

#[test]
fn test_silent_peer_is_evicted_once() {
    let mut host = Transport::new(test_config());
    let mut guest = Transport::new(test_config());
    let (mut host_events, mut guest_events) = (Vec::new(), Vec::new());
    let guest_id = connect(&mut host, &mut guest, &mut host_events, &mut guest_events);

    host.update();
    host.drain_events().for_each(drop);

    let later = Instant::now() + Duration::from_secs(31);
    host.update_at(later);
    host.update_at(later + Duration::from_secs(1));
    let events: Vec<_> = host.drain_events().collect();

    let left: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TransportEvent::PeerLeft { peer_id, reason } => Some((peer_id.clone(), *reason)),
            _ => None,
        })
        .collect();
    assert_eq!(left, vec![(guest_id, LeaveReason::Timeout)]);
    assert_eq!(host.open_peer_count(), 0);
}

#[test]
fn test_graceful_disconnect_notifies_guest() {
    let mut host = Transport::new(test_config());
    let mut guest = Transport::new(test_config());
    let (mut host_events, mut guest_events) = (Vec::new(), Vec::new());
    connect(&mut host, &mut guest, &mut host_events, &mut guest_events);
    guest_events.clear();

    host.disconnect_all();

    let closed = wait_until(
        &mut host,
        &mut guest,
        &mut host_events,
        &mut guest_events,
        1000,
        |_, g| g.open_peer_count() == 0,
    );
    assert!(closed);
    assert!(guest_events.iter().any(|e| matches!(
        e,
        TransportEvent::PeerLeft { peer_id, reason: LeaveReason::Graceful } if peer_id.is_host_key()
    )));
}

#[test]
fn test_wrong_token_answer_is_rejected() {
    let mut host = Transport::new(test_config());
    let mut other = Transport::new(test_config());
    let mut guest = Transport::new(test_config());

    host.create_offer().unwrap();
    let foreign_offer = other.create_offer().unwrap();
    let answer = guest.accept_offer(&foreign_offer).unwrap();

    assert!(host.complete_connection(&answer).is_err());
    assert_eq!(host.signaling_state(), SignalingState::Failed);
    assert_eq!(host.peer_count(), 0);
}

#[test]
fn test_duplicate_datagrams_are_dropped() {
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target: SocketAddr = socket.local_addr().unwrap();

    let mut conn = PeerConnection::new(
        PeerId::new("dup"),
        socket,
        "token".into(),
        vec![sender.local_addr().unwrap()],
        true,
        Instant::now(),
    )
    .unwrap();

    let datagram = Datagram::new(
        DatagramHeader::new(7),
        DatagramBody::Batch(vec![NetworkMessage::new(
            1,
            0,
            MessagePayload::Ping { timestamp: 0 },
        )]),
    );
    let bytes = datagram.serialize().unwrap();
    sender.send_to(&bytes, target).unwrap();
    sender.send_to(&bytes, target).unwrap();

    let mut received = Vec::new();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(500) && conn.stats.duplicates == 0 {
        received.extend(conn.receive().unwrap());
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(received.len(), 1);
    assert_eq!(conn.stats.duplicates, 1);
}
