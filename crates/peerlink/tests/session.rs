use std::thread;
use std::time::{Duration, Instant};

use peerlink::net::TransportConfig;
use peerlink::{
    Entity, EntityKind, InputKeys, InputSnapshot, NetworkId, Role, Session, SessionConfig,
    SessionMode,
};

fn test_config(name: &str) -> SessionConfig {
    SessionConfig {
        player_name: name.to_string(),
        transport: TransportConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            check_interval_ms: 20,
            batch_interval_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn run_with(
    host: &mut Session,
    guest: &mut Session,
    host_input: Option<InputSnapshot>,
    guest_input: Option<InputSnapshot>,
    timeout_ms: u64,
    mut done: impl FnMut(&Session, &Session) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        host.tick(host_input.as_ref());
        guest.tick(guest_input.as_ref());
        if done(host, guest) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn run_until(
    host: &mut Session,
    guest: &mut Session,
    guest_input: Option<InputSnapshot>,
    timeout_ms: u64,
    done: impl FnMut(&Session, &Session) -> bool,
) -> bool {
    run_with(host, guest, None, guest_input, timeout_ms, done)
}

fn player_position(session: &Session, network_id: NetworkId) -> Option<glam::Vec3> {
    session
        .world()
        .find_player(network_id)
        .and_then(|handle| session.world().get(handle))
        .map(Entity::position)
}

fn connect(host: &mut Session, guest: &mut Session) {
    let offer = host.host_invite().unwrap();
    let answer = guest.join(&offer).unwrap();
    host.complete_invite(&answer).unwrap();

    let joined = run_until(host, guest, None, 3000, |_, g| {
        g.mode() == SessionMode::Multiplayer(Role::Client) && !g.is_awaiting_full_state()
    });
    assert!(joined, "guest never received the full game state");
}

#[test]
fn test_host_invites_guest() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    let pre_invite = host.world().entity_count();

    connect(&mut host, &mut guest);

    assert!(host.is_multiplayer_host());
    assert!(host.is_multiplayer_connected());
    assert!(guest.is_multiplayer_connected());
    assert_eq!(host.transport().open_peer_count(), 1);
    assert_eq!(guest.transport().open_peer_count(), 1);

    assert_eq!(host.local_network_id(), Some(NetworkId::HOST));
    assert_eq!(guest.local_network_id(), Some(NetworkId::new(2)));
    assert_eq!(guest.world().entity_count(), pre_invite + 1);
    assert_eq!(host.world().entity_count(), pre_invite + 1);
    assert_eq!(guest.session_id(), host.session_id());

    let local = guest.local_entity().unwrap();
    assert_eq!(local.network_id(), Some(NetworkId::new(2)));
    assert!(local.player.as_ref().unwrap().is_local);
    assert!(guest.world().find_player(NetworkId::HOST).is_some());

    let debug = guest.debug_snapshot();
    assert_eq!(debug.mode, "client");
    assert_eq!(debug.players.len(), 2);
    assert_eq!(debug.players.iter().filter(|p| p.is_local).count(), 1);
}

#[test]
fn test_guest_name_reaches_host() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    connect(&mut host, &mut guest);

    let renamed = run_until(&mut host, &mut guest, None, 2000, |h, _| {
        h.world()
            .find_player(NetworkId::new(2))
            .and_then(|handle| h.world().get(handle))
            .and_then(|e| e.player.as_ref())
            .is_some_and(|p| p.name == "bob")
    });
    assert!(renamed);
}

#[test]
fn test_guest_input_moves_host_copy() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    connect(&mut host, &mut guest);

    let position_on_host = |h: &Session| {
        h.world()
            .find_player(NetworkId::new(2))
            .and_then(|handle| h.world().get(handle))
            .map(|e| e.position())
    };
    let start = position_on_host(&host).unwrap();

    let forward = InputSnapshot::new(InputKeys::FORWARD);
    let moved = run_until(&mut host, &mut guest, Some(forward), 3000, |h, _| {
        position_on_host(h).is_some_and(|p| p.distance(start) > 0.5)
    });
    assert!(moved);
}

#[test]
fn test_chat_is_delivered() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    connect(&mut host, &mut guest);

    guest.send_chat("hello host");
    let delivered = run_until(&mut host, &mut guest, None, 2000, |h, _| {
        h.chat_log()
            .iter()
            .any(|line| !line.local && line.sender == "bob" && line.text == "hello host")
    });
    assert!(delivered);
}

#[test]
fn test_host_disconnect_resets_guest() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    let pre_invite = host.world().entity_count();
    connect(&mut host, &mut guest);

    host.disconnect();
    assert_eq!(host.mode(), SessionMode::SinglePlayer);
    assert_eq!(host.world().entity_count(), pre_invite);

    let reset = run_until(&mut host, &mut guest, None, 2000, |_, g| {
        g.mode() == SessionMode::SinglePlayer
    });
    assert!(reset);
    assert!(!guest.is_multiplayer_connected());
    assert!(guest.directory().is_empty());
    assert_eq!(guest.world().entity_count(), pre_invite);
    assert!(guest.local_entity().is_some());
}

#[test]
fn test_guest_leaving_removes_avatar_on_host() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    let pre_invite = host.world().entity_count();
    connect(&mut host, &mut guest);

    guest.disconnect();

    let removed = run_until(&mut host, &mut guest, None, 2000, |h, _| {
        h.world().find_player(NetworkId::new(2)).is_none()
    });
    assert!(removed);
    assert!(host.is_multiplayer_host());
    assert_eq!(host.world().entity_count(), pre_invite);
    assert_eq!(host.directory().len(), 1);
}

#[test]
fn test_large_world_reaches_guest() {
    let mut host = Session::new(test_config("alice"));
    for _ in 0..1000 {
        host.world_mut().spawn(EntityKind::Prop);
    }
    let mut guest = Session::new(test_config("bob"));

    connect(&mut host, &mut guest);

    assert_eq!(guest.world().entity_count(), host.world().entity_count());
    assert_eq!(guest.local_network_id(), Some(NetworkId::new(2)));
    assert!(guest.last_connection_failure().is_none());
}

#[test]
fn test_guest_prediction_is_reconciled() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    connect(&mut host, &mut guest);
    let start = player_position(&host, NetworkId::new(2)).unwrap();

    let forward = InputSnapshot::new(InputKeys::FORWARD);
    run_until(&mut host, &mut guest, Some(forward), 1000, |_, _| false);
    assert!(player_position(&host, NetworkId::new(2)).unwrap().distance(start) > 0.5);

    // Once idle, acknowledged predictions are dropped and both sides agree.
    let settled = run_until(&mut host, &mut guest, None, 2000, |h, g| {
        let Some(local) = g.local_entity() else {
            return false;
        };
        let pending = local.net.as_ref().map_or(usize::MAX, |n| n.prediction_count());
        pending < 10
            && player_position(h, NetworkId::new(2))
                .is_some_and(|p| p.distance(local.position()) < 0.1)
    });
    assert!(settled);
}

#[test]
fn test_guest_smooths_host_avatar() {
    let mut host = Session::new(test_config("alice"));
    let mut guest = Session::new(test_config("bob"));
    connect(&mut host, &mut guest);
    let start = player_position(&guest, NetworkId::HOST).unwrap();

    let forward = InputSnapshot::new(InputKeys::FORWARD);
    let followed = run_with(&mut host, &mut guest, Some(forward), None, 3000, |h, g| {
        let (Some(actual), Some(seen)) = (
            player_position(h, NetworkId::HOST),
            player_position(g, NetworkId::HOST),
        ) else {
            return false;
        };
        seen.distance(start) > 1.0 && seen.distance(actual) < 1.5
    });
    assert!(followed);

    let avatar = guest
        .world()
        .find_player(NetworkId::HOST)
        .and_then(|handle| guest.world().get(handle))
        .unwrap();
    let net = avatar.net.as_ref().unwrap();
    assert!(!net.is_locally_controlled());
    assert!(net.latest_timestamp().is_some());
    assert!(net.snapshot_count() > 0);
}
