use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::net::{EntityDelta, EntitySnapshot, HealthSnapshot, PeerId, PlayerSnapshot};
use crate::session::NetworkId;
use crate::sync::NetworkComponent;

const DEFAULT_PLAYER_HEIGHT: f32 = 1.8;
const HEAD_OFFSET: Vec3 = Vec3::new(0.0, 1.6, 0.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Player = 0,
    Prop = 1,
    SpawnMarker = 2,
    Static = 3,
    Projectile = 4,
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Player,
            1 => Self::Prop,
            2 => Self::SpawnMarker,
            4 => Self::Projectile,
            _ => Self::Static,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u32);

impl EntityHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Option<Vec3>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: None,
        }
    }
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_delta(delta: &EntityDelta) -> Self {
        let [x, y, z, w] = delta.rotation;
        Self {
            position: Vec3::from(delta.position),
            rotation: Quat::from_xyzw(x, y, z, w).normalize(),
            velocity: delta.velocity.map(Vec3::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }
}

/// Present on entities that represent a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRole {
    pub name: String,
    pub peer_id: Option<PeerId>,
    pub network_id: Option<NetworkId>,
    pub head_position: Vec3,
    pub head_rotation: Quat,
    pub height: f32,
    pub is_local: bool,
}

impl PlayerRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            peer_id: None,
            network_id: None,
            head_position: HEAD_OFFSET,
            head_rotation: Quat::IDENTITY,
            height: DEFAULT_PLAYER_HEIGHT,
            is_local: false,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self {
            is_local: true,
            ..Self::new(name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u32,
    pub kind: EntityKind,
    pub transform: Transform,
    pub model_id: Option<u32>,
    pub frame: Option<u32>,
    pub health: Option<Health>,
    pub spawn_marker: bool,
    pub player: Option<PlayerRole>,
    pub net: Option<NetworkComponent>,
}

impl Entity {
    pub fn new(id: u32, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            transform: Transform::default(),
            model_id: None,
            frame: None,
            health: None,
            spawn_marker: kind == EntityKind::SpawnMarker,
            player: None,
            net: None,
        }
    }

    pub fn player(id: u32, spawn_position: Vec3, role: PlayerRole) -> Self {
        Self {
            transform: Transform {
                velocity: Some(Vec3::ZERO),
                ..Transform::at(spawn_position)
            },
            health: Some(Health::full(100.0)),
            player: Some(role),
            ..Self::new(id, EntityKind::Player)
        }
    }

    pub fn handle(&self) -> EntityHandle {
        EntityHandle(self.id)
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.transform.velocity.unwrap_or(Vec3::ZERO)
    }

    pub fn is_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn network_id(&self) -> Option<NetworkId> {
        self.player.as_ref().and_then(|p| p.network_id)
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.player.as_ref().and_then(|p| p.peer_id.as_ref())
    }

    /// Aim origin for players, scaled by their height.
    pub fn chest_position(&self) -> Vec3 {
        let height = self
            .player
            .as_ref()
            .map_or(DEFAULT_PLAYER_HEIGHT, |p| p.height);
        self.transform.position + Vec3::Y * height * 0.7
    }

    pub fn to_snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: self.id,
            kind: self.kind as u8,
            position: self.transform.position.to_array(),
            rotation: self.transform.rotation.to_array(),
            velocity: self.transform.velocity.map(|v| v.to_array()),
            model_id: self.model_id,
            frame: self.frame,
            health: self.health.map(|h| HealthSnapshot {
                current: h.current,
                max: h.max,
            }),
            spawn_marker: self.spawn_marker,
            player: self.player.as_ref().map(|p| PlayerSnapshot {
                name: p.name.clone(),
                peer_id: p.peer_id.as_ref().map(|id| id.to_string()),
                network_id: p.network_id.map(NetworkId::get),
                head_position: p.head_position.to_array(),
                head_rotation: p.head_rotation.to_array(),
            }),
        }
    }

    pub fn to_delta(&self) -> EntityDelta {
        EntityDelta {
            entity_id: self.id,
            position: self.transform.position.to_array(),
            rotation: self.transform.rotation.to_array(),
            velocity: self.transform.velocity.map(|v| v.to_array()),
            model_id: self.model_id,
            frame: self.frame,
            head_position: self.player.as_ref().map(|p| p.head_position.to_array()),
            head_rotation: self.player.as_ref().map(|p| p.head_rotation.to_array()),
        }
    }

    /// Applies model, frame and head pose. Movement fields are left alone.
    pub fn apply_cosmetics(&mut self, delta: &EntityDelta) {
        if delta.model_id.is_some() {
            self.model_id = delta.model_id;
        }
        if delta.frame.is_some() {
            self.frame = delta.frame;
        }
        if let Some(player) = self.player.as_mut() {
            if let Some(head) = delta.head_position {
                player.head_position = Vec3::from(head);
            }
            if let Some([x, y, z, w]) = delta.head_rotation {
                player.head_rotation = Quat::from_xyzw(x, y, z, w);
            }
        }
    }

    /// Rebuilds an entity from the wire. Locality is decided by the caller.
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        let [x, y, z, w] = snapshot.rotation;

        Self {
            id: snapshot.entity_id,
            kind: EntityKind::from(snapshot.kind),
            transform: Transform {
                position: Vec3::from(snapshot.position),
                rotation: Quat::from_xyzw(x, y, z, w).normalize(),
                velocity: snapshot.velocity.map(Vec3::from),
            },
            model_id: snapshot.model_id,
            frame: snapshot.frame,
            health: snapshot.health.map(|h| Health {
                current: h.current,
                max: h.max,
            }),
            spawn_marker: snapshot.spawn_marker,
            player: snapshot.player.as_ref().map(|p| {
                let [hx, hy, hz, hw] = p.head_rotation;
                PlayerRole {
                    name: p.name.clone(),
                    peer_id: p.peer_id.as_deref().map(PeerId::from),
                    network_id: p.network_id.map(NetworkId::new),
                    head_position: Vec3::from(p.head_position),
                    head_rotation: Quat::from_xyzw(hx, hy, hz, hw),
                    height: DEFAULT_PLAYER_HEIGHT,
                    is_local: false,
                }
            }),
            net: None,
        }
    }
}
