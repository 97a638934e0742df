use std::collections::HashMap;

use glam::Vec3;

use crate::net::EntitySnapshot;
use crate::session::NetworkId;

use super::entity::{Entity, EntityHandle, EntityKind, PlayerRole};

#[derive(Debug)]
pub struct World {
    entities: HashMap<u32, Entity>,
    next_entity_id: u32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_entity_id: 1,
        }
    }

    pub fn spawn(&mut self, kind: EntityKind) -> EntityHandle {
        let id = self.allocate_id();
        self.entities.insert(id, Entity::new(id, kind));
        EntityHandle(id)
    }

    pub fn spawn_player(&mut self, spawn_position: Vec3, role: PlayerRole) -> EntityHandle {
        let id = self.allocate_id();
        self.entities
            .insert(id, Entity::player(id, spawn_position, role));
        EntityHandle(id)
    }

    /// Inserts an entity under its own id, replacing any entity with that id.
    pub fn insert(&mut self, entity: Entity) -> EntityHandle {
        let id = entity.id;
        if id >= self.next_entity_id {
            self.next_entity_id = id + 1;
        }
        self.entities.insert(id, entity);
        EntityHandle(id)
    }

    pub fn despawn(&mut self, handle: EntityHandle) -> Option<Entity> {
        self.entities.remove(&handle.0)
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(&handle.0)
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(&handle.0)
    }

    pub fn get_by_id(&self, id: u32) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_by_id_mut(&mut self, id: u32) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.next_entity_id = 1;
    }

    /// Every entity, ordered by id.
    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        let mut snapshots: Vec<EntitySnapshot> =
            self.entities.values().map(Entity::to_snapshot).collect();
        snapshots.sort_by_key(|s| s.entity_id);
        snapshots
    }

    pub fn spawn_points(&self) -> Vec<Vec3> {
        let mut markers: Vec<&Entity> = self.entities.values().filter(|e| e.spawn_marker).collect();
        markers.sort_by_key(|e| e.id);
        markers.into_iter().map(|e| e.transform.position).collect()
    }

    pub fn find_player(&self, network_id: NetworkId) -> Option<EntityHandle> {
        self.entities
            .values()
            .find(|e| e.network_id() == Some(network_id))
            .map(Entity::handle)
    }

    pub fn local_player(&self) -> Option<EntityHandle> {
        self.entities
            .values()
            .find(|e| e.player.as_ref().is_some_and(|p| p.is_local))
            .map(Entity::handle)
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }
}
