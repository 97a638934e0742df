mod entity;
mod world;

pub use crate::net::EntitySnapshot;
pub use entity::{Entity, EntityHandle, EntityKind, Health, PlayerRole, Transform};
pub use world::World;
