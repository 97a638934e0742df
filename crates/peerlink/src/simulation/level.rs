use glam::{Quat, Vec3};

use crate::snapshot::{EntityHandle, EntityKind, Health, PlayerRole, World};

/// Builds a fresh single-player world and returns the local player.
pub trait Level: Send {
    fn build(&self, world: &mut World, player_name: &str) -> EntityHandle;
}

/// Flat arena with a spawn marker in each quadrant and a few props.
#[derive(Debug, Clone)]
pub struct ArenaLevel {
    pub spawn_radius: f32,
    pub prop_count: u32,
}

impl Default for ArenaLevel {
    fn default() -> Self {
        Self {
            spawn_radius: 12.0,
            prop_count: 6,
        }
    }
}

impl ArenaLevel {
    const GROUND_Y: f32 = 0.0;
    const SPAWN_HEIGHT: f32 = 1.0;
    const PROP_MODEL_BASE: u32 = 100;

    fn add_ground(world: &mut World) {
        let ground = world.spawn(EntityKind::Static);
        if let Some(entity) = world.get_mut(ground) {
            entity.transform.position = Vec3::new(0.0, Self::GROUND_Y, 0.0);
            entity.model_id = Some(1);
        }
    }

    fn add_spawn_markers(&self, world: &mut World) {
        let r = self.spawn_radius;
        for (x, z) in [(r, r), (-r, r), (-r, -r), (r, -r)] {
            let marker = world.spawn(EntityKind::SpawnMarker);
            if let Some(entity) = world.get_mut(marker) {
                entity.transform.position = Vec3::new(x, Self::GROUND_Y + Self::SPAWN_HEIGHT, z);
                entity.transform.rotation = Quat::from_rotation_y(x.atan2(z));
            }
        }
    }

    fn add_props(&self, world: &mut World) {
        for i in 0..self.prop_count {
            let angle = i as f32 / self.prop_count.max(1) as f32 * std::f32::consts::TAU;
            let prop = world.spawn(EntityKind::Prop);
            if let Some(entity) = world.get_mut(prop) {
                entity.transform.position =
                    Vec3::new(angle.cos() * 6.0, Self::GROUND_Y + 0.5, angle.sin() * 6.0);
                entity.transform.velocity = Some(Vec3::ZERO);
                entity.model_id = Some(Self::PROP_MODEL_BASE + i % 3);
                entity.health = Some(Health::full(50.0));
            }
        }
    }
}

impl Level for ArenaLevel {
    fn build(&self, world: &mut World, player_name: &str) -> EntityHandle {
        Self::add_ground(world);
        self.add_spawn_markers(world);
        self.add_props(world);

        world.spawn_player(
            Vec3::new(0.0, Self::GROUND_Y + Self::SPAWN_HEIGHT, 0.0),
            PlayerRole::local(player_name),
        )
    }
}
