use glam::{EulerRot, Quat, Vec3};

use crate::snapshot::Transform;

use super::input::{InputKeys, InputSnapshot};

const MAX_PITCH: f32 = 1.54;

/// Longest step a single input may integrate. Prediction and the host's
/// authoritative replay both clamp to this so they stay in agreement.
pub const MAX_STEP_SECS: f32 = 0.25;

/// Integrates one tick of input into a transform. Implemented by whatever
/// drives player motion; the session only calls through this seam.
pub trait MovementModel: Send {
    fn apply(&self, transform: &mut Transform, input: &InputSnapshot, dt: f32);
}

#[derive(Debug, Clone)]
pub struct KinematicMovement {
    pub walk_speed: f32,
    pub sprint_speed: f32,
    pub vertical_speed: f32,
}

impl Default for KinematicMovement {
    fn default() -> Self {
        Self {
            walk_speed: 5.0,
            sprint_speed: 8.0,
            vertical_speed: 4.0,
        }
    }
}

impl KinematicMovement {
    fn local_to_world_direction(local: Vec3, yaw: f32) -> Vec3 {
        if local.length_squared() < 0.001 {
            return Vec3::ZERO;
        }

        let normalized = local.normalize();
        let (sin_yaw, cos_yaw) = yaw.sin_cos();

        Vec3::new(
            normalized.x * cos_yaw + normalized.z * sin_yaw,
            0.0,
            -normalized.x * sin_yaw + normalized.z * cos_yaw,
        )
    }
}

impl MovementModel for KinematicMovement {
    fn apply(&self, transform: &mut Transform, input: &InputSnapshot, dt: f32) {
        let (yaw, pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
        let yaw = yaw - input.mouse.dx;
        let pitch = (-pitch - input.mouse.dy).clamp(-MAX_PITCH, MAX_PITCH);
        transform.rotation = Quat::from_euler(EulerRot::YXZ, yaw, -pitch, 0.0);

        let keys = input.keys;
        let mut local = Vec3::ZERO;
        if keys.contains(InputKeys::FORWARD) {
            local.z -= 1.0;
        }
        if keys.contains(InputKeys::BACKWARD) {
            local.z += 1.0;
        }
        if keys.contains(InputKeys::LEFT) {
            local.x -= 1.0;
        }
        if keys.contains(InputKeys::RIGHT) {
            local.x += 1.0;
        }

        let speed = if keys.contains(InputKeys::SPRINT) {
            self.sprint_speed
        } else {
            self.walk_speed
        };
        let mut velocity = Self::local_to_world_direction(local, yaw) * speed;

        if keys.contains(InputKeys::JUMP) {
            velocity.y += self.vertical_speed;
        }
        if keys.contains(InputKeys::CROUCH) {
            velocity.y -= self.vertical_speed;
        }

        transform.position += velocity * dt;
        transform.velocity = Some(velocity);
    }
}
