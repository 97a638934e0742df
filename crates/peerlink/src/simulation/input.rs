use bitflags::bitflags;

use crate::net::PlayerInputData;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputKeys: u16 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const JUMP = 1 << 4;
        const CROUCH = 1 << 5;
        const SPRINT = 1 << 6;
        const FIRE = 1 << 7;
    }
}

/// Accumulated mouse movement in radians since the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouseDelta {
    pub dx: f32,
    pub dy: f32,
}

/// Input polled once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSnapshot {
    pub keys: InputKeys,
    pub mouse: MouseDelta,
}

impl InputSnapshot {
    pub fn new(keys: InputKeys) -> Self {
        Self {
            keys,
            mouse: MouseDelta::default(),
        }
    }

    pub fn to_wire(&self, sequence: u32, dt: f32) -> PlayerInputData {
        PlayerInputData {
            sequence,
            keys: self.keys.bits(),
            mouse_dx: self.mouse.dx,
            mouse_dy: self.mouse.dy,
            dt,
        }
    }

    /// Unknown key bits are dropped.
    pub fn from_wire(data: &PlayerInputData) -> Self {
        Self {
            keys: InputKeys::from_bits_truncate(data.keys),
            mouse: MouseDelta {
                dx: data.mouse_dx,
                dy: data.mouse_dy,
            },
        }
    }
}
