mod cadence;
mod input;
mod level;
mod movement;

pub use cadence::SendCadence;
pub use input::{InputKeys, InputSnapshot, MouseDelta};
pub use level::{ArenaLevel, Level};
pub use movement::{KinematicMovement, MAX_STEP_SECS, MovementModel};
