mod buffer;
mod component;
mod config;

pub use buffer::TimedBuffer;
pub use component::{NetworkComponent, ReconcileOutcome, UpdateOutcome};
pub use config::SyncConfig;
