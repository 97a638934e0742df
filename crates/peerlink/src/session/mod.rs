mod config;
mod debug;
mod directory;
mod handlers;
mod onboarding;
mod orchestrator;

pub use config::SessionConfig;
pub use debug::{PeerDebugInfo, PlayerDebugInfo, SessionDebugInfo};
pub use directory::{DirectoryError, NetworkId, PeerDirectory};
pub use orchestrator::{ChatLine, Role, Session, SessionMode};
