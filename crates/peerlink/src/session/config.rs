use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::TransportConfig;
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_rate: u32,
    pub broadcast_rate_hz: u32,
    pub player_name: String,
    /// Used when the world has no spawn markers.
    pub fallback_spawn: [f32; 3],
    /// A joining client gives up if the host's full state has not arrived
    /// by then.
    pub full_state_timeout_secs: u64,
    /// Host resends an unacknowledged full state at this interval.
    pub full_state_resend_ms: u64,
    pub transport: TransportConfig,
    pub sync: SyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            broadcast_rate_hz: 20,
            player_name: "player".to_string(),
            fallback_spawn: [0.0, 10.0, 0.0],
            full_state_timeout_secs: 10,
            full_state_resend_ms: 1000,
            transport: TransportConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn full_state_timeout(&self) -> Duration {
        Duration::from_secs(self.full_state_timeout_secs)
    }

    pub fn full_state_resend(&self) -> Duration {
        Duration::from_millis(self.full_state_resend_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json(
            r#"{ "player_name": "alice", "transport": { "peer_timeout_secs": 10 } }"#,
        )
        .unwrap();

        assert_eq!(config.player_name, "alice");
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.full_state_timeout(), Duration::from_secs(10));
        assert_eq!(config.transport.peer_timeout_secs, 10);
        assert_eq!(config.transport.batch_interval_ms, 16);
        assert!(config.sync.interpolation_enabled);
    }
}
