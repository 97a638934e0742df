use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address each connection socket binds to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Addresses advertised as host candidates when binding to 0.0.0.0.
    pub candidate_hosts: Vec<IpAddr>,
    pub batch_interval_ms: u64,
    pub peer_timeout_secs: u64,
    pub signaling_timeout_secs: u64,
    pub ping_interval_secs: f32,
    pub check_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            candidate_hosts: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            batch_interval_ms: 16,
            peer_timeout_secs: 30,
            signaling_timeout_secs: 30,
            ping_interval_secs: 1.0,
            check_interval_ms: 250,
        }
    }
}

impl TransportConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_secs(self.signaling_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f32(self.ping_interval_secs.max(0.01))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}
