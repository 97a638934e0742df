use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct PlayerDebugInfo {
    pub network_id: Option<u32>,
    pub name: String,
    pub is_local: bool,
    pub position: [f32; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerDebugInfo {
    pub peer_id: String,
    pub network_id: Option<u32>,
    pub latency_ms: Option<f32>,
}

/// Point-in-time view of the session for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDebugInfo {
    pub mode: &'static str,
    pub is_host: bool,
    pub connected: bool,
    pub session_id: Option<String>,
    pub local_peer_id: String,
    pub signaling: &'static str,
    pub entity_count: usize,
    pub players: Vec<PlayerDebugInfo>,
    pub peers: Vec<PeerDebugInfo>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl SessionDebugInfo {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}
