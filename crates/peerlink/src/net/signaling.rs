//! Copy-paste signaling: a JSON blob carrying an SDP-style description and
//! the host candidates the sender is reachable on.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

const SESSION_NAME: &str = "peerlink";
const MEDIA_LINE: &str = "m=application 9 UDP/DTLS/SCTP webrtc-datachannel";
const HOST_CANDIDATE_PRIORITY: u32 = 2_130_706_431;

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("invalid signaling JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {expected:?} blob, got {actual:?}")]
    WrongType {
        expected: SignalType,
        actual: SignalType,
    },
    #[error("malformed session description: {0}")]
    MalformedSdp(String),
    #[error("malformed candidate: {0}")]
    MalformedCandidate(String),
    #[error("no usable candidate in blob")]
    NoUsableCandidate,
    #[error("ICE token does not match the pending offer")]
    TokenMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupRole {
    ActPass,
    Active,
}

impl SetupRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::ActPass => "actpass",
            Self::Active => "active",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: Option<u16>,
    pub sdp_mid: Option<String>,
}

impl IceCandidate {
    pub fn host(foundation: u32, addr: SocketAddr) -> Self {
        Self {
            candidate: format!(
                "candidate:{} 1 udp {} {} {} typ host",
                foundation,
                HOST_CANDIDATE_PRIORITY - foundation,
                addr.ip(),
                addr.port()
            ),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".to_string()),
        }
    }

    /// Transport address encoded in the candidate line.
    pub fn address(&self) -> Result<SocketAddr, SignalingError> {
        let malformed = || SignalingError::MalformedCandidate(self.candidate.clone());
        let tokens: Vec<&str> = self.candidate.split_whitespace().collect();

        if tokens.len() < 8 || !tokens[0].starts_with("candidate:") {
            return Err(malformed());
        }
        if !tokens[2].eq_ignore_ascii_case("udp") {
            return Err(malformed());
        }

        let ip: IpAddr = tokens[4].parse().map_err(|_| malformed())?;
        let port: u16 = tokens[5].parse().map_err(|_| malformed())?;
        Ok(SocketAddr::new(ip, port))
    }
}

/// One candidate per reachable address on the bound port. An unspecified
/// bind address is expanded to the configured hosts.
pub fn gather_candidates(local_addr: SocketAddr, hosts: &[IpAddr]) -> Vec<IceCandidate> {
    let ips: Vec<IpAddr> = if local_addr.ip().is_unspecified() {
        hosts.to_vec()
    } else {
        vec![local_addr.ip()]
    };

    ips.into_iter()
        .enumerate()
        .map(|(i, ip)| IceCandidate::host(i as u32 + 1, SocketAddr::new(ip, local_addr.port())))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub peer_id: String,
    pub session_version: u64,
    pub ice_token: String,
    pub setup: SetupRole,
}

impl SessionDescription {
    pub fn to_sdp(&self) -> String {
        format!(
            "v=0\r\no={} {} IN IP4 0.0.0.0\r\ns={}\r\nt=0 0\r\na=ice-ufrag:{}\r\na=setup:{}\r\n{}\r\n",
            self.peer_id,
            self.session_version,
            SESSION_NAME,
            self.ice_token,
            self.setup.as_str(),
            MEDIA_LINE
        )
    }

    pub fn parse(sdp: &str) -> Result<Self, SignalingError> {
        let mut version_seen = false;
        let mut origin = None;
        let mut ice_token = None;
        let mut setup = None;
        let mut media_seen = false;

        for line in sdp.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line == "v=0" {
                version_seen = true;
            } else if let Some(rest) = line.strip_prefix("o=") {
                let mut fields = rest.split_whitespace();
                let peer_id = fields.next().map(str::to_string);
                let version = fields.next().and_then(|v| v.parse::<u64>().ok());
                origin = peer_id.zip(version);
            } else if let Some(token) = line.strip_prefix("a=ice-ufrag:") {
                ice_token = Some(token.to_string());
            } else if let Some(role) = line.strip_prefix("a=setup:") {
                setup = match role {
                    "actpass" => Some(SetupRole::ActPass),
                    "active" => Some(SetupRole::Active),
                    other => {
                        return Err(SignalingError::MalformedSdp(format!(
                            "unknown setup role {other}"
                        )));
                    }
                };
            } else if line.starts_with("m=application") {
                media_seen = true;
            }
        }

        if !version_seen {
            return Err(SignalingError::MalformedSdp("missing v=0".into()));
        }
        if !media_seen {
            return Err(SignalingError::MalformedSdp(
                "missing data channel media section".into(),
            ));
        }
        let (peer_id, session_version) =
            origin.ok_or_else(|| SignalingError::MalformedSdp("missing origin line".into()))?;
        let ice_token = ice_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SignalingError::MalformedSdp("missing ice-ufrag".into()))?;
        let setup = setup.ok_or_else(|| SignalingError::MalformedSdp("missing setup".into()))?;

        Ok(Self {
            peer_id,
            session_version,
            ice_token,
            setup,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingBlob {
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub sdp: String,
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
}

impl SignalingBlob {
    pub fn new(kind: SignalType, description: &SessionDescription, candidates: Vec<IceCandidate>) -> Self {
        Self {
            kind,
            sdp: description.to_sdp(),
            candidates,
        }
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a pasted blob and checks it is of the `expected` kind.
    pub fn from_json(json: &str, expected: SignalType) -> Result<Self, SignalingError> {
        let blob: SignalingBlob = serde_json::from_str(json.trim())?;
        if blob.kind != expected {
            return Err(SignalingError::WrongType {
                expected,
                actual: blob.kind,
            });
        }
        Ok(blob)
    }

    pub fn description(&self) -> Result<SessionDescription, SignalingError> {
        SessionDescription::parse(&self.sdp)
    }

    /// Remote candidate addresses; malformed entries are skipped.
    pub fn candidate_addrs(&self) -> Result<Vec<SocketAddr>, SignalingError> {
        let addrs: Vec<SocketAddr> = self
            .candidates
            .iter()
            .filter_map(|c| match c.address() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    log::warn!("Skipping candidate: {}", e);
                    None
                }
            })
            .collect();

        if addrs.is_empty() {
            return Err(SignalingError::NoUsableCandidate);
        }
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description() -> SessionDescription {
        SessionDescription {
            peer_id: "9f2c11aa".to_string(),
            session_version: 42,
            ice_token: "c0ffee".to_string(),
            setup: SetupRole::ActPass,
        }
    }

    #[test]
    fn test_blob_round_trip() {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let blob = SignalingBlob::new(
            SignalType::Offer,
            &description(),
            vec![IceCandidate::host(1, addr)],
        );

        let json = blob.to_json().unwrap();
        assert!(json.contains("\"type\":\"offer\""));
        assert!(json.contains("sdpMLineIndex"));

        let parsed = SignalingBlob::from_json(&json, SignalType::Offer).unwrap();
        assert_eq!(parsed, blob);
        assert_eq!(parsed.description().unwrap(), description());
        assert_eq!(parsed.candidate_addrs().unwrap(), vec![addr]);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let blob = SignalingBlob::new(SignalType::Answer, &description(), Vec::new());
        let json = blob.to_json().unwrap();
        assert!(matches!(
            SignalingBlob::from_json(&json, SignalType::Offer),
            Err(SignalingError::WrongType { .. })
        ));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(matches!(
            SignalingBlob::from_json("{not json", SignalType::Offer),
            Err(SignalingError::Json(_))
        ));
        assert!(SessionDescription::parse("v=0\r\ns=peerlink\r\n").is_err());

        let bad = IceCandidate {
            candidate: "candidate:1 1 udp 1 not-an-ip 9 typ host".to_string(),
            sdp_m_line_index: None,
            sdp_mid: None,
        };
        assert!(bad.address().is_err());

        let blob = SignalingBlob {
            kind: SignalType::Offer,
            sdp: description().to_sdp(),
            candidates: vec![bad],
        };
        assert!(matches!(
            blob.candidate_addrs(),
            Err(SignalingError::NoUsableCandidate)
        ));
    }

    #[test]
    fn test_unspecified_bind_expands_to_hosts() {
        let local: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        let hosts: Vec<IpAddr> = vec!["127.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];

        let candidates = gather_candidates(local, &hosts);
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[1].address().unwrap(),
            "10.0.0.2:5000".parse::<SocketAddr>().unwrap()
        );
    }
}
