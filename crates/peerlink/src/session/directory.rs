use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::{PeerId, PeerMapping};

/// Host-assigned, session-stable participant number. The host is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(u32);

impl NetworkId {
    pub const HOST: NetworkId = NetworkId(1);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("peer {0} is already mapped to {1}")]
    PeerTaken(PeerId, NetworkId),
    #[error("{0} is already mapped to peer {1}")]
    NetworkIdTaken(NetworkId, PeerId),
}

/// Bidirectional PeerId <-> NetworkId map. Each side maps to exactly one
/// entry on the other.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    by_peer: HashMap<PeerId, NetworkId>,
    by_network: HashMap<NetworkId, PeerId>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer_id: PeerId, network_id: NetworkId) -> Result<(), DirectoryError> {
        if let Some(&existing) = self.by_peer.get(&peer_id) {
            if existing == network_id {
                return Ok(());
            }
            return Err(DirectoryError::PeerTaken(peer_id, existing));
        }
        if let Some(existing) = self.by_network.get(&network_id) {
            return Err(DirectoryError::NetworkIdTaken(network_id, existing.clone()));
        }

        self.by_network.insert(network_id, peer_id.clone());
        self.by_peer.insert(peer_id, network_id);
        Ok(())
    }

    pub fn network_id(&self, peer_id: &PeerId) -> Option<NetworkId> {
        self.by_peer.get(peer_id).copied()
    }

    pub fn peer_id(&self, network_id: NetworkId) -> Option<&PeerId> {
        self.by_network.get(&network_id)
    }

    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<NetworkId> {
        let network_id = self.by_peer.remove(peer_id)?;
        self.by_network.remove(&network_id);
        Some(network_id)
    }

    pub fn clear(&mut self) {
        self.by_peer.clear();
        self.by_network.clear();
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, NetworkId)> {
        self.by_peer.iter().map(|(peer, &id)| (peer, id))
    }

    /// Wire form, ordered by NetworkId.
    pub fn to_mappings(&self) -> Vec<PeerMapping> {
        let mut mappings: Vec<PeerMapping> = self
            .by_peer
            .iter()
            .map(|(peer_id, network_id)| PeerMapping {
                peer_id: peer_id.to_string(),
                network_id: network_id.get(),
            })
            .collect();
        mappings.sort_by_key(|m| m.network_id);
        mappings
    }

    /// Rebuilds from the wire. Entries that would break the 1:1 property are
    /// skipped with a warning.
    pub fn from_mappings(mappings: &[PeerMapping]) -> Self {
        let mut directory = Self::new();
        for mapping in mappings {
            let peer_id = PeerId::new(mapping.peer_id.as_str());
            if let Err(e) = directory.insert(peer_id, NetworkId::new(mapping.network_id)) {
                log::warn!("Skipping inconsistent mapping: {}", e);
            }
        }
        directory
    }
}
