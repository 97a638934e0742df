use std::time::{Duration, Instant};

use crate::net::{FullGameState, sequence_greater_than};

/// Entities per FULL_GAME_STATE chunk. Keeps each chunk far below the
/// datagram budget whatever the world size.
pub const FULL_STATE_CHUNK_ENTITIES: usize = 64;

/// Splits one full state into chunks sharing `transfer_id`. An empty world
/// still produces a single chunk.
pub fn split_full_state(state: &FullGameState, transfer_id: u32) -> Vec<FullGameState> {
    let groups: Vec<_> = if state.entities.is_empty() {
        vec![Vec::new()]
    } else {
        state
            .entities
            .chunks(FULL_STATE_CHUNK_ENTITIES)
            .map(<[_]>::to_vec)
            .collect()
    };

    let chunk_count = groups.len() as u32;
    groups
        .into_iter()
        .enumerate()
        .map(|(index, entities)| FullGameState {
            session_id: state.session_id.clone(),
            host_peer_id: state.host_peer_id.clone(),
            entities,
            peers: state.peers.clone(),
            transfer_id,
            chunk_index: index as u32,
            chunk_count,
        })
        .collect()
}

/// Host bookkeeping for a guest that has not yet acknowledged its full
/// state. The guest's first PLAYER_JOIN is the acknowledgement.
#[derive(Debug, Clone, Copy)]
pub struct PendingOnboarding {
    pub transfer_id: u32,
    pub last_sent: Instant,
    pub attempts: u32,
}

impl PendingOnboarding {
    pub fn new(transfer_id: u32, now: Instant) -> Self {
        Self {
            transfer_id,
            last_sent: now,
            attempts: 1,
        }
    }

    pub fn resend_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_sent) >= interval
    }

    pub fn mark_sent(&mut self, transfer_id: u32, now: Instant) {
        self.transfer_id = transfer_id;
        self.last_sent = now;
        self.attempts += 1;
    }
}

/// Client-side reassembly of a chunked full state.
#[derive(Debug)]
pub struct FullStateAssembly {
    transfer_id: u32,
    chunks: Vec<Option<FullGameState>>,
    received: usize,
}

impl FullStateAssembly {
    fn new(transfer_id: u32, chunk_count: u32) -> Self {
        Self {
            transfer_id,
            chunks: vec![None; chunk_count as usize],
            received: 0,
        }
    }

    pub fn transfer_id(&self) -> u32 {
        self.transfer_id
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Feeds one chunk into `slot`, starting over when a newer transfer
    /// shows up. Returns the whole state once every chunk is in.
    pub fn accept(slot: &mut Option<Self>, chunk: FullGameState) -> Option<FullGameState> {
        if chunk.chunk_count == 0 || chunk.chunk_index >= chunk.chunk_count {
            log::warn!(
                "Malformed FULL_GAME_STATE chunk {}/{}",
                chunk.chunk_index,
                chunk.chunk_count
            );
            return None;
        }

        let restart = match slot.as_ref() {
            Some(current) if current.transfer_id == chunk.transfer_id => {
                if current.chunks.len() != chunk.chunk_count as usize {
                    log::warn!("Chunk count changed within transfer {}", chunk.transfer_id);
                    return None;
                }
                false
            }
            Some(current) if !sequence_greater_than(chunk.transfer_id, current.transfer_id) => {
                log::debug!("Ignoring chunk of superseded transfer {}", chunk.transfer_id);
                return None;
            }
            _ => true,
        };
        if restart {
            *slot = Some(Self::new(chunk.transfer_id, chunk.chunk_count));
        }

        let assembly = slot.as_mut()?;
        let index = chunk.chunk_index as usize;
        if assembly.chunks[index].is_none() {
            assembly.chunks[index] = Some(chunk);
            assembly.received += 1;
        }
        if assembly.received < assembly.chunks.len() {
            return None;
        }

        let mut parts = slot.take()?.chunks.into_iter().flatten();
        let mut state = parts.next()?;
        for part in parts {
            state.entities.extend(part.entities);
        }
        state.chunk_index = 0;
        state.chunk_count = 1;
        Some(state)
    }
}
