use std::collections::VecDeque;

use super::protocol::sequence_greater_than;

/// Smoothed round-trip estimate fed from Ping/Pong samples.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: f32,
    rtt_var: f32,
    samples: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: 0.0,
            rtt_var: 0.0,
            samples: 0,
        }
    }

    pub fn record(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if self.samples == 0 {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
        } else {
            let diff = (rtt - self.srtt).abs();
            self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
            self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
        }
        self.samples = self.samples.saturating_add(1);
    }

    pub fn srtt(&self) -> Option<f32> {
        (self.samples > 0).then_some(self.srtt)
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }
}

/// Remembers recently seen datagram sequences so exact duplicates are dropped.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: Option<u32>,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: None,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    /// Returns false if `sequence` was already seen.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        match self.last_received {
            Some(last) if !sequence_greater_than(sequence, last) => {}
            _ => self.last_received = Some(sequence),
        }

        true
    }

    pub fn last_received(&self) -> Option<u32> {
        self.last_received
    }
}
