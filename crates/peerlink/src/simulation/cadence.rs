use std::time::Duration;

use super::movement::MAX_STEP_SECS;

/// Paces a periodic send (the 20 Hz delta broadcast) off variable frame
/// times. Several due periods in one frame collapse into a single send.
#[derive(Debug, Clone)]
pub struct SendCadence {
    rate_hz: u32,
    period: f32,
    elapsed: f32,
}

impl SendCadence {
    pub fn new(rate_hz: u32) -> Self {
        let rate_hz = rate_hz.max(1);
        Self {
            rate_hz,
            period: 1.0 / rate_hz as f32,
            elapsed: 0.0,
        }
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f32(self.period)
    }

    /// Adds a frame's duration and reports whether a send is due.
    pub fn advance(&mut self, frame_secs: f32) -> bool {
        self.elapsed += frame_secs.clamp(0.0, MAX_STEP_SECS);
        if self.elapsed < self.period {
            return false;
        }
        self.elapsed %= self.period;
        true
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twenty_hz_at_sixty_fps() {
        let mut cadence = SendCadence::new(20);
        let sends = (0..60).filter(|_| cadence.advance(1.0 / 60.0 + 1e-6)).count();
        assert_eq!(sends, 20);
    }

    #[test]
    fn test_backlog_collapses() {
        let mut cadence = SendCadence::new(20);
        assert!(cadence.advance(0.21));
        assert!(!cadence.advance(0.01));
    }

    #[test]
    fn test_reset_and_zero_rate() {
        let mut cadence = SendCadence::new(0);
        assert_eq!(cadence.rate_hz(), 1);
        assert!(!cadence.advance(0.24));
        cadence.reset();
        assert!(!cadence.advance(0.2));
        assert_eq!(cadence.interval(), Duration::from_secs(1));
    }
}
