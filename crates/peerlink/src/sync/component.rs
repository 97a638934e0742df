use glam::Quat;

use crate::net::sequence_greater_than;
use crate::session::NetworkId;
use crate::snapshot::Transform;

use super::buffer::TimedBuffer;
use super::config::SyncConfig;

#[derive(Debug, Clone, Copy)]
struct Prediction {
    sequence: u32,
    transform: Transform,
}

#[derive(Debug, Clone, Copy)]
struct Blend {
    from: Transform,
    to: Transform,
    start_ms: f64,
    duration_ms: f64,
}

impl Blend {
    fn progress(&self, now_ms: f64) -> f32 {
        if self.duration_ms <= 0.0 {
            return 1.0;
        }
        ((now_ms - self.start_ms) / self.duration_ms).clamp(0.0, 1.0) as f32
    }

    fn sample(&self, t: f32) -> Transform {
        Transform {
            position: self.from.position.lerp(self.to.position, smoothstep(t)),
            rotation: slerp_shortest(self.from.rotation, self.to.rotation, t),
            velocity: match (self.from.velocity, self.to.velocity) {
                (Some(a), Some(b)) => Some(a.lerp(b, t)),
                (_, to) => to,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// Older than the last applied update; ignored.
    Stale,
    Snapped,
    Teleported,
    Blending { duration_ms: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// No saved prediction for the sequence (never saved or already pruned).
    Unknown,
    WithinTolerance { error: f32 },
    Corrected { error: f32 },
}

/// Per-entity sync state: remote smoothing for entities driven by someone
/// else, prediction history for the one this process controls.
#[derive(Debug, Clone)]
pub struct NetworkComponent {
    config: SyncConfig,
    owner: Option<NetworkId>,
    locally_controlled: bool,
    snapshots: TimedBuffer<Transform>,
    predictions: TimedBuffer<Prediction>,
    blend: Option<Blend>,
    last_update_ms: Option<f64>,
    last_timestamp: Option<u64>,
}

impl NetworkComponent {
    pub fn new(config: SyncConfig, owner: Option<NetworkId>, locally_controlled: bool) -> Self {
        Self {
            config,
            owner,
            locally_controlled,
            snapshots: TimedBuffer::new(),
            predictions: TimedBuffer::new(),
            blend: None,
            last_update_ms: None,
            last_timestamp: None,
        }
    }

    pub fn owner(&self) -> Option<NetworkId> {
        self.owner
    }

    pub fn is_locally_controlled(&self) -> bool {
        self.locally_controlled
    }

    pub fn set_locally_controlled(&mut self, locally_controlled: bool) {
        self.locally_controlled = locally_controlled;
        if locally_controlled {
            self.blend = None;
        }
    }

    pub fn is_interpolating(&self) -> bool {
        self.blend.is_some()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn prediction_count(&self) -> usize {
        self.predictions.len()
    }

    pub fn latest_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }

    /// Applies a remote pose to `transform`. Last write wins by the sender's
    /// timestamp; authoritative updates and teleports snap, everything else
    /// starts a blend from the current pose.
    pub fn apply_remote_update(
        &mut self,
        transform: &mut Transform,
        target: Transform,
        timestamp: u64,
        authoritative: bool,
        now_ms: f64,
    ) -> UpdateOutcome {
        if self.last_timestamp.is_some_and(|last| timestamp < last) {
            log::debug!("Dropping stale update (ts {})", timestamp);
            return UpdateOutcome::Stale;
        }

        self.snapshots.push(now_ms, target);
        self.snapshots
            .prune(now_ms, self.config.snapshot_retention_ms);

        self.last_timestamp = Some(timestamp);
        self.last_update_ms = Some(now_ms);

        if authoritative || !self.config.interpolation_enabled {
            self.blend = None;
            *transform = target;
            return UpdateOutcome::Snapped;
        }

        let distance = transform.position.distance(target.position);
        if distance > self.config.teleport_threshold {
            self.blend = None;
            *transform = target;
            return UpdateOutcome::Teleported;
        }

        let duration_ms = (distance as f64 * self.config.blend_ms_per_unit)
            .clamp(self.config.min_blend_ms, self.config.max_blend_ms);
        self.blend = Some(Blend {
            from: *transform,
            to: target,
            start_ms: now_ms,
            duration_ms,
        });

        UpdateOutcome::Blending { duration_ms }
    }

    /// Advances the blend or extrapolates, then prunes both buffers.
    pub fn update(&mut self, transform: &mut Transform, now_ms: f64) {
        if let Some(blend) = self.blend {
            let t = blend.progress(now_ms);
            if t >= 1.0 {
                *transform = blend.to;
                self.blend = None;
            } else {
                *transform = blend.sample(t);
            }
        } else if !self.locally_controlled {
            self.extrapolate(transform, now_ms);
        }

        self.prune(now_ms);
    }

    fn extrapolate(&self, transform: &mut Transform, now_ms: f64) {
        let (Some(last_update), Some((_, latest))) = (self.last_update_ms, self.snapshots.latest())
        else {
            return;
        };
        let Some(velocity) = latest.velocity else {
            return;
        };

        let elapsed_ms = now_ms - last_update;
        if elapsed_ms <= 0.0 || elapsed_ms > self.config.max_extrapolation_ms {
            return;
        }

        transform.position = latest.position + velocity * (elapsed_ms / 1000.0) as f32;
    }

    pub fn prune(&mut self, now_ms: f64) {
        self.snapshots
            .prune(now_ms, self.config.snapshot_retention_ms);
        self.predictions
            .prune(now_ms, self.config.prediction_retention_ms);
    }

    pub fn save_prediction(&mut self, sequence: u32, transform: &Transform, now_ms: f64) {
        self.predictions.push(
            now_ms,
            Prediction {
                sequence,
                transform: *transform,
            },
        );
        self.predictions
            .prune(now_ms, self.config.prediction_retention_ms);
    }

    pub fn has_prediction(&self, sequence: u32) -> bool {
        self.predictions.find(|p| p.sequence == sequence).is_some()
    }

    /// Compares the host's result for `sequence` with what was predicted and
    /// snaps the live pose when they diverge. Predictions up to and
    /// including `sequence` are discarded.
    pub fn reconcile(
        &mut self,
        sequence: u32,
        authoritative: &Transform,
        transform: &mut Transform,
        now_ms: f64,
    ) -> ReconcileOutcome {
        let predicted = self
            .predictions
            .find(|p| p.sequence == sequence)
            .map(|p| p.transform);

        self.predictions
            .retain(|p| sequence_greater_than(p.sequence, sequence));
        self.last_update_ms = Some(now_ms);

        let Some(predicted) = predicted else {
            return ReconcileOutcome::Unknown;
        };

        let error = predicted.position.distance(authoritative.position);
        if error <= self.config.reconciliation_threshold {
            return ReconcileOutcome::WithinTolerance { error };
        }

        log::debug!(
            "Reconciling input {}: error {:.3}, snapping to {:?}",
            sequence,
            error,
            authoritative.position
        );
        transform.position = authoritative.position;
        transform.rotation = authoritative.rotation;
        if authoritative.velocity.is_some() {
            transform.velocity = authoritative.velocity;
        }

        ReconcileOutcome::Corrected { error }
    }

    pub fn reset(&mut self) {
        self.snapshots.clear();
        self.predictions.clear();
        self.blend = None;
        self.last_update_ms = None;
        self.last_timestamp = None;
    }
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

fn slerp_shortest(from: Quat, to: Quat, t: f32) -> Quat {
    if from.dot(to) < 0.0 {
        from.slerp(-to, t)
    } else {
        from.slerp(to, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn component() -> NetworkComponent {
        NetworkComponent::new(SyncConfig::default(), Some(NetworkId::new(2)), false)
    }

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::at(Vec3::new(x, y, z))
    }

    #[test]
    fn test_blend_boundaries_and_midpoint() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);

        let outcome = net.apply_remote_update(&mut transform, at(2.0, 0.0, 0.0), 10, false, 1000.0);
        let UpdateOutcome::Blending { duration_ms } = outcome else {
            panic!("expected blend, got {:?}", outcome);
        };
        assert_eq!(duration_ms, 50.0);
        assert!(net.is_interpolating());

        net.update(&mut transform, 1000.0);
        assert!(transform.position.length() < 1e-6);

        net.update(&mut transform, 1000.0 + duration_ms / 2.0);
        assert!((transform.position.x - 2.0 * smoothstep(0.5)).abs() < 1e-5);

        net.update(&mut transform, 1000.0 + duration_ms);
        assert!((transform.position.x - 2.0).abs() < 1e-6);
        assert!(!net.is_interpolating());
    }

    #[test]
    fn test_blend_duration_scales_with_distance() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);

        let outcome = net.apply_remote_update(&mut transform, at(4.0, 0.0, 0.0), 1, false, 0.0);
        assert_eq!(outcome, UpdateOutcome::Blending { duration_ms: 80.0 });
    }

    #[test]
    fn test_teleport_snaps() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);

        let outcome = net.apply_remote_update(&mut transform, at(0.0, 0.0, 6.0), 1, false, 0.0);

        assert_eq!(outcome, UpdateOutcome::Teleported);
        assert!(!net.is_interpolating());
        assert_eq!(transform.position, Vec3::new(0.0, 0.0, 6.0));
    }

    #[test]
    fn test_authoritative_beats_smoothing() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);

        let outcome = net.apply_remote_update(&mut transform, at(1.0, 0.0, 0.0), 1, true, 0.0);

        assert_eq!(outcome, UpdateOutcome::Snapped);
        assert_eq!(transform.position, Vec3::X);
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);

        net.apply_remote_update(&mut transform, at(1.0, 0.0, 0.0), 20, true, 0.0);
        let outcome = net.apply_remote_update(&mut transform, at(3.0, 0.0, 0.0), 10, true, 5.0);

        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(transform.position, Vec3::X);
        assert_eq!(net.latest_timestamp(), Some(20));
    }

    #[test]
    fn test_extrapolates_within_window() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);
        let target = Transform {
            velocity: Some(Vec3::new(10.0, 0.0, 0.0)),
            ..at(0.0, 0.0, 0.0)
        };

        net.apply_remote_update(&mut transform, target, 1, true, 0.0);

        net.update(&mut transform, 100.0);
        assert!((transform.position.x - 1.0).abs() < 1e-5);

        net.update(&mut transform, 300.0);
        assert!((transform.position.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_no_extrapolation_during_blend() {
        let mut net = component();
        let mut transform = at(0.0, 0.0, 0.0);
        let target = Transform {
            velocity: Some(Vec3::new(100.0, 0.0, 0.0)),
            ..at(1.0, 0.0, 0.0)
        };

        net.apply_remote_update(&mut transform, target, 1, false, 0.0);
        net.update(&mut transform, 10.0);

        assert!(transform.position.x <= 1.0);
    }

    #[test]
    fn test_reconciliation_snaps_and_trims() {
        let mut net = NetworkComponent::new(SyncConfig::default(), Some(NetworkId::new(2)), true);
        let mut live = at(1.0, 0.0, 0.0);

        net.save_prediction(4, &at(0.5, 0.0, 0.0), 0.0);
        net.save_prediction(5, &at(1.0, 0.0, 0.0), 16.0);
        net.save_prediction(6, &at(1.5, 0.0, 0.0), 32.0);

        let authoritative = Transform {
            rotation: Quat::from_rotation_y(1.0),
            ..at(1.0, 5.0, 0.0)
        };
        let outcome = net.reconcile(5, &authoritative, &mut live, 40.0);

        assert!(matches!(outcome, ReconcileOutcome::Corrected { error } if (error - 5.0).abs() < 1e-6));
        assert_eq!(live.position, Vec3::new(1.0, 5.0, 0.0));
        assert_eq!(live.rotation, authoritative.rotation);
        assert!(!net.has_prediction(4));
        assert!(!net.has_prediction(5));
        assert!(net.has_prediction(6));
        assert_eq!(net.prediction_count(), 1);
    }

    #[test]
    fn test_small_error_is_tolerated() {
        let mut net = NetworkComponent::new(SyncConfig::default(), None, true);
        let mut live = at(2.0, 0.0, 0.0);

        net.save_prediction(1, &at(1.0, 0.0, 0.0), 0.0);
        let outcome = net.reconcile(1, &at(1.05, 0.0, 0.0), &mut live, 1.0);

        assert!(matches!(outcome, ReconcileOutcome::WithinTolerance { .. }));
        assert_eq!(live.position, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(
            net.reconcile(1, &at(9.0, 0.0, 0.0), &mut live, 2.0),
            ReconcileOutcome::Unknown
        );
    }

    #[test]
    fn test_prediction_pruning_is_idempotent() {
        let mut net = NetworkComponent::new(SyncConfig::default(), None, true);
        for seq in 0..5 {
            net.save_prediction(seq, &at(seq as f32, 0.0, 0.0), seq as f64 * 1000.0);
        }

        net.prune(4000.0);
        let first = net.prediction_count();
        net.prune(4000.0);

        assert_eq!(first, 3);
        assert_eq!(net.prediction_count(), first);
    }
}
