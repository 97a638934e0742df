use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interpolation_enabled: bool,
    /// Distance beyond which remote updates snap instead of blending.
    pub teleport_threshold: f32,
    pub max_extrapolation_ms: f64,
    pub snapshot_retention_ms: f64,
    pub prediction_retention_ms: f64,
    pub reconciliation_threshold: f32,
    pub min_blend_ms: f64,
    pub max_blend_ms: f64,
    /// Blend milliseconds per unit of distance.
    pub blend_ms_per_unit: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interpolation_enabled: true,
            teleport_threshold: 5.0,
            max_extrapolation_ms: 200.0,
            snapshot_retention_ms: 500.0,
            prediction_retention_ms: 2000.0,
            reconciliation_threshold: 0.1,
            min_blend_ms: 50.0,
            max_blend_ms: 200.0,
            blend_ms_per_unit: 20.0,
        }
    }
}
