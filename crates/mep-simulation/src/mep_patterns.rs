//! Evoked-response waveforms the simulated amplifier adds after a trigger

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Response shape following a stimulus, in microvolts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MepPattern {
    /// No evoked response
    Silent,
    /// One full sine period: positive peak then negative peak
    Biphasic {
        latency_ms: f64,
        duration_ms: f64,
        amplitude_uv: f64,
    },
    /// Biphasic response preceded by a short stimulation artifact at 0 ms
    WithArtifact {
        latency_ms: f64,
        duration_ms: f64,
        amplitude_uv: f64,
        artifact_uv: f64,
    },
}

/// Length of the stimulation artifact
const ARTIFACT_MS: f64 = 2.0;

impl MepPattern {
    /// Response value `ms` after the trigger
    pub fn value_at(&self, ms: f64) -> f64 {
        match *self {
            MepPattern::Silent => 0.0,

            MepPattern::Biphasic { latency_ms, duration_ms, amplitude_uv } => {
                biphasic(ms, latency_ms, duration_ms, amplitude_uv)
            }

            MepPattern::WithArtifact { latency_ms, duration_ms, amplitude_uv, artifact_uv } => {
                let artifact = if (0.0..ARTIFACT_MS).contains(&ms) {
                    artifact_uv * (1.0 - ms / ARTIFACT_MS)
                } else {
                    0.0
                };
                artifact + biphasic(ms, latency_ms, duration_ms, amplitude_uv)
            }
        }
    }

    /// Peak-to-peak of the response alone
    pub fn expected_peak_to_peak(&self) -> f64 {
        match *self {
            MepPattern::Silent => 0.0,
            MepPattern::Biphasic { amplitude_uv, .. }
            | MepPattern::WithArtifact { amplitude_uv, .. } => 2.0 * amplitude_uv,
        }
    }

    /// Get pattern description
    pub fn description(&self) -> &'static str {
        match self {
            MepPattern::Silent => "No response",
            MepPattern::Biphasic { .. } => "Biphasic MEP",
            MepPattern::WithArtifact { .. } => "Biphasic MEP with stimulation artifact",
        }
    }

    /// Common presets
    pub fn presets() -> Vec<(&'static str, MepPattern)> {
        vec![
            ("Subthreshold", MepPattern::Silent),
            ("Hand muscle", MepPattern::Biphasic {
                latency_ms: 20.0, duration_ms: 10.0, amplitude_uv: 500.0
            }),
            ("Weak response", MepPattern::Biphasic {
                latency_ms: 22.0, duration_ms: 8.0, amplitude_uv: 50.0
            }),
            ("Hand muscle, artifact", MepPattern::WithArtifact {
                latency_ms: 20.0, duration_ms: 10.0, amplitude_uv: 500.0, artifact_uv: 2000.0
            }),
        ]
    }
}

impl Default for MepPattern {
    fn default() -> Self {
        MepPattern::Biphasic {
            latency_ms: 20.0,
            duration_ms: 10.0,
            amplitude_uv: 500.0,
        }
    }
}

fn biphasic(ms: f64, latency_ms: f64, duration_ms: f64, amplitude_uv: f64) -> f64 {
    let phase = ms - latency_ms;
    if duration_ms <= 0.0 || !(0.0..duration_ms).contains(&phase) {
        return 0.0;
    }
    amplitude_uv * (2.0 * PI * phase / duration_ms).sin()
}
