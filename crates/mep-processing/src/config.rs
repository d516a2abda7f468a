//! Configuration for epoch extraction and MEP analysis

use mep_core::epoch::num_points;
use mep_core::{config_error, MepResult, DEFAULT_DEDUP_DECIMALS};
use serde::{Deserialize, Serialize};

/// Largest supported rounding precision; beyond this the scaled values
/// stop fitting an `i64` for realistic amplitudes.
pub const MAX_DEDUP_DECIMALS: u32 = 12;

/// Epoch window and history parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochConfig {
    /// Window start relative to the trigger (ms)
    pub t_min_ms: f64,
    /// Window end relative to the trigger (ms)
    pub t_max_ms: f64,
    /// Number of most recent epochs kept
    pub history_cap: usize,
    /// Decimal places used to detect re-delivered epochs
    pub dedup_decimals: u32,
    /// Length of the rolling per-channel history (ms)
    pub rolling_history_ms: f64,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            t_min_ms: -10.0,
            t_max_ms: 40.0,
            history_cap: 5,
            dedup_decimals: DEFAULT_DEDUP_DECIMALS,
            rolling_history_ms: 5000.0,
        }
    }
}

impl EpochConfig {
    /// Points per epoch at `sampling_rate_hz`
    pub fn num_points(&self, sampling_rate_hz: u32) -> usize {
        num_points(self.t_min_ms, self.t_max_ms, sampling_rate_hz)
    }

    /// Validate configuration values
    pub fn validate(&self) -> MepResult<()> {
        if !(self.t_min_ms < self.t_max_ms) {
            return Err(config_error!(
                "t_min_ms ({}) must be below t_max_ms ({})",
                self.t_min_ms,
                self.t_max_ms
            ));
        }
        if self.history_cap == 0 {
            return Err(config_error!("history_cap must be greater than 0"));
        }
        if self.dedup_decimals > MAX_DEDUP_DECIMALS {
            return Err(config_error!(
                "dedup_decimals {} exceeds {}",
                self.dedup_decimals,
                MAX_DEDUP_DECIMALS
            ));
        }
        if !(self.rolling_history_ms >= self.t_max_ms - self.t_min_ms) {
            return Err(config_error!(
                "rolling_history_ms ({}) is shorter than the epoch window",
                self.rolling_history_ms
            ));
        }
        Ok(())
    }
}

/// Baseline interval and the time span of the signal it applies to.
///
/// All bounds are in ms relative to the trigger; `signal_start_ms` is the
/// time of the first sample of the data being corrected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineWindow {
    pub baseline_start_ms: f64,
    pub baseline_end_ms: f64,
    pub signal_start_ms: f64,
    pub signal_end_ms: f64,
}

impl Default for BaselineWindow {
    fn default() -> Self {
        Self {
            baseline_start_ms: -10.0,
            baseline_end_ms: 0.0,
            signal_start_ms: -10.0,
            signal_end_ms: 40.0,
        }
    }
}

impl BaselineWindow {
    /// Same baseline interval over a different signal span
    pub fn with_signal(self, signal_start_ms: f64, signal_end_ms: f64) -> Self {
        Self {
            signal_start_ms,
            signal_end_ms,
            ..self
        }
    }

    pub fn validate(&self) -> MepResult<()> {
        if !(self.baseline_start_ms < self.baseline_end_ms) {
            return Err(config_error!(
                "baseline_start_ms ({}) must be below baseline_end_ms ({})",
                self.baseline_start_ms,
                self.baseline_end_ms
            ));
        }
        Ok(())
    }
}

/// Parameters of the MEP summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Subtract the baseline mean before measuring
    pub apply_baseline: bool,
    /// Samples before this time (ms after trigger) are ignored for
    /// peak-to-peak, excluding the stimulation artifact
    pub crop_start_ms: f64,
    /// Channel summarized
    pub channel: usize,
    /// Baseline interval; signal bounds are taken from each epoch
    pub baseline: BaselineWindow,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            apply_baseline: true,
            crop_start_ms: crate::peak::DEFAULT_CROP_START_MS,
            channel: 0,
            baseline: BaselineWindow::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> MepResult<()> {
        if self.apply_baseline {
            self.baseline.validate()?;
        }
        if !self.crop_start_ms.is_finite() {
            return Err(config_error!("crop_start_ms must be finite"));
        }
        Ok(())
    }
}
