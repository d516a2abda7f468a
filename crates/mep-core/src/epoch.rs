//! Epoch: trigger-aligned slice of the channel time series

use crate::emg_types::TriggerEvent;
use crate::error::{MepError, MepResult};
use serde::{Deserialize, Serialize};

/// Decimal places used when comparing epochs
pub const DEFAULT_DEDUP_DECIMALS: u32 = 5;

/// Number of points in a window spanning `[t_min_ms, t_max_ms]`
pub fn num_points(t_min_ms: f64, t_max_ms: f64, sampling_rate_hz: u32) -> usize {
    ((t_max_ms - t_min_ms) * sampling_rate_hz as f64 / 1000.0)
        .round()
        .max(0.0) as usize
}

/// Signed sample offset of `ms` relative to the trigger
pub fn ms_to_offset(ms: f64, sampling_rate_hz: u32) -> i64 {
    (ms * sampling_rate_hz as f64 / 1000.0).round() as i64
}

/// Fixed-length window of every channel, anchored at a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    /// Trigger this epoch was cut around
    pub trigger: TriggerEvent,
    /// Sampling rate in Hz
    pub sampling_rate_hz: u32,
    /// Window start relative to the trigger, in ms
    pub t_min_ms: f64,
    /// Window end relative to the trigger, in ms
    pub t_max_ms: f64,
    /// One trace per channel, all of equal length
    pub channels: Vec<Vec<f64>>,
}

impl Epoch {
    /// Create new epoch
    pub fn new(
        trigger: TriggerEvent,
        sampling_rate_hz: u32,
        t_min_ms: f64,
        t_max_ms: f64,
        channels: Vec<Vec<f64>>,
    ) -> Self {
        Self {
            trigger,
            sampling_rate_hz,
            t_min_ms,
            t_max_ms,
            channels,
        }
    }

    /// Number of samples per channel
    pub fn num_points(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Trace of a single channel
    pub fn channel(&self, channel: usize) -> MepResult<&[f64]> {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .ok_or(MepError::ChannelOutOfRange {
                channel,
                channels: self.channels.len(),
            })
    }

    /// Time axis in ms, evenly spaced from `t_min_ms` to `t_max_ms`
    pub fn time_vector_ms(&self) -> Vec<f64> {
        linspace(self.t_min_ms, self.t_max_ms, self.num_points())
    }

    /// Quantized identity of this epoch's values
    pub fn key(&self, decimals: u32) -> EpochKey {
        EpochKey::quantize(self.channels.iter().flatten().copied(), decimals)
    }
}

// Epochs are the same when their values agree after quantization.
impl PartialEq for Epoch {
    fn eq(&self, other: &Self) -> bool {
        self.channel_count() == other.channel_count()
            && self.key(DEFAULT_DEDUP_DECIMALS) == other.key(DEFAULT_DEDUP_DECIMALS)
    }
}

/// Values rounded to a fixed number of decimals, stored as scaled integers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpochKey(Vec<i64>);

impl EpochKey {
    /// Round every value to `decimals` places, ties to even
    pub fn quantize(values: impl IntoIterator<Item = f64>, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        EpochKey(
            values
                .into_iter()
                .map(|v| (v * scale).round_ties_even() as i64)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `n` evenly spaced points from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
