//! Peak-to-peak amplitude of an evoked response

use mep_core::{MepError, MepResult};

/// Default start of the response window, after the stimulation artifact
pub const DEFAULT_CROP_START_MS: f64 = 10.0;

/// Index of `crop_start_ms` in a signal whose first sample is at `t_min_ms`
pub fn crop_index(sampling_rate: f64, t_min_ms: f64, crop_start_ms: f64) -> usize {
    ((crop_start_ms - t_min_ms) * sampling_rate / 1000.0)
        .round()
        .max(0.0) as usize
}

/// `max - min` of the signal from `crop_start_ms` on, rounded to 2 decimals
pub fn peak_to_peak(
    signal: &[f64],
    sampling_rate: f64,
    t_min_ms: f64,
    crop_start_ms: f64,
) -> MepResult<f64> {
    let start = crop_index(sampling_rate, t_min_ms, crop_start_ms);
    let cropped = signal.get(start..).filter(|s| !s.is_empty()).ok_or(MepError::EmptySignal)?;

    let (min, max) = cropped
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    Ok(round_to(max - min, 2))
}

/// Round to `decimals` places, ties to even
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}
