//! Baseline correction: subtract the mean of a pre-stimulus interval

use crate::config::BaselineWindow;
use mep_core::{MepError, MepResult};

/// Sample range `[start, end)` of the baseline interval within a signal of
/// `len` samples. `start` is clamped to `[0, len - 1]`, `end` to `[0, len]`.
pub fn baseline_range(window: &BaselineWindow, len: usize, sampling_rate: f64) -> (usize, usize) {
    let to_index = |ms: f64| ((ms - window.signal_start_ms) * sampling_rate / 1000.0).round();
    let last = len.saturating_sub(1) as f64;
    let start = to_index(window.baseline_start_ms).clamp(0.0, last) as usize;
    let end = to_index(window.baseline_end_ms).clamp(0.0, len as f64) as usize;
    (start, end)
}

/// Subtract the mean of the baseline interval from every sample of `data`
pub fn apply_baseline(
    window: &BaselineWindow,
    data: &[f64],
    sampling_rate: f64,
) -> MepResult<Vec<f64>> {
    let (start, end) = baseline_range(window, data.len(), sampling_rate);
    if start >= end {
        return Err(MepError::EmptyBaselineWindow {
            start_idx: start,
            end_idx: end,
        });
    }

    let slice = &data[start..end];
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    Ok(data.iter().map(|&x| x - mean).collect())
}

/// [`apply_baseline`] over several traces, preserving their order
pub fn apply_baseline_all<T: AsRef<[f64]>>(
    window: &BaselineWindow,
    windows: &[T],
    sampling_rate: f64,
) -> MepResult<Vec<Vec<f64>>> {
    windows
        .iter()
        .map(|data| apply_baseline(window, data.as_ref(), sampling_rate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> BaselineWindow {
        BaselineWindow {
            baseline_start_ms: -10.0,
            baseline_end_ms: 0.0,
            signal_start_ms: -10.0,
            signal_end_ms: 40.0,
        }
    }

    #[test]
    fn test_baseline_mean_removed() {
        // 50 points at 1 kHz; the first 10 form the baseline
        let data: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.3).sin() * 20.0).collect();
        let corrected = apply_baseline(&window(), &data, 1000.0).unwrap();

        assert_eq!(corrected.len(), data.len());
        let baseline_mean = corrected[..10].iter().sum::<f64>() / 10.0;
        assert!(baseline_mean.abs() < 1e-9);

        // Shape is preserved
        assert!(((corrected[30] - corrected[20]) - (data[30] - data[20])).abs() < 1e-9);
    }

    #[test]
    fn test_baseline_range_rounding_and_clamping() {
        assert_eq!(baseline_range(&window(), 50, 1000.0), (0, 10));
        assert_eq!(baseline_range(&window(), 150, 3000.0), (0, 30));

        let late = BaselineWindow {
            baseline_start_ms: -20.0,
            baseline_end_ms: 100.0,
            ..window()
        };
        assert_eq!(baseline_range(&late, 50, 1000.0), (0, 50));

        // 2.5 samples rounds up to index 3
        let fractional = BaselineWindow {
            baseline_start_ms: -9.5,
            baseline_end_ms: -7.5,
            ..window()
        };
        assert_eq!(baseline_range(&fractional, 50, 1000.0), (1, 3));
    }

    #[test]
    fn test_empty_baseline_is_error() {
        let outside = BaselineWindow {
            baseline_start_ms: -30.0,
            baseline_end_ms: -20.0,
            ..window()
        };
        let result = apply_baseline(&outside, &[1.0; 50], 1000.0);
        assert!(matches!(
            result,
            Err(MepError::EmptyBaselineWindow { start_idx: 0, end_idx: 0 })
        ));

        assert!(apply_baseline(&window(), &[], 1000.0).is_err());
    }

    #[test]
    fn test_apply_to_all() {
        let traces = vec![vec![5.0; 50], vec![-3.0; 50]];
        let corrected = apply_baseline_all(&window(), &traces, 1000.0).unwrap();
        assert_eq!(corrected.len(), 2);
        assert!(corrected.iter().flatten().all(|v| v.abs() < 1e-12));
    }
}
