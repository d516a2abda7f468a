//! MEP summary over a set of epochs

use crate::baseline::apply_baseline;
use crate::config::AnalysisConfig;
use crate::peak::peak_to_peak;
use mep_core::epoch::linspace;
use mep_core::{Epoch, MepResult};
use serde::{Deserialize, Serialize};

/// Corrected traces and amplitudes of one channel across epochs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MepSummary {
    /// Channel summarized
    pub channel: usize,
    /// Time axis in ms relative to the trigger
    pub time_ms: Vec<f64>,
    /// One trace per epoch, baseline corrected when configured
    pub traces: Vec<Vec<f64>>,
    /// Peak-to-peak amplitude of each trace
    pub peak_to_peak: Vec<f64>,
    /// Element-wise mean of `traces`
    pub mean_trace: Vec<f64>,
    /// Peak-to-peak amplitude of the mean trace
    pub mean_peak_to_peak: Option<f64>,
}

impl MepSummary {
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Summarize the configured channel of `epochs`.
///
/// Epochs whose length differs from the first one are skipped. An empty
/// input gives an empty summary.
pub fn summarize<'a, I>(epochs: I, config: &AnalysisConfig) -> MepResult<MepSummary>
where
    I: IntoIterator<Item = &'a Epoch>,
{
    let mut summary = MepSummary {
        channel: config.channel,
        time_ms: Vec::new(),
        traces: Vec::new(),
        peak_to_peak: Vec::new(),
        mean_trace: Vec::new(),
        mean_peak_to_peak: None,
    };
    let mut reference: Option<&Epoch> = None;

    for epoch in epochs {
        let first = *reference.get_or_insert(epoch);
        if epoch.num_points() != first.num_points() {
            tracing::debug!(
                time_index = epoch.trigger.time_index,
                points = epoch.num_points(),
                expected = first.num_points(),
                "skipping epoch of a different length"
            );
            continue;
        }

        let fs = epoch.sampling_rate_hz as f64;
        let raw = epoch.channel(config.channel)?;
        let trace = if config.apply_baseline {
            let window = config.baseline.with_signal(epoch.t_min_ms, epoch.t_max_ms);
            apply_baseline(&window, raw, fs)?
        } else {
            raw.to_vec()
        };

        summary
            .peak_to_peak
            .push(peak_to_peak(&trace, fs, epoch.t_min_ms, config.crop_start_ms)?);
        summary.traces.push(trace);
    }

    let Some(first) = reference else {
        return Ok(summary);
    };
    summary.time_ms = linspace(first.t_min_ms, first.t_max_ms, first.num_points());
    summary.mean_trace = mean_trace(&summary.traces).unwrap_or_default();
    summary.mean_peak_to_peak = Some(peak_to_peak(
        &summary.mean_trace,
        first.sampling_rate_hz as f64,
        first.t_min_ms,
        config.crop_start_ms,
    )?);
    Ok(summary)
}

/// Element-wise mean of equal-length traces; `None` when there are none
pub fn mean_trace<T: AsRef<[f64]>>(traces: &[T]) -> Option<Vec<f64>> {
    let len = traces.first()?.as_ref().len();
    let mut mean = vec![0.0; len];
    for trace in traces {
        for (acc, &x) in mean.iter_mut().zip(trace.as_ref()) {
            *acc += x;
        }
    }
    let n = traces.len() as f64;
    mean.iter_mut().for_each(|acc| *acc /= n);
    Some(mean)
}
