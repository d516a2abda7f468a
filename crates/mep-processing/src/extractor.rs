//! Epoch extraction: cuts trigger-aligned windows out of the sample stream

use crate::config::EpochConfig;
use crate::dedup::EpochDeduplicator;
use mep_core::epoch::ms_to_offset;
use mep_core::{ChannelSeries, Epoch, MepResult, SampleBundle, TriggerEvent};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Counters for data the extractor had to drop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    /// Bundles behind the expected sample index
    pub stale_bundles: u64,
    /// Bundles whose channel count did not match the measurement
    pub mismatched_bundles: u64,
    /// Forward jumps in the sample index; each one restarts the history
    pub gaps: u64,
    /// Triggers whose window was no longer retained
    pub discarded_triggers: u64,
    /// Epochs rejected as already seen
    pub duplicate_epochs: u64,
}

/// Turns sample bundles and triggers into epochs.
///
/// Samples are kept in a rolling [`ChannelSeries`]; a queued trigger becomes
/// an epoch once every sample of its window has arrived.
#[derive(Debug)]
pub struct EpochExtractor {
    config: EpochConfig,
    shape: Option<(u32, usize)>, // (sampling rate, channels)
    series: ChannelSeries,
    pending: VecDeque<TriggerEvent>,
    recent: VecDeque<Epoch>,
    dedup: EpochDeduplicator,
    stats: ExtractorStats,
}

impl EpochExtractor {
    pub fn new(config: EpochConfig) -> MepResult<Self> {
        config.validate()?;
        Ok(Self {
            dedup: EpochDeduplicator::new(config.dedup_decimals),
            recent: VecDeque::with_capacity(config.history_cap),
            config,
            shape: None,
            series: ChannelSeries::new(0, 1),
            pending: VecDeque::new(),
            stats: ExtractorStats::default(),
        })
    }

    pub fn config(&self) -> &EpochConfig {
        &self.config
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    /// Sampling rate and channel count currently configured
    pub fn shape(&self) -> Option<(u32, usize)> {
        self.shape
    }

    /// Set the measurement shape. A change of either value drops all state,
    /// since epochs of different shapes are not comparable.
    pub fn configure(&mut self, sampling_rate_hz: u32, num_channels: usize) {
        if self.shape == Some((sampling_rate_hz, num_channels)) {
            return;
        }
        info!(sampling_rate_hz, num_channels, "epoch extractor configured");
        self.reset();
        let capacity = (self.config.rolling_history_ms * sampling_rate_hz as f64 / 1000.0)
            .round()
            .max(1.0) as usize;
        self.series = ChannelSeries::new(num_channels, capacity);
        self.shape = Some((sampling_rate_hz, num_channels));
    }

    /// Append bundles to the rolling history
    pub fn ingest(&mut self, bundles: &[SampleBundle]) {
        for bundle in bundles {
            if bundle.channel_count() != self.series.num_channels() || self.shape.is_none() {
                self.stats.mismatched_bundles += 1;
                continue;
            }

            if !self.series.is_empty() {
                let expected = self.series.next_index();
                if bundle.sample_index < expected {
                    if expected - bundle.sample_index <= self.series.len() as u64 {
                        self.stats.stale_bundles += 1;
                        continue;
                    }
                    // Too far back to be a late packet: the device restarted counting
                    info!(sample_index = bundle.sample_index, "sample index restarted");
                    self.series.reset_at(bundle.sample_index);
                    self.drop_pending("sample index restarted");
                } else if bundle.sample_index > expected {
                    warn!(expected, got = bundle.sample_index, "sample gap");
                    self.stats.gaps += 1;
                    self.series.reset_at(bundle.sample_index);
                }
            }

            self.series.push(bundle);
        }
    }

    /// Queue a trigger; inactive triggers are ignored
    pub fn push_trigger(&mut self, trigger: TriggerEvent) {
        if !trigger.is_active() {
            debug!(
                kind = %trigger.kind,
                time_index = trigger.time_index,
                "ignoring inactive trigger"
            );
            return;
        }
        self.pending.push_back(trigger);
    }

    /// Triggers still waiting for samples
    pub fn pending_triggers(&self) -> usize {
        self.pending.len()
    }

    /// Cut epochs for every pending trigger whose window is complete.
    ///
    /// Returns the epochs that were new; they are also added to
    /// [`recent`](Self::recent).
    pub fn process(&mut self) -> Vec<Epoch> {
        let Some((sampling_rate_hz, _)) = self.shape else {
            return Vec::new();
        };
        let offset = ms_to_offset(self.config.t_min_ms, sampling_rate_hz);
        let num_points = self.config.num_points(sampling_rate_hz);

        let mut cut = Vec::new();
        let mut discarded = 0;
        let series = &self.series;
        // A window starting further ahead than the history holds cannot be
        // from the current sample count.
        let horizon = series.next_index().saturating_add(series.capacity() as u64);
        self.pending.retain(|trigger| {
            let start = i64::try_from(trigger.time_index)
                .ok()
                .and_then(|index| index.checked_add(offset))
                .and_then(|start| u64::try_from(start).ok());
            let start = match start {
                Some(start) if series.is_empty() || start >= series.first_index() => start,
                _ => {
                    warn!(
                        time_index = trigger.time_index,
                        "discarding trigger: window start is not retained"
                    );
                    discarded += 1;
                    return false;
                }
            };
            if !series.is_empty() && start > horizon {
                warn!(
                    time_index = trigger.time_index,
                    next_index = series.next_index(),
                    "discarding trigger: window start is beyond the sample history"
                );
                discarded += 1;
                return false;
            }
            match series.window(start, num_points) {
                Some(channels) => {
                    cut.push(Epoch::new(
                        *trigger,
                        sampling_rate_hz,
                        self.config.t_min_ms,
                        self.config.t_max_ms,
                        channels,
                    ));
                    false
                }
                None => true,
            }
        });
        self.stats.discarded_triggers += discarded;

        self.accept(cut)
    }

    /// Add externally produced epochs through the same duplicate check and
    /// history cap. Returns the epochs that were new.
    pub fn accept(&mut self, epochs: Vec<Epoch>) -> Vec<Epoch> {
        let offered = epochs.len();
        let fresh = self.dedup.retain_new(epochs);
        let duplicates = offered - fresh.len();
        if duplicates > 0 {
            debug!(duplicates, "rejected duplicate epochs");
            self.stats.duplicate_epochs += duplicates as u64;
        }

        for epoch in &fresh {
            if self.recent.len() == self.config.history_cap {
                self.recent.pop_front();
            }
            self.recent.push_back(epoch.clone());
        }
        fresh
    }

    /// Most recent epochs, oldest first
    pub fn recent(&self) -> &VecDeque<Epoch> {
        &self.recent
    }

    /// Element-wise mean of `channel` over the recent epochs
    pub fn mean_trace(&self, channel: usize) -> MepResult<Option<Vec<f64>>> {
        let traces = self
            .recent
            .iter()
            .map(|epoch| epoch.channel(channel))
            .collect::<MepResult<Vec<_>>>()?;
        Ok(crate::analysis::mean_trace(&traces))
    }

    fn drop_pending(&mut self, reason: &str) {
        if self.pending.is_empty() {
            return;
        }
        warn!(count = self.pending.len(), reason, "discarding pending triggers");
        self.stats.discarded_triggers += self.pending.len() as u64;
        self.pending.clear();
    }

    /// Drop samples, pending triggers, epochs and remembered keys
    pub fn reset(&mut self) {
        self.series.reset_at(0);
        self.pending.clear();
        self.recent.clear();
        self.dedup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mep_core::TriggerKind;

    fn bundles(range: std::ops::Range<u64>) -> Vec<SampleBundle> {
        range
            .map(|i| SampleBundle::new(i, vec![i as f64, -(i as f64)]))
            .collect()
    }

    fn extractor() -> EpochExtractor {
        let mut extractor = EpochExtractor::new(EpochConfig::default()).unwrap();
        extractor.configure(1000, 2);
        extractor
    }

    #[test]
    fn test_epoch_cut_around_trigger() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..100));
        extractor.push_trigger(TriggerEvent::at(30));

        let epochs = extractor.process();
        assert_eq!(epochs.len(), 1);

        let epoch = &epochs[0];
        assert_eq!(epoch.num_points(), 50);
        assert_eq!(epoch.channel_count(), 2);
        assert_eq!(epoch.channels[0][0], 20.0);
        assert_eq!(epoch.channels[0][49], 69.0);
        assert_eq!(epoch.channels[1][10], -30.0);
        assert_eq!(extractor.recent().len(), 1);
        assert_eq!(extractor.pending_triggers(), 0);
    }

    #[test]
    fn test_trigger_waits_for_samples() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..40));
        extractor.push_trigger(TriggerEvent::at(30));

        assert!(extractor.process().is_empty());
        assert_eq!(extractor.pending_triggers(), 1);

        extractor.ingest(&bundles(40..70));
        assert_eq!(extractor.process().len(), 1);
    }

    #[test]
    fn test_inactive_trigger_ignored() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..100));
        extractor.push_trigger(TriggerEvent::new(30, TriggerKind::Disabled));
        assert_eq!(extractor.pending_triggers(), 0);
        assert!(extractor.process().is_empty());
    }

    #[test]
    fn test_evicted_window_discarded() {
        let config = EpochConfig {
            rolling_history_ms: 100.0,
            ..Default::default()
        };
        let mut extractor = EpochExtractor::new(config).unwrap();
        extractor.configure(1000, 2);
        extractor.ingest(&bundles(0..300));

        extractor.push_trigger(TriggerEvent::at(50)); // window starts at 40, evicted
        extractor.push_trigger(TriggerEvent::at(5)); // window starts before index 0
        assert!(extractor.process().is_empty());
        assert_eq!(extractor.stats().discarded_triggers, 2);
        assert_eq!(extractor.pending_triggers(), 0);
    }

    #[test]
    fn test_trigger_index_overflow_discarded() {
        let config = EpochConfig {
            t_min_ms: 10.0,
            t_max_ms: 40.0,
            ..Default::default()
        };
        let mut extractor = EpochExtractor::new(config).unwrap();
        extractor.configure(1000, 2);
        extractor.ingest(&bundles(0..100));

        extractor.push_trigger(TriggerEvent::at(u64::MAX));
        extractor.push_trigger(TriggerEvent::at(i64::MAX as u64));
        extractor.push_trigger(TriggerEvent::at(20));

        let epochs = extractor.process();
        assert_eq!(epochs.len(), 1);
        assert_eq!(epochs[0].channels[0][0], 30.0);
        assert_eq!(extractor.stats().discarded_triggers, 2);
        assert_eq!(extractor.pending_triggers(), 0);
    }

    #[test]
    fn test_trigger_beyond_history_expires() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..100));

        extractor.push_trigger(TriggerEvent::at(100_000));
        extractor.push_trigger(TriggerEvent::at(120));
        assert!(extractor.process().is_empty());
        assert_eq!(extractor.stats().discarded_triggers, 1);
        assert_eq!(extractor.pending_triggers(), 1);

        extractor.ingest(&bundles(100..200));
        assert_eq!(extractor.process().len(), 1);
        assert_eq!(extractor.pending_triggers(), 0);
    }

    #[test]
    fn test_index_restart_drops_pending_triggers() {
        let config = EpochConfig {
            rolling_history_ms: 100.0,
            ..Default::default()
        };
        let mut extractor = EpochExtractor::new(config).unwrap();
        extractor.configure(1000, 2);
        extractor.ingest(&bundles(0..300));
        extractor.push_trigger(TriggerEvent::at(295));
        assert!(extractor.process().is_empty());
        assert_eq!(extractor.pending_triggers(), 1);

        // Counting starts over at 0
        extractor.ingest(&bundles(0..10));
        assert_eq!(extractor.pending_triggers(), 0);
        assert_eq!(extractor.stats().discarded_triggers, 1);
        assert_eq!(extractor.stats().stale_bundles, 0);

        extractor.ingest(&bundles(10..80));
        extractor.push_trigger(TriggerEvent::at(30));
        let epochs = extractor.process();
        assert_eq!(epochs.len(), 1);
        assert_eq!(epochs[0].channels[0][0], 20.0);
    }

    #[test]
    fn test_history_capped_and_deduplicated() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..1000));
        for t in [100, 200, 300, 400, 500, 600, 700] {
            extractor.push_trigger(TriggerEvent::at(t));
        }
        // Same window again
        extractor.push_trigger(TriggerEvent::at(700));

        let epochs = extractor.process();
        assert_eq!(epochs.len(), 7);
        assert_eq!(extractor.stats().duplicate_epochs, 1);

        let recent: Vec<u64> = extractor
            .recent()
            .iter()
            .map(|e| e.trigger.time_index)
            .collect();
        assert_eq!(recent, vec![300, 400, 500, 600, 700]);

        // Evicted from history but still remembered
        let again = extractor.accept(epochs[..1].to_vec());
        assert!(again.is_empty());
    }

    #[test]
    fn test_stale_and_gapped_bundles() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..50));
        extractor.ingest(&bundles(45..50));
        assert_eq!(extractor.stats().stale_bundles, 5);

        extractor.ingest(&bundles(80..90));
        assert_eq!(extractor.stats().gaps, 1);

        // Samples before the gap are gone
        extractor.push_trigger(TriggerEvent::at(30));
        assert!(extractor.process().is_empty());
        assert_eq!(extractor.stats().discarded_triggers, 1);

        extractor.ingest(&[SampleBundle::new(90, vec![1.0])]);
        assert_eq!(extractor.stats().mismatched_bundles, 1);
    }

    #[test]
    fn test_reconfigure_resets() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..100));
        extractor.push_trigger(TriggerEvent::at(30));
        extractor.process();

        extractor.configure(1000, 2);
        assert_eq!(extractor.recent().len(), 1);

        extractor.configure(2000, 2);
        assert!(extractor.recent().is_empty());
        assert_eq!(extractor.shape(), Some((2000, 2)));
    }

    #[test]
    fn test_mean_trace() {
        let mut extractor = extractor();
        extractor.ingest(&bundles(0..200));
        extractor.push_trigger(TriggerEvent::at(30));
        extractor.push_trigger(TriggerEvent::at(130));
        extractor.process();

        let mean = extractor.mean_trace(0).unwrap().unwrap();
        assert_eq!(mean.len(), 50);
        assert_eq!(mean[0], 70.0); // mean of 20 and 120
        assert!(extractor.mean_trace(5).is_err());
    }

    #[test]
    fn test_unconfigured_drops_everything() {
        let mut extractor = EpochExtractor::new(EpochConfig::default()).unwrap();
        extractor.ingest(&bundles(0..10));
        extractor.push_trigger(TriggerEvent::at(5));
        assert!(extractor.process().is_empty());
        assert_eq!(extractor.stats().mismatched_bundles, 10);
    }
}
