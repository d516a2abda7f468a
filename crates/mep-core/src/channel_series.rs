//! Rolling per-channel history keyed by device sample index

use crate::emg_types::SampleBundle;
use std::collections::VecDeque;

/// Rolling buffer that stores recent samples per channel.
///
/// Samples are contiguous: `first_index` is the sample index of the oldest
/// retained value, and every channel holds the same number of values.
#[derive(Debug, Clone)]
pub struct ChannelSeries {
    per_channel: Vec<VecDeque<f64>>, // channel -> samples
    first_index: u64,
    capacity: usize,
}

impl ChannelSeries {
    /// Create an empty series holding at most `capacity` samples per channel
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            per_channel: (0..num_channels)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            first_index: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.per_channel.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples retained per channel
    pub fn len(&self) -> usize {
        self.per_channel.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample index of the oldest retained value
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Sample index the next appended bundle is expected to carry,
    /// saturating at `u64::MAX`
    pub fn next_index(&self) -> u64 {
        self.first_index.saturating_add(self.len() as u64)
    }

    /// Drop everything and restart the series at `index`
    pub fn reset_at(&mut self, index: u64) {
        for channel in &mut self.per_channel {
            channel.clear();
        }
        self.first_index = index;
    }

    /// Append one bundle at `next_index()`, evicting the oldest sample when
    /// full. The bundle must carry one value per channel.
    pub fn push(&mut self, bundle: &SampleBundle) {
        debug_assert_eq!(bundle.values.len(), self.per_channel.len());
        if self.is_empty() {
            self.first_index = bundle.sample_index;
        }
        let evict = self.len() == self.capacity;
        for (channel, &value) in self.per_channel.iter_mut().zip(&bundle.values) {
            if evict {
                channel.pop_front();
            }
            channel.push_back(value);
        }
        if evict {
            self.first_index += 1;
        }
    }

    /// Copy `len` samples per channel starting at sample index `start`.
    ///
    /// Returns `None` unless the whole range is retained.
    pub fn window(&self, start: u64, len: usize) -> Option<Vec<Vec<f64>>> {
        let end = start.checked_add(len as u64)?;
        if start < self.first_index || end > self.next_index() {
            return None;
        }
        let offset = (start - self.first_index) as usize;
        Some(
            self.per_channel
                .iter()
                .map(|channel| channel.range(offset..offset + len).copied().collect())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(index: u64, a: f64, b: f64) -> SampleBundle {
        SampleBundle::new(index, vec![a, b])
    }

    #[test]
    fn test_push_and_window() {
        let mut series = ChannelSeries::new(2, 10);
        for i in 0..5 {
            series.push(&bundle(100 + i, i as f64, -(i as f64)));
        }
        assert_eq!(series.first_index(), 100);
        assert_eq!(series.next_index(), 105);

        let window = series.window(101, 3).unwrap();
        assert_eq!(window[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(window[1], vec![-1.0, -2.0, -3.0]);

        assert!(series.window(99, 2).is_none());
        assert!(series.window(103, 3).is_none());
    }

    #[test]
    fn test_eviction_advances_first_index() {
        let mut series = ChannelSeries::new(2, 3);
        for i in 0..5 {
            series.push(&bundle(i, i as f64, 0.0));
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.first_index(), 2);
        assert_eq!(series.window(2, 3).unwrap()[0], vec![2.0, 3.0, 4.0]);
        assert!(series.window(1, 1).is_none());
    }

    #[test]
    fn test_reset_at() {
        let mut series = ChannelSeries::new(2, 4);
        series.push(&bundle(0, 1.0, 1.0));
        series.reset_at(50);
        assert!(series.is_empty());
        assert_eq!(series.next_index(), 50);
        series.push(&bundle(50, 2.0, 2.0));
        assert_eq!(series.window(50, 1).unwrap()[1], vec![2.0]);
    }

    #[test]
    fn test_indices_near_u64_max() {
        let mut series = ChannelSeries::new(2, 4);
        series.push(&bundle(u64::MAX - 1, 1.0, 1.0));
        series.push(&bundle(u64::MAX, 2.0, 2.0));
        assert_eq!(series.next_index(), u64::MAX);
        assert!(series.window(u64::MAX - 1, 2).is_none());
        assert!(series.window(u64::MAX - 1, 1).is_some());
    }
}
