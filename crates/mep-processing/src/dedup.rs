//! Detection of epochs that were already seen
//!
//! Triggers can be re-delivered, which would otherwise produce the same
//! epoch twice. Epochs are compared by their values rounded to a fixed
//! number of decimals.

use mep_core::{Epoch, EpochKey};
use std::collections::HashSet;

/// Indices of the `incoming` rows whose rounded values match no row of
/// `known`. Rows are compared whole; duplicates within `incoming` are all
/// reported.
pub fn new_indices<K, N>(known: &[K], incoming: &[N], decimals: u32) -> Vec<usize>
where
    K: AsRef<[f64]>,
    N: AsRef<[f64]>,
{
    let known: HashSet<EpochKey> = known
        .iter()
        .map(|row| EpochKey::quantize(row.as_ref().iter().copied(), decimals))
        .collect();

    incoming
        .iter()
        .enumerate()
        .filter(|(_, row)| !known.contains(&EpochKey::quantize(row.as_ref().iter().copied(), decimals)))
        .map(|(i, _)| i)
        .collect()
}

/// Remembers the key of every epoch it has let through
#[derive(Debug, Clone)]
pub struct EpochDeduplicator {
    decimals: u32,
    seen: HashSet<EpochKey>,
}

impl EpochDeduplicator {
    pub fn new(decimals: u32) -> Self {
        Self {
            decimals,
            seen: HashSet::new(),
        }
    }

    /// Record `epoch`, returning false if an equal one was seen before
    pub fn insert(&mut self, epoch: &Epoch) -> bool {
        self.seen.insert(epoch.key(self.decimals))
    }

    pub fn contains(&self, epoch: &Epoch) -> bool {
        self.seen.contains(&epoch.key(self.decimals))
    }

    /// Keep only epochs not seen before, remembering them
    pub fn retain_new(&mut self, epochs: Vec<Epoch>) -> Vec<Epoch> {
        epochs.into_iter().filter(|epoch| self.insert(epoch)).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mep_core::TriggerEvent;

    #[test]
    fn test_new_indices_rounding() {
        let known = vec![vec![1.0, 2.0, 3.0]];
        let incoming = vec![
            vec![1.000001, 2.0, 3.0], // equal at 5 decimals
            vec![1.00002, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
        ];
        assert_eq!(new_indices(&known, &incoming, 5), vec![1, 2]);
        assert_eq!(new_indices(&known, &incoming, 7), vec![0, 1, 2]);
    }

    #[test]
    fn test_new_indices_empty_known() {
        let known: Vec<Vec<f64>> = Vec::new();
        let incoming = vec![vec![1.0], vec![1.0]];
        assert_eq!(new_indices(&known, &incoming, 5), vec![0, 1]);
        assert!(new_indices(&incoming, &known, 5).is_empty());
    }

    #[test]
    fn test_deduplicator_retains_first() {
        let epoch = |v: f64| Epoch::new(TriggerEvent::at(0), 1000, -10.0, 40.0, vec![vec![v; 4]]);
        let mut dedup = EpochDeduplicator::new(5);

        let kept = dedup.retain_new(vec![epoch(1.0), epoch(1.0), epoch(2.0)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dedup.len(), 2);

        assert!(dedup.contains(&epoch(2.000001)));
        assert!(!dedup.insert(&epoch(1.0)));

        dedup.clear();
        assert!(dedup.is_empty());
        assert!(dedup.insert(&epoch(1.0)));
    }
}
