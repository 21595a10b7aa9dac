//! Per-chip record and bounded distance history.

use crate::bits::Signature;
use std::collections::{BTreeMap, VecDeque};

/// Most-recent window of Hamming distances.
///
/// Holds at most `capacity` entries; pushing onto a full window evicts
/// the oldest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceWindow {
    values: VecDeque<usize>,
    capacity: usize,
}

impl DistanceWindow {
    /// Creates an empty window.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Builds a window from historical values, keeping only the newest
    /// `capacity` of them.
    pub fn from_values<I>(capacity: usize, values: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut window = Self::new(capacity);
        for value in values {
            window.push(value);
        }
        window
    }

    /// Appends a distance, evicting the oldest when full.
    pub fn push(&mut self, distance: usize) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(distance);
    }

    /// Number of stored distances.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no distance has been recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of stored distances.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates oldest first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.values.iter().copied()
    }

    /// Sum of stored distances.
    pub fn sum(&self) -> usize {
        self.values.iter().sum()
    }
}

/// Everything known about one enrolled chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipRecord {
    pub(crate) signature: Signature,
    pub(crate) meas_count: u64,
    pub(crate) noise: DistanceWindow,
    pub(crate) inter_chip: BTreeMap<String, DistanceWindow>,
    pub(crate) unstable_bits: Option<Signature>,
}

impl ChipRecord {
    /// Creates a freshly enrolled record with no measurements.
    pub fn enrolled(signature: Signature, capacity: usize) -> Self {
        Self {
            signature,
            meas_count: 0,
            noise: DistanceWindow::new(capacity),
            inter_chip: BTreeMap::new(),
            unstable_bits: None,
        }
    }

    /// Reference signature all later reads are compared against.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of processed measurements.
    #[inline]
    pub fn meas_count(&self) -> u64 {
        self.meas_count
    }

    /// Distances between re-reads of this chip and its reference.
    #[inline]
    pub fn noise(&self) -> &DistanceWindow {
        &self.noise
    }

    /// Distances between reads of this chip and each other chip's
    /// reference, keyed by the other chip's name.
    #[inline]
    pub fn inter_chip(&self) -> &BTreeMap<String, DistanceWindow> {
        &self.inter_chip
    }

    /// Positions seen to flip at least once.
    #[inline]
    pub fn unstable_bits(&self) -> Option<&Signature> {
        self.unstable_bits.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = DistanceWindow::new(3);
        for d in 1..=5 {
            window.push(d);
        }
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(window.sum(), 12);
    }

    #[test]
    fn test_from_values_truncates() {
        let window = DistanceWindow::from_values(2, [7, 8, 9]);
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![8, 9]);
    }

    #[test]
    fn test_enrolled_record_is_empty() {
        let record = ChipRecord::enrolled(Signature::zeros(8), 64);
        assert_eq!(record.meas_count(), 0);
        assert!(record.noise().is_empty());
        assert!(record.inter_chip().is_empty());
        assert!(record.unstable_bits().is_none());
    }

    proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(
            capacity in 1usize..80,
            values in proptest::collection::vec(0usize..1024, 0..300),
        ) {
            let window = DistanceWindow::from_values(capacity, values.iter().copied());
            prop_assert!(window.len() <= capacity);
            let expected: Vec<usize> = values
                .iter()
                .copied()
                .skip(values.len().saturating_sub(capacity))
                .collect();
            prop_assert_eq!(window.iter().collect::<Vec<_>>(), expected);
        }
    }
}
