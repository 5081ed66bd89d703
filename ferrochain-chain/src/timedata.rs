//! Network-time-offset tracking: defends header timestamp validation against
//! peer-driven clock skew.
//!
//! The offset is only recomputed when the sample count is odd and at
//! least 5, which means once the window fills at its cap the offset freezes.
//! This is intentional rather than an oversight: it bounds how much a late
//! flood of samples from new peers can swing the offset.

use std::collections::HashSet;

const MAX_SAMPLES: usize = 200;
const MAX_TIME_ADJUSTMENT: i64 = 70 * 60;

/// Sliding window that reports the median of its last `size` inputs.
pub struct MedianFilter {
    size: usize,
    values: Vec<i64>,
}

impl MedianFilter {
    pub fn new(size: usize, initial_value: i64) -> Self {
        MedianFilter {
            size,
            values: vec![initial_value],
        }
    }

    pub fn input(&mut self, value: i64) {
        if self.values.len() == self.size {
            self.values.remove(0);
        }
        self.values.push(value);
    }

    pub fn median(&self) -> i64 {
        let mut sorted = self.values.clone();
        sorted.sort_unstable();
        let n = sorted.len();
        if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sorted(&self) -> Vec<i64> {
        let mut sorted = self.values.clone();
        sorted.sort_unstable();
        sorted
    }
}

/// Per-process (here: per-`NetworkTimeOffset` instance) tracker of the
/// adjusted network time offset, fed one sample per distinct peer source.
pub struct NetworkTimeOffset {
    offset: i64,
    sources: HashSet<[u8; 18]>,
    samples: MedianFilter,
    warning_emitted: bool,
}

impl Default for NetworkTimeOffset {
    fn default() -> Self {
        NetworkTimeOffset {
            offset: 0,
            sources: HashSet::new(),
            samples: MedianFilter::new(MAX_SAMPLES, 0),
            warning_emitted: false,
        }
    }
}

impl NetworkTimeOffset {
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// `source_key` is the peer endpoint's canonical key (see the network
    /// crate's address-book key); only one sample per distinct source is
    /// ever counted.
    pub fn add_sample(&mut self, source_key: [u8; 18], offset_sample: i64) -> bool {
        if self.sources.len() == MAX_SAMPLES {
            return false;
        }
        if !self.sources.insert(source_key) {
            return false;
        }

        self.samples.input(offset_sample);

        if self.samples.len() >= 5 && self.samples.len() % 2 == 1 {
            let median = self.samples.median();
            if (-MAX_TIME_ADJUSTMENT..=MAX_TIME_ADJUSTMENT).contains(&median) {
                self.offset = median;
            } else {
                self.offset = 0;
                if !self.warning_emitted {
                    let close_match = self
                        .samples
                        .sorted()
                        .into_iter()
                        .any(|n| n != 0 && n > -300 && n < 300);
                    if !close_match {
                        self.warning_emitted = true;
                        tracing::error!(
                            "system clock may be wrong: peer time samples disagree by more than the adjustment cap"
                        );
                    }
                }
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_window() {
        let mut f = MedianFilter::new(5, 0);
        for v in [10, 20, 30, 40] {
            f.input(v);
        }
        // 5 values total (initial 0 + 4 inputs): 0,10,20,30,40 -> median 20
        assert_eq!(f.median(), 20);
    }

    #[test]
    fn offset_freezes_once_window_is_even_sized() {
        let mut t = NetworkTimeOffset::default();
        let mut key = [0u8; 18];
        for i in 0..6u8 {
            key[0] = i;
            t.add_sample(key, 100);
        }
        // After 6 total samples (odd count happens on the 4th call: 1+4=5 samples),
        // offset should have been set once and then frozen on the next even count.
        assert_eq!(t.offset(), 100);
    }

    #[test]
    fn outlier_beyond_cap_resets_to_zero() {
        let mut t = NetworkTimeOffset::default();
        let mut key = [0u8; 18];
        for i in 0..5u8 {
            key[0] = i;
            t.add_sample(key, 10_000_000);
        }
        assert_eq!(t.offset(), 0);
    }
}
