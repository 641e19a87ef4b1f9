//! Rolling price history for the chart
//!
//! Fixed-capacity ring of [`HistorySample`]s in chronological order.
//! Oldest samples are evicted first once capacity is reached.

use std::collections::VecDeque;

use super::types::HistorySample;

/// Number of chart points kept by default (one minute of 1s ticks)
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

/// Ring buffer storing the N most recent samples
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl RollingBuffer {
    /// Capacity is fixed for the lifetime of the buffer. A zero capacity is
    /// raised to one so the latest sample is always retained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, sample: HistorySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Replace contents wholesale, keeping only the most recent `capacity`
    /// entries of `history`
    pub fn seed<I>(&mut self, history: I)
    where
        I: IntoIterator<Item = HistorySample>,
    {
        self.samples.clear();
        for sample in history {
            self.append(sample);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_vec(&self) -> Vec<HistorySample> {
        self.samples.iter().copied().collect()
    }
}
