//! Bounded statistic trackers.
//!
//! [`AverageWindow`] keeps the last K samples and reports their mean; it
//! backs the block-time average. [`SampleLog`] keeps the last K samples of a
//! hardware series and tells the caller whether a push changed the value, so
//! redundant `hardware` notifications can be suppressed.

use std::collections::VecDeque;

/// Rolling mean over the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct AverageWindow {
    samples: VecDeque<u64>,
    capacity: usize,
    sum: u64,
}

impl AverageWindow {
    /// Create a window holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0,
        }
    }

    /// Push a sample, evicting the oldest once full.
    pub fn push(&mut self, value: u64) {
        if self.samples.len() == self.capacity {
            if let Some(old) = self.samples.pop_front() {
                self.sum = self.sum.saturating_sub(old);
            }
        }
        self.samples.push_back(value);
        self.sum = self.sum.saturating_add(value);
    }

    /// Integer mean of the retained samples, `0` when empty.
    pub fn average(&self) -> u64 {
        if self.samples.is_empty() {
            0
        } else {
            self.sum / self.samples.len() as u64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Rolling log of the most recent `capacity` samples of one series.
#[derive(Debug, Clone)]
pub struct SampleLog<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy + PartialEq> SampleLog<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a sample. Returns `true` if it differs from the previous sample
    /// (or is the first one).
    pub fn push(&mut self, value: T) -> bool {
        let changed = self.samples.back() != Some(&value);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        changed
    }

    pub fn last(&self) -> Option<T> {
        self.samples.back().copied()
    }

    /// Samples oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
