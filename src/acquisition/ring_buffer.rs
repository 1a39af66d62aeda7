//! Fixed-capacity sample store
//!
//! [`RingBuffer`] keeps the most recent `capacity` samples of one variable.
//! Once full, each push overwrites the oldest slot, so memory per variable is
//! bounded no matter how long acquisition runs or how fast it samples.
//! Reads always come back in chronological (push) order regardless of where
//! the write cursor currently sits.

use crate::types::Sample;
use std::time::Instant;

/// Overwrite-oldest buffer of timestamped samples
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Vec<Sample>,
    /// Next slot to write once the buffer is full; the oldest sample lives here
    cursor: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    /// Append a value stamped with the current time
    pub fn push(&mut self, value: f64) {
        self.push_at(Instant::now(), value);
    }

    /// Append a value with an explicit timestamp
    pub fn push_at(&mut self, timestamp: Instant, value: f64) {
        let sample = Sample::new(timestamp, value);
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.cursor] = sample;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Samples from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> + ExactSizeIterator + '_ {
        let split = if self.is_full() { self.cursor } else { 0 };
        let (newer, older) = self.slots.split_at(split);
        Chronological {
            first: older.iter(),
            second: newer.iter(),
        }
    }

    /// The full buffered sequence in chronological order
    pub fn all(&self) -> Vec<Sample> {
        self.iter().copied().collect()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<Sample> {
        self.iter().next_back().copied()
    }

    /// Drop every sample, keeping the allocation
    pub fn clear(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Two slices walked back to back
struct Chronological<'a> {
    first: std::slice::Iter<'a, Sample>,
    second: std::slice::Iter<'a, Sample>,
}

impl<'a> Iterator for Chronological<'a> {
    type Item = &'a Sample;

    fn next(&mut self) -> Option<Self::Item> {
        self.first.next().or_else(|| self.second.next())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.first.len() + self.second.len();
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Chronological<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.second.next_back().or_else(|| self.first.next_back())
    }
}

impl ExactSizeIterator for Chronological<'_> {}
