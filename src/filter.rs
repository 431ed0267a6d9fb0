//! Streaming filter trait and the bounded sample window shared by both
//! calibration kinds.

use std::collections::VecDeque;

use crate::sample::SampleVector;

/// Per-axis min/max over a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    /// Width of the range. Widened to i64 so extreme i32 endpoints cannot
    /// overflow.
    pub fn span(&self) -> i64 {
        self.max as i64 - self.min as i64
    }

    /// Midpoint of the range, truncating toward zero.
    pub fn midpoint(&self) -> i32 {
        ((self.max as i64 + self.min as i64) / 2) as i32
    }
}

/// An online calibration estimator fed one sample per delivered bus message.
///
/// `add` is called from the session's single event-consumer context, must be
/// cheap, and must never block the transport's delivery path.
pub trait StreamFilter: Send {
    /// Ingest one sample. Invalid samples are counted and windowed but
    /// excluded from the derived fit.
    fn add(&mut self, sample: SampleVector);

    /// Number of samples currently held in the window.
    fn window_len(&self) -> usize;

    /// Total samples ever ingested, valid or not.
    fn sample_count(&self) -> u64;
}

/// Bounded FIFO of the most recent samples.
///
/// Never exceeds its capacity; pushing at capacity evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<SampleVector>,
    capacity: usize,
}

impl SampleWindow {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SampleWindow capacity must be greater than 0");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: SampleVector) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in arrival order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SampleVector> {
        self.samples.iter()
    }

    /// Per-axis min/max over the valid samples currently in the window.
    ///
    /// Returns `None` when the window holds no valid sample.
    pub fn ranges(&self) -> Option<[AxisRange; 3]> {
        let mut ranges: Option<[AxisRange; 3]> = None;
        for s in self.samples.iter().filter(|s| s.is_valid) {
            match ranges.as_mut() {
                None => {
                    ranges = Some([
                        AxisRange { min: s.x, max: s.x },
                        AxisRange { min: s.y, max: s.y },
                        AxisRange { min: s.z, max: s.z },
                    ]);
                }
                Some(r) => {
                    for (range, value) in r.iter_mut().zip([s.x, s.y, s.z]) {
                        range.min = range.min.min(value);
                        range.max = range.max.max(value);
                    }
                }
            }
        }
        ranges
    }
}
