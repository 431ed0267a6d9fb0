//! Accelerometer calibration: sliding-window orientation coverage.

use crate::filter::{AxisRange, SampleWindow, StreamFilter};
use crate::sample::SampleVector;

/// The six canonical static orientations (±1 g on each axis) the user is
/// asked to hold in sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    XUp,
    XDown,
    YUp,
    YDown,
    ZUp,
    ZDown,
}

impl Orientation {
    pub const ALL: [Orientation; 6] = [
        Orientation::XUp,
        Orientation::XDown,
        Orientation::YUp,
        Orientation::YDown,
        Orientation::ZUp,
        Orientation::ZDown,
    ];

    fn index(self) -> usize {
        match self {
            Orientation::XUp => 0,
            Orientation::XDown => 1,
            Orientation::YUp => 2,
            Orientation::YDown => 3,
            Orientation::ZUp => 4,
            Orientation::ZDown => 5,
        }
    }
}

/// Tuning for orientation detection. These are configuration values, not
/// hidden constants; the defaults follow the historical tool.
#[derive(Debug, Clone, Copy)]
pub struct AccelFitConfig {
    /// Sliding window size W.
    pub window_size: usize,
    /// Minimum axis magnitude (sensor-native units) for that axis to count
    /// as holding ±1 g.
    pub level_threshold: i32,
    /// Maximum per-axis span within the window for the aircraft to count as
    /// held still.
    pub stability_margin: i32,
}

impl Default for AccelFitConfig {
    fn default() -> Self {
        Self {
            window_size: 40,
            level_threshold: 200,
            stability_margin: 15,
        }
    }
}

/// Online orientation-coverage estimator for accelerometer samples.
///
/// Per-axis min/max are recomputed from the current window contents only, in
/// contrast to the magnetometer's lifetime extrema: the user holds six
/// discrete orientations in sequence, and lifetime extrema would latch
/// completion from a single drift sample without ever detecting which
/// orientation is currently held.
#[derive(Debug, Clone)]
pub struct AccelFitFilter {
    config: AccelFitConfig,
    window: SampleWindow,
    ranges: Option<[AxisRange; 3]>,
    observed: [bool; 6],
    samples_seen: u64,
}

impl AccelFitFilter {
    pub fn new(config: AccelFitConfig) -> Self {
        Self {
            window: SampleWindow::new(config.window_size),
            config,
            ranges: None,
            observed: [false; 6],
            samples_seen: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AccelFitConfig::default())
    }

    /// Per-axis min/max over the valid samples currently in the window.
    pub fn ranges(&self) -> Option<[AxisRange; 3]> {
        self.ranges
    }

    /// Fraction of the six canonical orientations observed so far, in [0, 1].
    /// Drives progress feedback only.
    pub fn fill_ratio(&self) -> f64 {
        self.observed_count() as f64 / Orientation::ALL.len() as f64
    }

    pub fn observed(&self, orientation: Orientation) -> bool {
        self.observed[orientation.index()]
    }

    pub fn observed_count(&self) -> usize {
        self.observed.iter().filter(|o| **o).count()
    }

    /// The orientation the aircraft is currently holding, if the window is
    /// full, the readings are steady, and exactly one axis is at ±1 g.
    pub fn current_orientation(&self) -> Option<Orientation> {
        if !self.window.is_full() {
            return None;
        }
        let ranges = self.ranges?;
        if ranges.iter().any(|r| r.span() > self.config.stability_margin as i64) {
            return None;
        }
        let mids = [ranges[0].midpoint(), ranges[1].midpoint(), ranges[2].midpoint()];
        let level: Vec<usize> = (0..3)
            .filter(|&a| mids[a].unsigned_abs() >= self.config.level_threshold.unsigned_abs())
            .collect();
        match level.as_slice() {
            [0] => Some(if mids[0] > 0 {
                Orientation::XUp
            } else {
                Orientation::XDown
            }),
            [1] => Some(if mids[1] > 0 {
                Orientation::YUp
            } else {
                Orientation::YDown
            }),
            [2] => Some(if mids[2] > 0 {
                Orientation::ZUp
            } else {
                Orientation::ZDown
            }),
            _ => None,
        }
    }
}

impl StreamFilter for AccelFitFilter {
    fn add(&mut self, sample: SampleVector) {
        self.window.push(sample);
        self.samples_seen += 1;
        self.ranges = self.window.ranges();
        if let Some(orientation) = self.current_orientation() {
            if !self.observed[orientation.index()] {
                tracing::debug!(?orientation, "orientation observed");
                self.observed[orientation.index()] = true;
            }
        }
    }

    fn window_len(&self) -> usize {
        self.window.len()
    }

    fn sample_count(&self) -> u64 {
        self.samples_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AccelFitConfig {
        AccelFitConfig {
            window_size: 4,
            level_threshold: 200,
            stability_margin: 15,
        }
    }

    fn hold(f: &mut AccelFitFilter, x: i32, y: i32, z: i32, count: usize) {
        for _ in 0..count {
            f.add(SampleVector::new(x, y, z));
        }
    }

    #[test]
    fn test_minmax_reflect_only_window() {
        let mut f = AccelFitFilter::new(small_config());
        hold(&mut f, 1000, 0, 0, 1);
        hold(&mut f, 1, 2, 3, 4); // the 1000 reading ages out
        let r = f.ranges().unwrap();
        assert_eq!(r[0], AxisRange { min: 1, max: 1 });
        assert_eq!(f.window_len(), 4);
        assert_eq!(f.sample_count(), 5);
    }

    #[test]
    fn test_steady_orientation_latches() {
        let mut f = AccelFitFilter::new(small_config());
        assert_eq!(f.fill_ratio(), 0.0);

        hold(&mut f, 512, 3, -4, 4);
        assert!(f.observed(Orientation::XUp));
        assert_eq!(f.observed_count(), 1);

        hold(&mut f, -512, 0, 0, 4);
        assert!(f.observed(Orientation::XDown));

        // Latched orientations survive leaving the pose.
        hold(&mut f, 0, 0, 0, 4);
        assert_eq!(f.observed_count(), 2);
        assert!((f.fill_ratio() - 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_unsteady_window_does_not_latch() {
        let mut f = AccelFitFilter::new(small_config());
        // Dominant axis but shaky: span above the stability margin.
        f.add(SampleVector::new(512, 0, 0));
        f.add(SampleVector::new(480, 0, 0));
        f.add(SampleVector::new(512, 0, 0));
        f.add(SampleVector::new(480, 0, 0));
        assert_eq!(f.current_orientation(), None);
        assert_eq!(f.observed_count(), 0);
    }

    #[test]
    fn test_diagonal_pose_is_not_an_orientation() {
        let mut f = AccelFitFilter::new(small_config());
        hold(&mut f, 400, 400, 0, 4);
        assert_eq!(f.current_orientation(), None);
    }

    #[test]
    fn test_partial_window_does_not_latch() {
        let mut f = AccelFitFilter::new(small_config());
        hold(&mut f, 512, 0, 0, 3);
        assert_eq!(f.current_orientation(), None);
        hold(&mut f, 512, 0, 0, 1);
        assert_eq!(f.current_orientation(), Some(Orientation::XUp));
    }

    #[test]
    fn test_all_six_orientations_fill_to_one() {
        let mut f = AccelFitFilter::new(small_config());
        let poses = [
            (512, 0, 0),
            (-512, 0, 0),
            (0, 512, 0),
            (0, -512, 0),
            (0, 0, 512),
            (0, 0, -512),
        ];
        for (x, y, z) in poses {
            hold(&mut f, x, y, z, 4);
        }
        assert_eq!(f.observed_count(), 6);
        assert_eq!(f.fill_ratio(), 1.0);
    }
}
