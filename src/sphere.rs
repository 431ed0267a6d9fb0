//! Magnetometer calibration: incremental bounding-sphere fit.

use crate::filter::{SampleWindow, StreamFilter};
use crate::sample::SampleVector;

/// Online bounding-sphere estimator for magnetometer samples.
///
/// Maintains six running extrema over every valid sample ever seen and
/// derives the sphere center (per-axis midpoint) and radius (largest
/// per-axis span). Lifetime extrema are deliberate: the hard-iron offset is
/// constant over a session, and a sliding window would bias the center
/// toward recent orientations only.
#[derive(Debug, Clone)]
pub struct SphereFitFilter {
    window: SampleWindow,
    min: [i32; 3],
    max: [i32; 3],
    center: [i32; 3],
    radius: i64,
    samples_seen: u64,
}

impl SphereFitFilter {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: SampleWindow::new(window_size),
            min: [0; 3],
            max: [0; 3],
            center: [0; 3],
            radius: 0,
            samples_seen: 0,
        }
    }

    /// Estimated hard-iron bias: midpoint of the current extrema per axis.
    pub fn center(&self) -> [i32; 3] {
        self.center
    }

    /// Largest per-axis span of the data cloud.
    pub fn radius(&self) -> i64 {
        self.radius
    }

    /// Current extrema as (min, max) per axis.
    pub fn extrema(&self) -> [(i32, i32); 3] {
        [
            (self.min[0], self.max[0]),
            (self.min[1], self.max[1]),
            (self.min[2], self.max[2]),
        ]
    }

    // Runs once per delivered sample; no allocation.
    fn recompute(&mut self) {
        let mut radius = 0i64;
        for a in 0..3 {
            radius = radius.max(self.max[a] as i64 - self.min[a] as i64);
            self.center[a] = ((self.max[a] as i64 + self.min[a] as i64) / 2) as i32;
        }
        self.radius = radius;
    }
}

impl StreamFilter for SphereFitFilter {
    fn add(&mut self, sample: SampleVector) {
        self.window.push(sample);
        self.samples_seen += 1;
        if sample.is_valid {
            for (axis, value) in [sample.x, sample.y, sample.z].into_iter().enumerate() {
                self.min[axis] = self.min[axis].min(value);
                self.max[axis] = self.max[axis].max(value);
            }
        }
        // Center and radius are always a function of the current extrema,
        // never cached stale.
        self.recompute();
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
    use rand::Rng;

    #[test]
    fn test_axis_aligned_cloud_fits_expected_sphere() {
        let mut f = SphereFitFilter::new(10);
        for (x, y, z) in [
            (10, 0, 0),
            (-10, 0, 0),
            (0, 10, 0),
            (0, -10, 0),
            (0, 0, 10),
            (0, 0, -10),
        ] {
            f.add(SampleVector::new(x, y, z));
        }
        assert_eq!(f.center(), [0, 0, 0]);
        assert_eq!(f.radius(), 20);
    }

    #[test]
    fn test_radius_monotonic_and_center_is_midpoint() {
        let mut rng = rand::thread_rng();
        let mut f = SphereFitFilter::new(16);
        let mut last_radius = 0i64;
        for _ in 0..2000 {
            let s = SampleVector::new(
                rng.gen_range(-100_000..=100_000),
                rng.gen_range(-100_000..=100_000),
                rng.gen_range(-100_000..=100_000),
            );
            f.add(s);
            assert!(f.radius() >= last_radius, "radius shrank");
            last_radius = f.radius();

            let extrema = f.extrema();
            for (axis, (min, max)) in extrema.into_iter().enumerate() {
                let mid = ((max as i64 + min as i64) / 2) as i32;
                assert_eq!(f.center()[axis], mid);
            }
        }
    }

    #[test]
    fn test_invalid_samples_counted_but_excluded_from_extrema() {
        let mut f = SphereFitFilter::new(4);
        f.add(SampleVector::new(5, 5, 5));
        let before = (f.center(), f.radius());
        f.add(SampleVector::invalid());
        assert_eq!((f.center(), f.radius()), before);
        assert_eq!(f.sample_count(), 2);
        assert_eq!(f.window_len(), 2);
    }

    #[test]
    fn test_extrema_start_at_zero() {
        // A cloud entirely in the positive octant still spans from 0: the
        // extrema initialize to the origin.
        let mut f = SphereFitFilter::new(4);
        f.add(SampleVector::new(30, 40, 50));
        assert_eq!(f.extrema(), [(0, 30), (0, 40), (0, 50)]);
        assert_eq!(f.radius(), 50);
        assert_eq!(f.center(), [15, 20, 25]);
    }
}
