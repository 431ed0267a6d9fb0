//! Calibration result snapshot, serializable for the thin logging
//! collaborator.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::accel::AccelFitFilter;
use crate::filter::StreamFilter;
use crate::sphere::SphereFitFilter;

/// Kind-specific fit summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitSummary {
    Magnetometer {
        /// Estimated hard-iron bias.
        center: [i32; 3],
        radius: i64,
    },
    Accelerometer {
        fill_ratio: f64,
        observed_orientations: usize,
    },
}

/// Snapshot of one finished (or in-progress) calibration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationReport {
    pub drone_id: u32,
    pub aircraft_name: Option<String>,
    pub samples_seen: u64,
    pub fit: FitSummary,
}

impl CalibrationReport {
    pub fn from_sphere(
        drone_id: u32,
        aircraft_name: Option<String>,
        filter: &SphereFitFilter,
    ) -> Self {
        Self {
            drone_id,
            aircraft_name,
            samples_seen: filter.sample_count(),
            fit: FitSummary::Magnetometer {
                center: filter.center(),
                radius: filter.radius(),
            },
        }
    }

    pub fn from_accel(
        drone_id: u32,
        aircraft_name: Option<String>,
        filter: &AccelFitFilter,
    ) -> Self {
        Self {
            drone_id,
            aircraft_name,
            samples_seen: filter.sample_count(),
            fit: FitSummary::Accelerometer {
                fill_ratio: filter.fill_ratio(),
                observed_orientations: filter.observed_count(),
            },
        }
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }
}
