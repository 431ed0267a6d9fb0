//! Telemetry-mode observation and control.
//!
//! The aircraft reports its settings on the ground station's DL_VALUES
//! stream; changing the telemetry mode is a fire-and-forget DL_SETTING
//! command with no acknowledgement correlation. The caller observes the
//! mode taking effect through the listener, not through a reply.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::bus::BusClient;
use crate::error::BusError;

/// Pattern for the ground station's downlinked settings values.
pub fn dl_values_topic() -> String {
    "^ground DL_VALUES ([0-9]+) (.*)".to_string()
}

/// Publish a telemetry mode change for `drone_id`. Fire-and-forget.
pub fn send_mode_command(bus: &dyn BusClient, drone_id: u32, mode: f64) -> Result<(), BusError> {
    info!(drone_id, mode, "setting telemetry mode");
    bus.publish(&format!("calibrate DL_SETTING {drone_id} 0 {mode}"))
}

/// Passive subscription extracting one value from the comma-separated
/// DL_VALUES list for a single drone.
///
/// `value_index` is a direct 0-based index into the comma-separated values.
/// (A legacy variant of this logic used 1-based indexing that skipped the
/// first two settings; that offset is deliberately not applied here.)
pub struct TelemetryListener {
    bus: Arc<dyn BusClient>,
    drone_id: u32,
    value_index: usize,
    pattern: Option<String>,
    latest: Arc<Mutex<Option<f64>>>,
}

impl TelemetryListener {
    pub fn new(bus: Arc<dyn BusClient>, drone_id: u32, value_index: usize) -> Self {
        Self {
            bus,
            drone_id,
            value_index,
            pattern: None,
            latest: Arc::new(Mutex::new(None)),
        }
    }

    pub fn start(&mut self) -> Result<(), BusError> {
        if let Some(pattern) = &self.pattern {
            return Err(BusError::SubscriptionConflict(pattern.clone()));
        }
        let pattern = dl_values_topic();
        let drone_id = self.drone_id;
        let value_index = self.value_index;
        let latest = self.latest.clone();
        self.bus.subscribe(
            &pattern,
            Box::new(move |args| {
                let [id, values] = args else { return };
                if id.parse::<u32>() != Ok(drone_id) {
                    return;
                }
                let Some(value) = values
                    .split(',')
                    .nth(value_index)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                else {
                    return;
                };
                debug!(drone_id, value, "telemetry mode value");
                *latest.lock().unwrap() = Some(value);
            }),
        )?;
        self.pattern = Some(pattern);
        Ok(())
    }

    /// Safe to call if never started, and safe to call twice.
    pub fn stop(&mut self) {
        if let Some(pattern) = self.pattern.take() {
            self.bus.unsubscribe(&pattern);
        }
    }

    /// The most recently observed telemetry mode, truncated to an index.
    /// `None` until a DL_VALUES report for this drone has been seen.
    pub fn mode(&self) -> Option<i32> {
        self.latest.lock().unwrap().map(|v| v as i32)
    }
}

impl Drop for TelemetryListener {
    fn drop(&mut self) {
        self.stop();
    }
}
