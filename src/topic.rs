//! Topic pattern construction and raw-stream subscription lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::bus::BusClient;
use crate::error::{BusError, SampleParseError};
use crate::sample::{CalibrationKind, SampleVector};

/// Capture group for one signed decimal integer, as the aircraft encodes
/// raw sample fields.
const SIGNED_INT_GROUP: &str = "([\\-]*[0-9]+)";

/// Topic pattern for a drone's raw sample stream: the numeric drone id, the
/// kind-specific message name, then exactly three signed-integer fields.
pub fn raw_topic(drone_id: u32, kind: CalibrationKind) -> String {
    format!(
        "^{drone_id} {} {SIGNED_INT_GROUP} {SIGNED_INT_GROUP} {SIGNED_INT_GROUP}",
        kind.raw_message_name()
    )
}

/// Topic pattern matching any raw-flavored message from a drone. Used only
/// to detect that raw data is present on the bus at all.
pub fn raw_presence_topic(drone_id: u32) -> String {
    format!("^{drone_id} [A-Za-z0-9_]+RAW(.*)")
}

/// Topic pattern matching any message that opens with a numeric sender id.
/// Used to discover which drones are talking on the bus.
pub fn id_discovery_topic() -> String {
    "^([0-9]+) [A-Za-z0-9]".to_string()
}

/// Decode the three captured fields of a raw sample match.
pub fn decode_sample(args: &[String]) -> Result<SampleVector, SampleParseError> {
    if args.len() != 3 {
        return Err(SampleParseError {
            field: format!("{} captured fields", args.len()),
        });
    }
    let mut axes = [0i32; 3];
    for (axis, field) in axes.iter_mut().zip(args) {
        *axis = field.parse().map_err(|_| SampleParseError {
            field: field.clone(),
        })?;
    }
    Ok(SampleVector::new(axes[0], axes[1], axes[2]))
}

/// Owns the subscriptions tied to one drone's streams: raw samples,
/// raw-data presence, and id discovery. Guarantees at most one active
/// subscription per logical stream and idempotent teardown.
pub struct BusTopicProtocol {
    bus: Arc<dyn BusClient>,
    drone_id: u32,
    raw_pattern: Option<String>,
    presence_pattern: Option<String>,
    id_pattern: Option<String>,
    raw_on_bus: Arc<AtomicBool>,
    discovered: Arc<Mutex<Vec<u32>>>,
}

impl BusTopicProtocol {
    pub fn new(bus: Arc<dyn BusClient>, drone_id: u32) -> Self {
        Self {
            bus,
            drone_id,
            raw_pattern: None,
            presence_pattern: None,
            id_pattern: None,
            raw_on_bus: Arc::new(AtomicBool::new(false)),
            discovered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn drone_id(&self) -> u32 {
        self.drone_id
    }

    /// Bind the raw sample stream for `kind`. Each match invokes `on_sample`
    /// exactly once, in delivery order; a match whose fields fail integer
    /// parsing is delivered as an `is_valid = false` sample rather than
    /// dropped, so downstream counters still see it.
    pub fn subscribe_raw(
        &mut self,
        kind: CalibrationKind,
        on_sample: impl Fn(SampleVector) + Send + Sync + 'static,
    ) -> Result<(), BusError> {
        if let Some(pattern) = &self.raw_pattern {
            return Err(BusError::SubscriptionConflict(pattern.clone()));
        }
        let pattern = raw_topic(self.drone_id, kind);
        let drone_id = self.drone_id;
        self.bus.subscribe(
            &pattern,
            Box::new(move |args| {
                let sample = match decode_sample(args) {
                    Ok(sample) => {
                        debug!(drone_id, x = sample.x, y = sample.y, z = sample.z, %kind, "raw sample");
                        sample
                    }
                    Err(e) => {
                        warn!(drone_id, %kind, error = %e, "unparseable raw sample");
                        SampleVector::invalid()
                    }
                };
                on_sample(sample);
            }),
        )?;
        self.raw_pattern = Some(pattern);
        Ok(())
    }

    /// Safe to call if never subscribed, and safe to call twice.
    pub fn unsubscribe_raw(&mut self) {
        if let Some(pattern) = self.raw_pattern.take() {
            self.bus.unsubscribe(&pattern);
        }
    }

    /// Watch for any raw-flavored traffic from this drone.
    pub fn watch_raw_presence(&mut self) -> Result<(), BusError> {
        if let Some(pattern) = &self.presence_pattern {
            return Err(BusError::SubscriptionConflict(pattern.clone()));
        }
        let pattern = raw_presence_topic(self.drone_id);
        let flag = self.raw_on_bus.clone();
        self.bus.subscribe(
            &pattern,
            Box::new(move |_| {
                flag.store(true, Ordering::SeqCst);
            }),
        )?;
        self.presence_pattern = Some(pattern);
        Ok(())
    }

    pub fn stop_raw_presence(&mut self) {
        if let Some(pattern) = self.presence_pattern.take() {
            self.bus.unsubscribe(&pattern);
        }
    }

    /// Whether raw-flavored traffic from this drone has been seen.
    pub fn raw_on_bus(&self) -> bool {
        self.raw_on_bus.load(Ordering::SeqCst)
    }

    /// Collect the distinct sender ids currently talking on the bus.
    pub fn discover_ids(&mut self) -> Result<(), BusError> {
        if let Some(pattern) = &self.id_pattern {
            return Err(BusError::SubscriptionConflict(pattern.clone()));
        }
        let pattern = id_discovery_topic();
        let discovered = self.discovered.clone();
        self.bus.subscribe(
            &pattern,
            Box::new(move |args| {
                let Some(id) = args.first().and_then(|a| a.parse::<u32>().ok()) else {
                    return;
                };
                let mut ids = discovered.lock().unwrap();
                if !ids.contains(&id) {
                    debug!(id, "drone discovered on bus");
                    ids.push(id);
                }
            }),
        )?;
        self.id_pattern = Some(pattern);
        Ok(())
    }

    pub fn stop_id_discovery(&mut self) {
        if let Some(pattern) = self.id_pattern.take() {
            self.bus.unsubscribe(&pattern);
        }
    }

    pub fn discovered_ids(&self) -> Vec<u32> {
        self.discovered.lock().unwrap().clone()
    }

    pub fn reset_discovered_ids(&self) {
        self.discovered.lock().unwrap().clear();
    }
}

impl Drop for BusTopicProtocol {
    fn drop(&mut self) {
        self.unsubscribe_raw();
        self.stop_raw_presence();
        self.stop_id_discovery();
    }
}
