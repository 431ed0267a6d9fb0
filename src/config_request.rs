//! Request/response correlation over a bus with no built-in correlation.
//!
//! The bus only offers broadcast publish and pattern subscribe, so each
//! outgoing configuration request is tagged with a monotonically increasing
//! id and answered through a single-shot subscription on that id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, never, select, Receiver};
use tracing::{debug, warn};

use crate::bus::BusClient;
use crate::error::ConfigError;

/// First request id ever allocated. Ids increase from here and are never
/// reused within a session, even across retries; the u64 counter has no
/// wraparound handling by policy (it cannot be exhausted in practice).
pub const REQUEST_ID_BASE: u64 = 42;

/// Length of the fixed scheme prefix on the settings locator field.
const SETTINGS_SCHEME_PREFIX_LEN: usize = 7;

/// The fields extracted from one CONFIG reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReply {
    pub request_id: u64,
    /// Settings resource locator, scheme prefix stripped.
    pub settings: String,
    pub aircraft_name: String,
}

/// Per-request lifecycle, tracked per request id so overlapping callers
/// never see each other's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    AwaitingReply,
    Resolved,
    TimedOut,
}

/// Correlates config requests with their single matching reply.
pub struct ConfigRequestProtocol {
    bus: Arc<dyn BusClient>,
    next_id: AtomicU64,
    states: Mutex<HashMap<u64, RequestState>>,
}

impl ConfigRequestProtocol {
    pub fn new(bus: Arc<dyn BusClient>) -> Self {
        Self {
            bus,
            next_id: AtomicU64::new(REQUEST_ID_BASE),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// State of one request. Ids never sent, and requests that ended
    /// cancelled or failed, report `Idle`.
    pub fn request_state(&self, request_id: u64) -> RequestState {
        self.states
            .lock()
            .unwrap()
            .get(&request_id)
            .copied()
            .unwrap_or(RequestState::Idle)
    }

    fn reply_pattern(request_id: u64) -> String {
        format!("^{request_id} [A-Za-z0-9]+ CONFIG (.*)")
    }

    /// Send one config request and wait up to `timeout` for its reply.
    ///
    /// No automatic retry: a timed-out caller may simply invoke this again
    /// and will get a fresh id with its own single-shot binding.
    pub fn send_and_await(
        &self,
        drone_id: u32,
        timeout: Duration,
    ) -> Result<ConfigReply, ConfigError> {
        self.send_and_await_cancellable(drone_id, timeout, &never())
    }

    /// Like [`send_and_await`](Self::send_and_await), but also resolves with
    /// `ConfigError::Cancelled` when `cancel` fires or is dropped, so a
    /// stopping session never leaves a caller hanging.
    pub fn send_and_await_cancellable(
        &self,
        drone_id: u32,
        timeout: Duration,
        cancel: &Receiver<()>,
    ) -> Result<ConfigReply, ConfigError> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pattern = Self::reply_pattern(request_id);
        let (reply_tx, reply_rx) = bounded::<ConfigReply>(1);

        self.bus.subscribe_once(
            &pattern,
            Box::new(move |args| match parse_reply_body(request_id, args) {
                Ok(reply) => {
                    let _ = reply_tx.try_send(reply);
                }
                Err(e) => warn!(request_id, error = %e, "discarding CONFIG reply"),
            }),
        )?;
        self.states
            .lock()
            .unwrap()
            .insert(request_id, RequestState::AwaitingReply);

        debug!(request_id, drone_id, "sending config request");
        if let Err(e) = self
            .bus
            .publish(&format!("calibrate {request_id} CONFIG_REQ {drone_id}"))
        {
            self.bus.unsubscribe(&pattern);
            self.states.lock().unwrap().remove(&request_id);
            return Err(e.into());
        }

        let result = select! {
            recv(reply_rx) -> msg => match msg {
                Ok(reply) => Ok(reply),
                // The binding consumed a match but produced nothing: the
                // reply arrived malformed.
                Err(_) => Err(ConfigError::MalformedReply(
                    "reply matched but could not be parsed".to_string(),
                )),
            },
            recv(cancel) -> _ => Err(ConfigError::Cancelled { request_id }),
            default(timeout) => Err(ConfigError::Timeout { request_id, timeout }),
        };

        // Tear the binding down exactly once whatever the outcome; a
        // late-arriving reply must have no observable effect.
        self.bus.unsubscribe(&pattern);
        let mut states = self.states.lock().unwrap();
        match &result {
            Ok(_) => {
                states.insert(request_id, RequestState::Resolved);
            }
            Err(ConfigError::Timeout { .. }) => {
                states.insert(request_id, RequestState::TimedOut);
            }
            Err(_) => {
                states.remove(&request_id);
            }
        }
        result
    }
}

/// Split a reply body on spaces and pull out the fixed positional fields:
/// field 4 is the settings locator (with its 7-character scheme prefix
/// stripped), field 6 is the aircraft name. This layout is a property of the
/// external message format and is preserved exactly.
fn parse_reply_body(request_id: u64, args: &[String]) -> Result<ConfigReply, ConfigError> {
    let body = args
        .first()
        .ok_or_else(|| ConfigError::MalformedReply("empty reply body".to_string()))?;
    let fields: Vec<&str> = body.split(' ').collect();
    if fields.len() <= 6 {
        return Err(ConfigError::MalformedReply(format!(
            "expected at least 7 fields, got {}",
            fields.len()
        )));
    }
    let settings = fields[4]
        .get(SETTINGS_SCHEME_PREFIX_LEN..)
        .ok_or_else(|| {
            ConfigError::MalformedReply(format!("settings locator too short: {:?}", fields[4]))
        })?
        .to_string();
    Ok(ConfigReply {
        request_id,
        settings,
        aircraft_name: fields[6].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use crossbeam_channel::unbounded;

    /// Subscribe a responder that answers CONFIG_REQ with a canned reply
    /// whose body embeds the request id in the aircraft name.
    fn respond_to_requests(bus: &Arc<LoopbackBus>) {
        let b = bus.clone();
        bus.subscribe(
            "^calibrate ([0-9]+) CONFIG_REQ ([0-9]+)",
            Box::new(move |args| {
                let reqid = &args[0];
                let body = format!(
                    "{reqid} server CONFIG 0 1 2 3 file://conf/settings.xml 5 AC{reqid}"
                );
                b.publish(&body).unwrap();
            }),
        )
        .unwrap();
    }

    #[test]
    fn test_request_resolves_with_positional_fields() {
        let bus = Arc::new(LoopbackBus::new());
        respond_to_requests(&bus);
        let protocol = ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>);

        let reply = protocol
            .send_and_await(9, Duration::from_millis(200))
            .unwrap();
        assert_eq!(reply.request_id, REQUEST_ID_BASE);
        assert_eq!(reply.settings, "conf/settings.xml");
        assert_eq!(reply.aircraft_name, "AC42");
        assert_eq!(
            protocol.request_state(REQUEST_ID_BASE),
            RequestState::Resolved
        );
        // The single-shot binding is gone; only the responder remains.
        assert_eq!(bus.binding_count(), 1);
    }

    #[test]
    fn test_ids_increase_across_retries() {
        let bus = Arc::new(LoopbackBus::new());
        respond_to_requests(&bus);
        let protocol = ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>);

        let a = protocol.send_and_await(9, Duration::from_millis(200)).unwrap();
        let b = protocol.send_and_await(9, Duration::from_millis(200)).unwrap();
        assert_eq!(a.request_id, 42);
        assert_eq!(b.request_id, 43);
        assert_eq!(b.aircraft_name, "AC43");
    }

    #[test]
    fn test_timeout_removes_binding_and_late_reply_is_inert() {
        let bus = Arc::new(LoopbackBus::new());
        let protocol = ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>);

        let err = protocol
            .send_and_await(9, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Timeout { request_id: 42, .. }));
        assert_eq!(protocol.request_state(42), RequestState::TimedOut);
        assert_eq!(bus.binding_count(), 0);

        // A reply arriving after the deadline has no observable effect.
        bus.publish("42 server CONFIG 0 1 2 3 file://late.xml 5 Late")
            .unwrap();
        assert_eq!(bus.binding_count(), 0);
        assert_eq!(protocol.request_state(42), RequestState::TimedOut);
    }

    #[test]
    fn test_overlapping_requests_report_state_per_id() {
        let bus = Arc::new(LoopbackBus::new());
        let protocol = Arc::new(ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>));

        // One long-lived request held open while a second one times out.
        let (cancel_tx, cancel_rx) = unbounded::<()>();
        let p = protocol.clone();
        let waiter = std::thread::spawn(move || {
            p.send_and_await_cancellable(9, Duration::from_secs(30), &cancel_rx)
        });
        std::thread::sleep(Duration::from_millis(50));

        let err = protocol
            .send_and_await(9, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Timeout { request_id: 43, .. }));

        // The second request's outcome must not clobber the first's.
        assert_eq!(protocol.request_state(42), RequestState::AwaitingReply);
        assert_eq!(protocol.request_state(43), RequestState::TimedOut);
        assert_eq!(protocol.request_state(44), RequestState::Idle); // never sent

        drop(cancel_tx);
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, ConfigError::Cancelled { request_id: 42 }));
        assert_eq!(protocol.request_state(42), RequestState::Idle);
    }

    #[test]
    fn test_cancel_resolves_waiter() {
        let bus = Arc::new(LoopbackBus::new());
        let protocol = Arc::new(ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>));
        let (cancel_tx, cancel_rx) = unbounded::<()>();

        let p = protocol.clone();
        let waiter = std::thread::spawn(move || {
            p.send_and_await_cancellable(9, Duration::from_secs(30), &cancel_rx)
        });
        std::thread::sleep(Duration::from_millis(50));
        cancel_tx.send(()).unwrap();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, ConfigError::Cancelled { .. }));
        assert_eq!(bus.binding_count(), 0);
    }

    #[test]
    fn test_out_of_order_replies_resolve_their_own_ids() {
        let bus = Arc::new(LoopbackBus::new());
        let protocol = Arc::new(ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>));

        // Collect CONFIG_REQ ids without answering yet.
        let pending = Arc::new(Mutex::new(Vec::<u64>::new()));
        let sink = pending.clone();
        bus.subscribe(
            "^calibrate ([0-9]+) CONFIG_REQ ([0-9]+)",
            Box::new(move |args| {
                sink.lock().unwrap().push(args[0].parse().unwrap());
            }),
        )
        .unwrap();

        let spawn_waiter = |p: Arc<ConfigRequestProtocol>| {
            std::thread::spawn(move || p.send_and_await(9, Duration::from_secs(5)))
        };
        let w1 = spawn_waiter(protocol.clone());
        std::thread::sleep(Duration::from_millis(50));
        let w2 = spawn_waiter(protocol.clone());
        std::thread::sleep(Duration::from_millis(50));

        let mut ids = pending.lock().unwrap().clone();
        assert_eq!(ids.len(), 2);
        // Answer in reverse request order.
        ids.reverse();
        for id in ids {
            bus.publish(&format!(
                "{id} server CONFIG 0 1 2 3 file://conf.xml 5 AC{id}"
            ))
            .unwrap();
        }

        for w in [w1, w2] {
            let reply = w.join().unwrap().unwrap();
            // Each waiter resolved with the reply carrying its own id.
            assert_eq!(reply.aircraft_name, format!("AC{}", reply.request_id));
        }
    }

    #[test]
    fn test_malformed_reply_surfaces_as_error() {
        let bus = Arc::new(LoopbackBus::new());
        let b = bus.clone();
        bus.subscribe(
            "^calibrate ([0-9]+) CONFIG_REQ ([0-9]+)",
            Box::new(move |args| {
                // Too few fields for the fixed positional layout.
                b.publish(&format!("{} server CONFIG oops", args[0])).unwrap();
            }),
        )
        .unwrap();
        let protocol = ConfigRequestProtocol::new(bus.clone() as Arc<dyn BusClient>);

        let err = protocol
            .send_and_await(9, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedReply(_)));
    }

    #[test]
    fn test_short_settings_locator_is_malformed() {
        let args = vec!["0 1 2 3 x 5 Name".to_string()];
        let err = parse_reply_body(1, &args).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedReply(_)));
    }
}
