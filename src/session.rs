//! Calibration session orchestration.
//!
//! One session wires a stream filter to the bus, funnels every delivery
//! through a single ordered event queue consumed by one worker thread, runs
//! the liveness watchdog, and enforces the wall-clock run budget.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use crate::aircraft::Aircraft;
use crate::bus::BusClient;
use crate::config_request::ConfigRequestProtocol;
use crate::error::{BusError, ConfigError, SessionError};
use crate::filter::StreamFilter;
use crate::sample::{CalibrationKind, SampleVector};
use crate::telemetry::{self, TelemetryListener};
use crate::topic::BusTopicProtocol;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Configured,
    Listening,
    Stopped,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            SessionState::Configured => "configured",
            SessionState::Listening => "listening",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Whether valid samples have arrived within the liveness timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Notified on every link state *transition*, never repeatedly for an
/// ongoing outage.
pub type LinkObserver = Box<dyn Fn(LinkState) + Send>;

/// Session tuning. The run budget is a cooperative deadline, not a hard
/// interrupt of in-flight work.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Link is declared down after this long without a valid sample.
    pub liveness_timeout: Duration,
    /// Unattended sessions auto-stop after this long.
    pub run_budget: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(1),
            run_budget: Duration::from_secs(150),
        }
    }
}

enum SessionEvent {
    Sample(SampleVector),
    Stop,
}

/// One calibration run: kind, drone id, filter, and the protocol objects
/// composed around a shared bus.
///
/// All methods take `&self`, so a session can be shared behind an `Arc` and
/// stopped from any thread, including while a [`fetch_config`] wait is
/// outstanding (the waiter then observes a cancellation, not a hang).
///
/// [`fetch_config`]: Self::fetch_config
pub struct CalibrationSession<F: StreamFilter + 'static> {
    bus: Arc<dyn BusClient>,
    config: SessionConfig,
    drone_id: u32,
    kind: CalibrationKind,
    filter: Arc<Mutex<F>>,
    topic: Arc<Mutex<BusTopicProtocol>>,
    config_protocol: ConfigRequestProtocol,
    telemetry: Arc<Mutex<Option<TelemetryListener>>>,
    aircraft: Arc<Mutex<Aircraft>>,
    state: Arc<Mutex<SessionState>>,
    link: Arc<Mutex<LinkState>>,
    events_tx: Mutex<Option<Sender<SessionEvent>>>,
    cancel_tx: Arc<Mutex<Option<Sender<()>>>>,
    cancel_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Shared teardown path: cancels outstanding config waits, unbinds every
/// subscription, and marks the session stopped. Every step is idempotent,
/// so the worker (on budget expiry) and `stop()` may both run it.
fn teardown(
    drone_id: u32,
    cancel_tx: &Mutex<Option<Sender<()>>>,
    topic: &Mutex<BusTopicProtocol>,
    telemetry: &Mutex<Option<TelemetryListener>>,
    state: &Mutex<SessionState>,
) {
    // Dropping the cancel sender resolves any outstanding send_and_await
    // with Cancelled, now and forever.
    cancel_tx.lock().unwrap().take();
    {
        let mut topic = topic.lock().unwrap();
        topic.unsubscribe_raw();
        topic.stop_raw_presence();
    }
    if let Some(telemetry) = telemetry.lock().unwrap().as_mut() {
        telemetry.stop();
    }
    let mut state = state.lock().unwrap();
    if *state != SessionState::Stopped {
        *state = SessionState::Stopped;
        info!(drone_id, "calibration session stopped");
    }
}

impl<F: StreamFilter + 'static> CalibrationSession<F> {
    pub fn new(
        bus: Arc<dyn BusClient>,
        drone_id: u32,
        kind: CalibrationKind,
        filter: F,
        config: SessionConfig,
    ) -> Self {
        let (cancel_tx, cancel_rx) = unbounded();
        Self {
            topic: Arc::new(Mutex::new(BusTopicProtocol::new(bus.clone(), drone_id))),
            config_protocol: ConfigRequestProtocol::new(bus.clone()),
            bus,
            config,
            drone_id,
            kind,
            filter: Arc::new(Mutex::new(filter)),
            telemetry: Arc::new(Mutex::new(None)),
            aircraft: Arc::new(Mutex::new(Aircraft::default())),
            state: Arc::new(Mutex::new(SessionState::Configured)),
            link: Arc::new(Mutex::new(LinkState::Down)),
            events_tx: Mutex::new(None),
            cancel_tx: Arc::new(Mutex::new(Some(cancel_tx))),
            cancel_rx,
            worker: Mutex::new(None),
        }
    }

    pub fn drone_id(&self) -> u32 {
        self.drone_id
    }

    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.lock().unwrap()
    }

    /// Shared handle to the filter. Remains readable after the session
    /// stops, so a final result can be read post-hoc.
    pub fn filter(&self) -> Arc<Mutex<F>> {
        self.filter.clone()
    }

    /// Snapshot of what is known about the aircraft, folding in the live
    /// raw-presence and telemetry-mode observations.
    pub fn aircraft(&self) -> Aircraft {
        let mut ac = self.aircraft.lock().unwrap().clone();
        ac.raw_data_present = self.topic.lock().unwrap().raw_on_bus();
        if let Some(telemetry) = self.telemetry.lock().unwrap().as_ref() {
            if let Some(mode) = telemetry.mode() {
                ac.mode = Some(mode);
            }
        }
        ac
    }

    /// Transition CONFIGURED → LISTENING: bind the raw stream, spawn the
    /// event consumer, start the liveness watchdog.
    pub fn start(&self, on_link: Option<LinkObserver>) -> Result<(), SessionError> {
        {
            let state = self.state.lock().unwrap();
            if *state != SessionState::Configured {
                return Err(SessionError::InvalidState {
                    op: "start",
                    state: state.as_str(),
                });
            }
        }

        let (events_tx, events_rx) = unbounded();
        {
            let mut topic = self.topic.lock().unwrap();
            let sample_tx = events_tx.clone();
            topic.subscribe_raw(self.kind, move |sample| {
                // Never blocks: the delivery path only enqueues.
                let _ = sample_tx.send(SessionEvent::Sample(sample));
            })?;
            // Presence watching is passive and harmless to keep on for the
            // whole run.
            topic.watch_raw_presence()?;
        }

        let worker = SessionWorker {
            drone_id: self.drone_id,
            filter: self.filter.clone(),
            topic: self.topic.clone(),
            telemetry: self.telemetry.clone(),
            cancel_tx: self.cancel_tx.clone(),
            state: self.state.clone(),
            link: self.link.clone(),
            liveness_timeout: self.config.liveness_timeout,
            run_budget: self.config.run_budget,
            on_link,
        };
        *self.worker.lock().unwrap() = Some(std::thread::spawn(move || worker.run(events_rx)));
        *self.events_tx.lock().unwrap() = Some(events_tx);

        *self.state.lock().unwrap() = SessionState::Listening;
        info!(drone_id = self.drone_id, kind = %self.kind, "calibration session listening");
        Ok(())
    }

    /// Transition LISTENING → STOPPED. Safe to call at any time, in any
    /// state, repeatedly; outstanding config requests observe a
    /// cancellation, and the filter's accumulated state stays readable.
    pub fn stop(&self) {
        if let Some(events_tx) = self.events_tx.lock().unwrap().take() {
            let _ = events_tx.send(SessionEvent::Stop);
        }
        self.join_worker();

        // The worker tears down on exit, but a never-started session has no
        // worker; run the (idempotent) teardown here as well.
        teardown(
            self.drone_id,
            &self.cancel_tx,
            &self.topic,
            &self.telemetry,
            &self.state,
        );
    }

    /// Block until the worker exits on its own (run budget reached or an
    /// external stop), then finish teardown.
    pub fn wait(&self) {
        self.join_worker();
        self.stop();
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("session worker panicked");
            }
        }
    }

    /// A lost transport is unrecoverable; stop the session before the
    /// error reaches the caller.
    fn stop_on_transport_loss(&self, err: &BusError) {
        if matches!(err, BusError::TransportUnavailable(_)) {
            warn!(drone_id = self.drone_id, "bus transport lost, stopping session");
            self.stop();
        }
    }

    /// Request the aircraft's config and fold the reply into the
    /// descriptor. The caller may retry after a timeout; each attempt uses
    /// a fresh request id.
    pub fn fetch_config(&self, timeout: Duration) -> Result<(), ConfigError> {
        let reply = self
            .config_protocol
            .send_and_await_cancellable(self.drone_id, timeout, &self.cancel_rx)
            .map_err(|e| {
                if let ConfigError::Bus(bus_err) = &e {
                    self.stop_on_transport_loss(bus_err);
                }
                e
            })?;
        self.aircraft.lock().unwrap().apply_config(&reply);
        Ok(())
    }

    /// Fire-and-forget telemetry mode change; observe the effect through
    /// [`start_telemetry_listener`](Self::start_telemetry_listener).
    pub fn set_telemetry_mode(&self, mode: f64) -> Result<(), BusError> {
        telemetry::send_mode_command(self.bus.as_ref(), self.drone_id, mode).map_err(|e| {
            self.stop_on_transport_loss(&e);
            e
        })
    }

    /// Start the passive DL_VALUES listener. `value_index` is 0-based.
    pub fn start_telemetry_listener(&self, value_index: usize) -> Result<(), BusError> {
        let result = {
            let mut slot = self.telemetry.lock().unwrap();
            if slot.is_some() {
                return Err(BusError::SubscriptionConflict(
                    telemetry::dl_values_topic(),
                ));
            }
            let mut listener =
                TelemetryListener::new(self.bus.clone(), self.drone_id, value_index);
            listener.start().map(|()| *slot = Some(listener))
        };
        match result {
            Ok(()) => {
                self.aircraft.lock().unwrap().telemetry_index = Some(value_index);
                Ok(())
            }
            Err(e) => {
                self.stop_on_transport_loss(&e);
                Err(e)
            }
        }
    }
}

impl<F: StreamFilter + 'static> Drop for CalibrationSession<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The single consumer of a session's event queue. Owns the liveness
/// watchdog; all filter mutation happens here, so the incremental aggregate
/// updates see no interleaving.
struct SessionWorker<F: StreamFilter> {
    drone_id: u32,
    filter: Arc<Mutex<F>>,
    topic: Arc<Mutex<BusTopicProtocol>>,
    telemetry: Arc<Mutex<Option<TelemetryListener>>>,
    cancel_tx: Arc<Mutex<Option<Sender<()>>>>,
    state: Arc<Mutex<SessionState>>,
    link: Arc<Mutex<LinkState>>,
    liveness_timeout: Duration,
    run_budget: Duration,
    on_link: Option<LinkObserver>,
}

impl<F: StreamFilter> SessionWorker<F> {
    fn set_link(&self, new: LinkState) {
        *self.link.lock().unwrap() = new;
        if let Some(observer) = &self.on_link {
            observer(new);
        }
    }

    fn run(self, events: Receiver<SessionEvent>) {
        let deadline = Instant::now() + self.run_budget;
        let mut last_valid = Instant::now();
        let mut link_up = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("run budget reached, session auto-stopping");
                break;
            }
            // While the link is down there is no liveness deadline left to
            // miss; wait for the next event or the session deadline.
            let wake = if link_up {
                deadline.min(last_valid + self.liveness_timeout)
            } else {
                deadline
            };

            match events.recv_timeout(wake.saturating_duration_since(now)) {
                Ok(SessionEvent::Sample(sample)) => {
                    self.filter.lock().unwrap().add(sample);
                    if sample.is_valid {
                        last_valid = Instant::now();
                        if !link_up {
                            link_up = true;
                            info!("telemetry link up");
                            self.set_link(LinkState::Up);
                        }
                    }
                }
                Ok(SessionEvent::Stop) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if link_up && Instant::now() >= last_valid + self.liveness_timeout {
                        link_up = false;
                        warn!("no valid sample within liveness timeout, link down");
                        self.set_link(LinkState::Down);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Full teardown, not just a state flip: after a budget expiry the
        // subscriptions must not keep feeding a queue nobody drains.
        teardown(
            self.drone_id,
            &self.cancel_tx,
            &self.topic,
            &self.telemetry,
            &self.state,
        );
    }
}
