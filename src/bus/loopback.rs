//! In-process bus backend.
//!
//! Delivers published messages synchronously on the publisher's thread, in
//! subscription order. Used by the test suite and the replay CLI; the
//! subscription bookkeeping (conflict on re-bind, single-shot removal before
//! the handler runs) matches what a real transport client must guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use regex::Regex;

use super::{BusClient, MessageCallback};
use crate::error::BusError;

struct Binding {
    pattern: String,
    regex: Regex,
    callback: Arc<dyn Fn(&[String]) + Send + Sync>,
    once: bool,
}

/// An in-process [`BusClient`] connecting every subscriber in the same
/// address space.
#[derive(Default)]
pub struct LoopbackBus {
    bindings: Mutex<Vec<Binding>>,
    closed: AtomicBool,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the connection. Subsequent operations fail with
    /// `TransportUnavailable`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.bindings.lock().unwrap().clear();
    }

    /// Number of live bindings. Test hook: lets callers assert that
    /// single-shot and unsubscribed patterns are really gone.
    pub fn binding_count(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }

    fn check_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::TransportUnavailable(
                "loopback bus closed".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn bind(&self, pattern: &str, callback: MessageCallback, once: bool) -> Result<(), BusError> {
        self.check_open()?;
        let regex = Regex::new(pattern).map_err(|source| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let mut bindings = self.bindings.lock().unwrap();
        if bindings.iter().any(|b| b.pattern == pattern) {
            return Err(BusError::SubscriptionConflict(pattern.to_string()));
        }
        bindings.push(Binding {
            pattern: pattern.to_string(),
            regex,
            callback: Arc::from(callback),
            once,
        });
        Ok(())
    }
}

impl BusClient for LoopbackBus {
    fn subscribe(&self, pattern: &str, callback: MessageCallback) -> Result<(), BusError> {
        self.bind(pattern, callback, false)
    }

    fn subscribe_once(&self, pattern: &str, callback: MessageCallback) -> Result<(), BusError> {
        self.bind(pattern, callback, true)
    }

    fn unsubscribe(&self, pattern: &str) {
        self.bindings.lock().unwrap().retain(|b| b.pattern != pattern);
    }

    fn publish(&self, message: &str) -> Result<(), BusError> {
        self.check_open()?;

        // Collect matches and drop the lock before invoking callbacks, so a
        // handler may publish or (un)subscribe without deadlocking. Matched
        // single-shot bindings are removed here, before their handler runs.
        let matched: Vec<(Arc<dyn Fn(&[String]) + Send + Sync>, Vec<String>)> = {
            let mut bindings = self.bindings.lock().unwrap();
            let mut matched = Vec::new();
            bindings.retain(|b| {
                let Some(captures) = b.regex.captures(message) else {
                    return true;
                };
                let args: Vec<String> = captures
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                matched.push((b.callback.clone(), args));
                !b.once
            });
            matched
        };

        for (callback, args) in matched {
            callback(&args);
        }
        Ok(())
    }
}
