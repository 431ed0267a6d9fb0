//! Bus collaborator interface.
//!
//! The transport (presence discovery, wire framing, process delivery) is an
//! external capability; this trait is the surface the protocol layer codes
//! against. Backends: [`LoopbackBus`] for tests and replay, a real transport
//! elsewhere.

mod loopback;

pub use loopback::LoopbackBus;

use crate::error::BusError;

/// Callback invoked once per matching delivered message.
///
/// The arguments are the pattern's capture groups in order (group 0, the
/// whole match, is not included). Invoked from transport-owned context:
/// implementations must be cheap and must not block.
pub type MessageCallback = Box<dyn Fn(&[String]) + Send + Sync>;

/// A regex-addressed broadcast bus client.
///
/// One transport session per client; implementations keep per-pattern
/// bookkeeping so that binding an already-bound pattern fails fast with
/// [`BusError::SubscriptionConflict`] rather than double-delivering.
pub trait BusClient: Send + Sync {
    /// Bind `pattern`; every matching published message invokes `callback`
    /// exactly once, in delivery order.
    fn subscribe(&self, pattern: &str, callback: MessageCallback) -> Result<(), BusError>;

    /// Bind `pattern` for at most one match. The binding removes itself
    /// before the callback runs, so a retry can never race a second match.
    fn subscribe_once(&self, pattern: &str, callback: MessageCallback) -> Result<(), BusError>;

    /// Remove a binding. No-op if the pattern was never bound; safe to call
    /// twice.
    fn unsubscribe(&self, pattern: &str);

    /// Broadcast a message to every subscriber whose pattern matches.
    fn publish(&self, message: &str) -> Result<(), BusError>;
}
