//! Error taxonomy for the bus protocol layer and the calibration engine.

use std::time::Duration;
use thiserror::Error;

/// Errors from the bus collaborator and subscription bookkeeping.
#[derive(Error, Debug)]
pub enum BusError {
    /// The subscription pattern is not a valid regular expression.
    #[error("invalid subscription pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// Attempt to bind a pattern that is already bound. Re-subscribing must
    /// fail fast rather than silently double-deliver.
    #[error("pattern already bound: {0:?}")]
    SubscriptionConflict(String),
    /// The bus connection is gone. No automatic reconnect is attempted.
    #[error("bus transport unavailable: {0}")]
    TransportUnavailable(String),
}

/// A captured numeric field in a delivered message failed to parse.
///
/// Never fatal: the sample is recorded with `is_valid = false` and still
/// counts toward the window, though it does not reset the liveness watchdog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed numeric field {field:?} in raw sample")]
pub struct SampleParseError {
    pub field: String,
}

/// Errors from request/response correlation over the bus.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No reply arrived within the deadline. Recoverable: the caller may
    /// retry with a fresh request id.
    #[error("no CONFIG reply for request {request_id} within {timeout:?}")]
    Timeout { request_id: u64, timeout: Duration },
    /// The owning session stopped while the request was outstanding.
    #[error("config request {request_id} cancelled")]
    Cancelled { request_id: u64 },
    /// A reply matched the correlation pattern but its body did not carry
    /// the expected positional fields.
    #[error("malformed CONFIG reply: {0}")]
    MalformedReply(String),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors from calibration session orchestration.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot {op} while session is {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
}
