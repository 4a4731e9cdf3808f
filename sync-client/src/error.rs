//! Error types for sessions, calls and mutable models.

use sync_core::FailureReason;
use sync_types::Kwargs;
use thiserror::Error;

/// Errors delivered to subscribers and callers.
///
/// Cloneable, since one session failure fans out to every consumer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    /// The established session closed unexpectedly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Every allowed connect attempt failed.
    #[error("gave up after {attempts} connect attempts")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
    },

    /// The session was closed on request.
    #[error("session closed")]
    Closed,

    /// A call was not answered before its deadline.
    #[error("call to {procedure} timed out")]
    Timeout {
        /// Procedure called.
        procedure: String,
    },

    /// The router or callee answered a request with ERROR.
    #[error("{procedure} failed: {error}")]
    Remote {
        /// Procedure called, or topic subscribed.
        procedure: String,
        /// Error URI.
        error: String,
        /// Error keyword arguments.
        details: Kwargs,
    },

    /// A payload did not decode to a known event.
    #[error("could not parse event on {topic}: {reason}")]
    EventParseFailure {
        /// Topic or procedure.
        topic: String,
        /// What did not match.
        reason: String,
    },
}

impl ConnectionError {
    /// Whether retrying the failed step can help.
    ///
    /// Session-level failures are terminal for the session instance.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::EventParseFailure { .. }
                | ConnectionError::Timeout { .. }
                | ConnectionError::Remote { .. }
        )
    }
}

impl From<FailureReason> for ConnectionError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::ConnectionLost(reason) => ConnectionError::ConnectionLost(reason),
            FailureReason::MaxRetriesExceeded { attempts } => {
                ConnectionError::MaxRetriesExceeded { attempts }
            }
        }
    }
}

/// Errors raised by mutable models.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Snapshot identifier does not match the model.
    #[error("cannot apply snapshot {actual:?} to model {expected:?}")]
    ApplyFailure {
        /// The model's identifier.
        expected: String,
        /// The snapshot's identifier.
        actual: String,
    },

    /// A route's itinerary names a station missing from its station set.
    #[error("itinerary of route {route:?} references station {station:?} outside its station set")]
    StateInconsistency {
        /// Route identifier.
        route: String,
        /// Offending station identifier.
        station: String,
    },

    /// Synchronization failed at the session level.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
