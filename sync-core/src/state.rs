//! Session lifecycle state machine for Proper Sync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the WAMP session lifecycle. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, sending GOODBYE, sleeping) is performed by
//! sync-client, not by this module. This enables instant unit testing without
//! network mocks.

use std::time::Duration;
use sync_types::wamp::{CLOSE_GOODBYE_AND_OUT, CLOSE_NORMAL};

/// Retry bounds and backoff shape for connect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts before giving up, counting the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per further failure.
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter: Duration,
    /// Reconnect after an unexpected loss instead of failing.
    pub reconnect_on_loss: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(1000),
            reconnect_on_loss: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt`.
    ///
    /// Formula: min(max_delay, base_delay * 2^(attempt - 1)) + random(0..=jitter)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);
        base + random_jitter(self.jitter)
    }
}

/// Why a session ended in failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// An established session closed unexpectedly.
    ConnectionLost(String),
    /// Every allowed connect attempt failed.
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
    },
}

/// Whether a close reason marks a requested, orderly shutdown.
pub fn is_explicit_close(reason: &str) -> bool {
    reason == CLOSE_NORMAL || reason == CLOSE_GOODBYE_AND_OUT
}

/// Session state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, none requested.
    Disconnected,
    /// Connect attempt in flight, or waiting for the backoff timer before it.
    Connecting {
        /// 1-based number of the current attempt.
        attempt: u32,
    },
    /// WAMP session established.
    Connected {
        /// Router-assigned session id.
        session: u64,
    },
    /// Terminal failure, never left.
    Failed(FailureReason),
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: Event, policy: &RetryPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, Event::ConnectRequested) => start_attempt(1),

            // From Connecting
            (Self::Connecting { .. }, Event::ConnectSucceeded { session }) => (
                Self::Connected { session },
                vec![Action::Emit(SessionEvent::Connected { session })],
            ),
            (Self::Connecting { attempt }, Event::ConnectFailed { error }) => {
                if attempt >= policy.max_attempts {
                    let reason = FailureReason::MaxRetriesExceeded { attempts: attempt };
                    (
                        Self::Failed(reason.clone()),
                        vec![
                            Action::Disconnect,
                            Action::Emit(SessionEvent::Failed(reason)),
                        ],
                    )
                } else {
                    (
                        Self::Connecting {
                            attempt: attempt + 1,
                        },
                        vec![
                            Action::Emit(SessionEvent::AttemptFailed { attempt, error }),
                            Action::StartRetryTimer {
                                delay: policy.backoff(attempt),
                            },
                        ],
                    )
                }
            }
            (Self::Connecting { attempt }, Event::RetryTimer) => start_attempt(attempt),
            (Self::Connecting { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelRetry,
                    Action::Disconnect,
                    Action::Emit(SessionEvent::Closed),
                ],
            ),

            // From Connected
            (Self::Connected { .. }, Event::GoodbyeReceived { reason }) => {
                let mut actions = vec![Action::SendGoodbye {
                    reason: CLOSE_GOODBYE_AND_OUT.into(),
                }];
                if is_explicit_close(&reason) {
                    actions.push(Action::Disconnect);
                    actions.push(Action::Emit(SessionEvent::Closed));
                    (Self::Disconnected, actions)
                } else {
                    let (state, mut lost) = lose_session(reason, policy);
                    actions.append(&mut lost);
                    (state, actions)
                }
            }
            (Self::Connected { .. }, Event::ConnectionLost { reason }) => {
                lose_session(reason, policy)
            }
            (Self::Connected { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::SendGoodbye {
                        reason: CLOSE_NORMAL.into(),
                    },
                    Action::Disconnect,
                    Action::Emit(SessionEvent::Closed),
                ],
            ),

            // Failed is terminal; everything else is an invalid transition.
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a session is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    /// Check if the state machine has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn start_attempt(attempt: u32) -> (ConnectionState, Vec<Action>) {
    (
        ConnectionState::Connecting { attempt },
        vec![
            Action::Emit(SessionEvent::Connecting { attempt }),
            Action::Connect { attempt },
        ],
    )
}

fn lose_session(reason: String, policy: &RetryPolicy) -> (ConnectionState, Vec<Action>) {
    if policy.reconnect_on_loss {
        let (state, mut actions) = start_attempt(1);
        actions.insert(0, Action::Disconnect);
        actions.insert(1, Action::Emit(SessionEvent::Lost { reason }));
        (state, actions)
    } else {
        let failure = FailureReason::ConnectionLost(reason);
        (
            ConnectionState::Failed(failure.clone()),
            vec![Action::Disconnect, Action::Emit(SessionEvent::Failed(failure))],
        )
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Session start requested.
    ConnectRequested,
    /// Transport connected and the router sent WELCOME.
    ConnectSucceeded {
        /// Router-assigned session id.
        session: u64,
    },
    /// Transport connect, HELLO or WELCOME failed (including ABORT).
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Backoff timer fired.
    RetryTimer,
    /// Router sent GOODBYE.
    GoodbyeReceived {
        /// Close reason URI.
        reason: String,
    },
    /// Transport failed or the router aborted an established session.
    ConnectionLost {
        /// Reason for the loss.
        reason: String,
    },
    /// Local close requested.
    DisconnectRequested,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport and perform HELLO/WELCOME.
    Connect {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Tear down the transport and the current session handle.
    Disconnect,
    /// Send GOODBYE on the current session.
    SendGoodbye {
        /// Close reason URI.
        reason: String,
    },
    /// Start the backoff timer before the next attempt.
    StartRetryTimer {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Cancel any pending backoff timer.
    CancelRetry,
    /// Report a transition to observers.
    Emit(SessionEvent),
}

/// Transitions reported to the session's observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connect attempt is starting.
    Connecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A connect attempt failed and another will follow.
    AttemptFailed {
        /// Which attempt failed.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// Session established.
    Connected {
        /// Router-assigned session id.
        session: u64,
    },
    /// Established session lost; reconnecting.
    Lost {
        /// Reason for the loss.
        reason: String,
    },
    /// Orderly shutdown completed.
    Closed,
    /// Terminal failure.
    Failed(FailureReason),
}

/// Random jitter between zero and `max`, inclusive.
fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}
