//! # sync-core
//!
//! Pure logic for Proper Sync (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms behind the
//! synchronization layer without any network I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, timers) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arrival;
pub mod canonical;
pub mod members;
pub mod state;

pub use arrival::{Arrival, Lifecycle};
pub use canonical::{reduce, CanonicalStop};
pub use members::MemberDiff;
pub use state::{
    is_explicit_close, Action, ConnectionState, Event, FailureReason, RetryPolicy, SessionEvent,
};
