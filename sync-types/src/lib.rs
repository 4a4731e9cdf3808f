//! # sync-types
//!
//! Wire-level types for Proper Sync.
//!
//! This crate provides the foundational types used across all Proper Sync crates:
//! - [`Topic`], [`Namespace`] - Publish/subscribe channel naming
//! - [`Message`], [`Serialization`] - WAMP v2 framing over msgpack or JSON
//! - [`Route`], [`Station`], [`Vehicle`] - Immutable entity snapshots
//! - [`TopicEvent`] - The typed event codec
//! - [`DecodeError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod snapshot;
mod topic;
pub mod wamp;

pub use error::DecodeError;
pub use event::{
    AgencyEvent, MetaEvent, RouteEvent, StationEvent, TopicEvent, VehicleEvent,
    LAST_EVENT_PROCEDURE,
};
pub use snapshot::{Model, Point, Route, Station, Vehicle};
pub use topic::{unqualify, Namespace, Topic};
pub use wamp::{Args, Kwargs, Message, Serialization};
