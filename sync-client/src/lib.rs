//! # sync-client
//!
//! Client library for Proper Sync real-time transit data.
//!
//! Applications open a [`Session`] to a WAMP router, subscribe to topics
//! through the [`Connection`] façade and keep live [`model`] objects in step
//! with the backend.
//!
//! ## Features
//!
//! - **Session lifecycle**: bounded connect retries with backoff, explicit
//!   close semantics, pending request failure on loss
//! - **Subscriptions**: decoded [`TopicEvent`](sync_types::TopicEvent)
//!   streams that follow the latest session and unsubscribe on drop
//! - **Mutable models**: routes, stations and vehicles with shared identity,
//!   lease-based liveness and last-event seeding
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock)
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use std::path::Path;
//! use sync_client::{ClientConfig, Connection, Session, WebSocketTransport};
//!
//! let config = ClientConfig::from_file(Path::new("proper.toml"))?;
//! let session = Session::start(config.connection, WebSocketTransport::new());
//!
//! let mut vehicles = session.subscribe(&"vehicles.4004".parse()?);
//! while let Some(event) = vehicles.next().await {
//!     println!("{:?}", event?);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arrival;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod session;
pub mod transport;

pub use config::{AgencyConfig, ClientConfig, ConfigError, ConnectionConfig, ModelsConfig};
pub use connection::{Connection, Subscription};
pub use error::{ConnectionError, ModelError};
pub use model::{
    EntityKey, ModelDelegate, ModelLease, ModelRegistry, MutableRoute, MutableStation,
    MutableVehicle, RouteState, StationState, SyncPhase, VehicleState,
};
pub use session::{Session, SessionHandle, SessionStatus, TopicFeed};
pub use transport::{CallReply, MockTransport, Transport, TransportError, WebSocketTransport};
