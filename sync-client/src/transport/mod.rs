//! Transport abstraction for Proper Sync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented, and moves whole
//! frames of already-encoded WAMP messages:
//! - `connect()` opens a connection, negotiating one of the offered
//!   serializations
//! - `send()` transmits one frame
//! - `recv()` receives one frame
//! - `close()` gracefully terminates
//!
//! `send()` and `recv()` may be called concurrently from different tasks.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let serialization = transport.connect("ws://router/ws", &[Serialization::Json]).await?;
//! transport.send(&serialization.encode(&Message::hello("realm1"))?).await?;
//! let welcome = serialization.decode(&transport.recv().await?)?;
//! ```

mod mock;
mod websocket;

pub use mock::{CallReply, MockTransport};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use sync_types::Serialization;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for sending and receiving WAMP frames.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the router at `address`, offering `protocols` in order of
    /// preference. Returns the serialization the router accepted.
    async fn connect(
        &self,
        address: &str,
        protocols: &[Serialization],
    ) -> Result<Serialization, TransportError>;

    /// Send one frame over the connection.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one frame from the connection.
    ///
    /// Waits until a frame is available. Returns
    /// [`TransportError::ConnectionClosed`] once the connection has ended.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
