//! WebSocket transport.
//!
//! Speaks WAMP over WebSocket: the offered serializations go out as
//! `Sec-WebSocket-Protocol` values, msgpack frames travel as binary messages
//! and JSON frames as text messages.

use super::{Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use sync_types::Serialization;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PROTOCOL_HEADER: &str = "sec-websocket-protocol";

/// WAMP-over-WebSocket transport.
#[derive(Default)]
pub struct WebSocketTransport {
    sink: tokio::sync::Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    stream: tokio::sync::Mutex<Option<SplitStream<WsStream>>>,
    serialization: Mutex<Option<Serialization>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        address: &str,
        protocols: &[Serialization],
    ) -> Result<Serialization, TransportError> {
        let offered = protocols
            .iter()
            .map(Serialization::subprotocol)
            .collect::<Vec<_>>()
            .join(", ");

        let mut request = address
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let header = HeaderValue::from_str(&offered)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert(PROTOCOL_HEADER, header);

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // A router that does not echo a subprotocol gets our first choice.
        let serialization = match response.headers().get(PROTOCOL_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(Serialization::from_subprotocol)
                .filter(|s| protocols.contains(s))
                .ok_or_else(|| {
                    TransportError::ConnectionFailed(format!(
                        "router chose unsupported subprotocol {:?}",
                        value
                    ))
                })?,
            None => *protocols.first().ok_or_else(|| {
                TransportError::ConnectionFailed("no serialization offered".into())
            })?,
        };

        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        *self.serialization.lock().unwrap() = Some(serialization);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(%address, protocol = serialization.subprotocol(), "websocket connected");
        Ok(serialization)
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let serialization = (*self.serialization.lock().unwrap()).ok_or(TransportError::NotConnected)?;
        let message = if serialization.is_binary() {
            WsMessage::Binary(data.to_vec())
        } else {
            let text = String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            WsMessage::Text(text)
        };

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut stream = self.stream.lock().await;
        let stream = stream.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(bytes),
                Some(Ok(WsMessage::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            sink.close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}
