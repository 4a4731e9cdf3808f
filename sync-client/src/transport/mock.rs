//! Mock transport for testing.
//!
//! Behaves like a minimal WAMP router: it answers HELLO, SUBSCRIBE,
//! UNSUBSCRIBE and CALL on its own, lets tests publish events or close the
//! session from the router side, and records what it receives.

use super::{Transport, TransportError};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_types::wamp::{Dict, MessageCode, CLOSE_GOODBYE_AND_OUT};
use sync_types::{Args, Kwargs, Message, Serialization, LAST_EVENT_PROCEDURE};
use tokio::sync::mpsc;

type Inbound = Result<Vec<u8>, TransportError>;

const WAIT_POLL: Duration = Duration::from_millis(10);
const WAIT_POLLS: u32 = 3000;

/// Scripted answer to a CALL.
#[derive(Debug, Clone, PartialEq)]
pub enum CallReply {
    /// Answer with RESULT.
    Result {
        /// Positional result.
        args: Args,
        /// Keyword result.
        kwargs: Kwargs,
    },
    /// Answer with ERROR.
    Error {
        /// Error URI.
        error: String,
        /// Error keyword arguments.
        kwargs: Kwargs,
    },
    /// Hold the call until [`MockTransport::answer_held`] answers it.
    Silent,
}

impl CallReply {
    /// RESULT carrying positional arguments only.
    pub fn result(args: Args) -> Self {
        CallReply::Result {
            args,
            kwargs: Kwargs::new(),
        }
    }

    /// ERROR with the given URI.
    pub fn error(error: &str) -> Self {
        CallReply::Error {
            error: error.to_string(),
            kwargs: Kwargs::new(),
        }
    }
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    inbound: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    serialization: Option<Serialization>,
    outbound: Option<mpsc::UnboundedSender<Inbound>>,
    connect_attempts: u32,
    failing_connects: u32,
    abort_next_hello: Option<String>,
    sessions: u64,
    next_id: u64,
    sent_messages: Vec<Message>,
    // topic -> router subscription id, for the current session
    subscriptions: HashMap<String, u64>,
    subscribe_counts: HashMap<String, usize>,
    unsubscribe_counts: HashMap<String, usize>,
    replies: HashMap<String, VecDeque<CallReply>>,
    calls: Vec<(String, Args)>,
    held: VecDeque<(String, u64)>,
    cancels: Vec<u64>,
}

impl MockTransportInner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Encode and queue a router-to-client message.
    fn deliver(&mut self, message: Message) {
        let (Some(serialization), Some(outbound)) = (self.serialization, &self.outbound) else {
            return;
        };
        let frame = serialization
            .encode(&message)
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
        let _ = outbound.send(frame);
    }

    fn answer(&mut self, request: u64, reply: CallReply) {
        match reply {
            CallReply::Result { args, kwargs } => self.deliver(Message::Result {
                request,
                details: Dict::new(),
                args,
                kwargs,
            }),
            CallReply::Error { error, kwargs } => self.deliver(Message::Error {
                request_type: MessageCode::Call as u64,
                request,
                details: Dict::new(),
                error,
                args: Args::new(),
                kwargs,
            }),
            CallReply::Silent => {}
        }
    }

    /// React to a client-to-router message the way a router would.
    fn route(&mut self, message: Message) {
        match message {
            Message::Hello { .. } => match self.abort_next_hello.take() {
                Some(reason) => self.deliver(Message::Abort {
                    details: Dict::new(),
                    reason,
                }),
                None => {
                    self.sessions += 1;
                    let mut details = Dict::new();
                    details.insert("roles".into(), json!({"broker": {}, "dealer": {}}));
                    self.deliver(Message::Welcome {
                        session: self.sessions,
                        details,
                    });
                }
            },
            Message::Subscribe { request, topic, .. } => {
                *self.subscribe_counts.entry(topic.clone()).or_default() += 1;
                let subscription = match self.subscriptions.get(&topic) {
                    Some(id) => *id,
                    None => {
                        let id = self.next_id();
                        self.subscriptions.insert(topic, id);
                        id
                    }
                };
                self.deliver(Message::Subscribed {
                    request,
                    subscription,
                });
            }
            Message::Unsubscribe {
                request,
                subscription,
            } => {
                let topic = self
                    .subscriptions
                    .iter()
                    .find(|(_, id)| **id == subscription)
                    .map(|(topic, _)| topic.clone());
                match topic {
                    Some(topic) => {
                        self.subscriptions.remove(&topic);
                        *self.unsubscribe_counts.entry(topic).or_default() += 1;
                        self.deliver(Message::Unsubscribed { request });
                    }
                    None => self.deliver(Message::Error {
                        request_type: MessageCode::Unsubscribe as u64,
                        request,
                        details: Dict::new(),
                        error: "wamp.error.no_such_subscription".into(),
                        args: Args::new(),
                        kwargs: Kwargs::new(),
                    }),
                }
            }
            Message::Call {
                request,
                procedure,
                args,
                ..
            } => {
                self.calls.push((procedure.clone(), args));
                let reply = self
                    .replies
                    .get_mut(&procedure)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(|| {
                        if procedure == LAST_EVENT_PROCEDURE {
                            CallReply::result(Args::new())
                        } else {
                            CallReply::error("wamp.error.no_such_procedure")
                        }
                    });
                match reply {
                    CallReply::Silent => self.held.push_back((procedure, request)),
                    reply => self.answer(request, reply),
                }
            }
            Message::Cancel { request, .. } => self.cancels.push(request),
            Message::Goodbye { reason, .. } if reason != CLOSE_GOODBYE_AND_OUT => {
                self.deliver(Message::goodbye(CLOSE_GOODBYE_AND_OUT));
            }
            _ => {}
        }
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Cause the next `count` connect() calls to fail.
    pub fn fail_connects(&self, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_connects = count;
    }

    /// Answer the next HELLO with ABORT instead of WELCOME.
    pub fn abort_next_hello(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.abort_next_hello = Some(reason.to_string());
    }

    /// Queue the answer to the next CALL of `procedure`.
    ///
    /// Unscripted calls to `meta.last_event` return an empty result; any
    /// other unscripted procedure fails with `wamp.error.no_such_procedure`.
    pub fn queue_reply(&self, procedure: &str, reply: CallReply) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .replies
            .entry(procedure.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Answer the oldest held CALL of `procedure`.
    ///
    /// Returns false if none was held.
    pub fn answer_held(&self, procedure: &str, reply: CallReply) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(at) = inner.held.iter().position(|(p, _)| p == procedure) else {
            return false;
        };
        let Some((_, request)) = inner.held.remove(at) else {
            return false;
        };
        inner.answer(request, reply);
        true
    }

    /// Publish an event to the client if it is subscribed to `topic`.
    ///
    /// Returns whether the event was delivered.
    pub fn publish(&self, topic: &str, args: Args, kwargs: Kwargs) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(subscription) = inner.subscriptions.get(topic).copied() else {
            return false;
        };
        let publication = inner.next_id();
        inner.deliver(Message::Event {
            subscription,
            publication,
            details: Dict::new(),
            args,
            kwargs,
        });
        true
    }

    /// Deliver a raw frame as if the router had sent it.
    pub fn inject_frame(&self, frame: Vec<u8>) {
        let inner = self.inner.lock().unwrap();
        if let Some(outbound) = &inner.outbound {
            let _ = outbound.send(Ok(frame));
        }
    }

    /// Send GOODBYE from the router.
    pub fn close_session(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.deliver(Message::goodbye(reason));
    }

    /// Drop the connection without a close handshake.
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.outbound = None;
        inner.subscriptions.clear();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of connect() calls so far, failed ones included.
    pub fn connect_attempts(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.connect_attempts
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_address.clone()
    }

    /// Get all messages the client sent, decoded.
    pub fn sent_messages(&self) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.clone()
    }

    /// Whether the current session holds a subscription to `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.subscriptions.contains_key(topic)
    }

    /// SUBSCRIBE requests received for `topic`.
    pub fn subscribe_count(&self, topic: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.subscribe_counts.get(topic).copied().unwrap_or(0)
    }

    /// Successful UNSUBSCRIBE requests received for `topic`.
    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.unsubscribe_counts.get(topic).copied().unwrap_or(0)
    }

    /// Every CALL received, as `(procedure, args)`.
    pub fn calls(&self) -> Vec<(String, Args)> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// CALLs received for `procedure`.
    pub fn call_count(&self, procedure: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.iter().filter(|(p, _)| p == procedure).count()
    }

    /// Request ids of every CANCEL received.
    pub fn cancels(&self) -> Vec<u64> {
        let inner = self.inner.lock().unwrap();
        inner.cancels.clone()
    }

    /// Poll `condition` until it holds, yielding to other tasks in between.
    ///
    /// Returns false if it still does not hold after 30 seconds of runtime
    /// time.
    pub async fn wait_for(&self, mut condition: impl FnMut(&MockTransport) -> bool) -> bool {
        for _ in 0..WAIT_POLLS {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
        condition(self)
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            inbound: Arc::clone(&self.inbound),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        address: &str,
        protocols: &[Serialization],
    ) -> Result<Serialization, TransportError> {
        let (serialization, receiver) = {
            let mut inner = self.inner.lock().unwrap();
            inner.connect_attempts += 1;
            inner.connected = false;
            inner.outbound = None;
            inner.subscriptions.clear();
            inner.held.clear();

            // Check for forced failure
            if inner.failing_connects > 0 {
                inner.failing_connects -= 1;
                return Err(TransportError::ConnectionFailed("connection refused".into()));
            }

            let serialization = protocols.first().copied().ok_or_else(|| {
                TransportError::ConnectionFailed("no common serialization".into())
            })?;

            let (sender, receiver) = mpsc::unbounded_channel();
            inner.connected = true;
            inner.connected_address = Some(address.to_string());
            inner.serialization = Some(serialization);
            inner.outbound = Some(sender);
            (serialization, receiver)
        };

        *self.inbound.lock().await = Some(receiver);
        Ok(serialization)
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        let serialization = inner.serialization.ok_or(TransportError::NotConnected)?;
        let message = serialization
            .decode(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        inner.sent_messages.push(message.clone());
        inner.route(message);
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        let receiver = inbound.as_mut().ok_or(TransportError::NotConnected)?;
        receiver
            .recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.outbound = None;
        inner.subscriptions.clear();
        Ok(())
    }
}
