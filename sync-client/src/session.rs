//! Transport Session.
//!
//! [`Session::start`] spawns a supervisor task that drives the pure
//! [`ConnectionState`] machine from sync-core: it performs connect attempts
//! with backoff, runs one reader and one writer task per established WAMP
//! session, and publishes every transition on a replayable status channel.
//!
//! # Status stream
//!
//! [`Session::status`] returns a `watch` receiver. New observers see the most
//! recent [`SessionStatus`] immediately. `Closed` and `Failed` are final: the
//! supervisor exits after publishing either.
//!
//! # Handles
//!
//! A [`SessionHandle`] represents one established WAMP session. It owns the
//! outbound queue, the request-id counter, the pending request table and the
//! subscription fan-out table. When the session ends every pending request
//! fails and every subscription feed ends.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sync_core::{is_explicit_close, Action, ConnectionState, Event, SessionEvent};
use sync_types::wamp::Dict;
use sync_types::{Args, Kwargs, Message, Serialization, Topic, TopicEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::transport::Transport;

/// Observable session status.
#[derive(Debug, Clone)]
pub enum SessionStatus {
    /// A connect attempt is in progress or scheduled.
    Connecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A WAMP session is established.
    Connected(SessionHandle),
    /// The session was closed on request. Final.
    Closed,
    /// The session failed. Final.
    Failed(ConnectionError),
}

impl SessionStatus {
    /// Whether no further status follows.
    pub fn is_final(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Failed(_))
    }
}

/// A running session. Cheap to clone; dropping the last clone closes it.
#[derive(Debug, Clone)]
pub struct Session {
    status: watch::Receiver<SessionStatus>,
    shutdown: Arc<watch::Sender<bool>>,
    config: Arc<ConnectionConfig>,
}

impl Session {
    /// Start connecting over `transport` and supervise the session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(config: ConnectionConfig, transport: T) -> Self {
        let config = Arc::new(config);
        let (status_tx, status) = watch::channel(SessionStatus::Connecting { attempt: 1 });
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(supervise(
            Arc::new(transport),
            Arc::clone(&config),
            status_tx,
            shutdown_rx,
        ));

        Self {
            status,
            shutdown: Arc::new(shutdown),
            config,
        }
    }

    /// Subscribe to status changes. The current status is available at once
    /// and counts as seen, so `changed()` waits for the next one.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        let mut status = self.status.clone();
        status.borrow_and_update();
        status
    }

    /// Connection configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Wait for the latest established session.
    ///
    /// # Errors
    ///
    /// Returns the final error once the session is closed or failed.
    pub async fn connected(&self) -> Result<SessionHandle, ConnectionError> {
        latest_handle(&mut self.status.clone()).await
    }

    /// Wait until the session reaches a final status.
    pub async fn settled(&self) -> SessionStatus {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if current.is_final() {
                    return current.clone();
                }
            }
            if status.changed().await.is_err() {
                return status.borrow().clone();
            }
        }
    }

    /// Request an orderly shutdown (GOODBYE `wamp.close.normal`).
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Wait on `status` until a handle is available or the session is over.
pub(crate) async fn latest_handle(
    status: &mut watch::Receiver<SessionStatus>,
) -> Result<SessionHandle, ConnectionError> {
    loop {
        match &*status.borrow_and_update() {
            SessionStatus::Connected(handle) => return Ok(handle.clone()),
            SessionStatus::Closed => return Err(ConnectionError::Closed),
            SessionStatus::Failed(error) => return Err(error.clone()),
            SessionStatus::Connecting { .. } => {}
        }
        if status.changed().await.is_err() {
            return match &*status.borrow() {
                SessionStatus::Connected(handle) => Ok(handle.clone()),
                SessionStatus::Failed(error) => Err(error.clone()),
                _ => Err(ConnectionError::Closed),
            };
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// An established session and its I/O tasks.
struct Live {
    handle: SessionHandle,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Live {
    fn end(self, error: ConnectionError) {
        self.reader.abort();
        self.writer.abort();
        self.handle.fail_all(error);
    }
}

type Report = (u64, Event);

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
}

async fn supervise<T: Transport>(
    transport: Arc<T>,
    config: Arc<ConnectionConfig>,
    status: watch::Sender<SessionStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let policy = config.retry_policy();
    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<Report>();
    let mut state = ConnectionState::new();
    let mut queue = VecDeque::from([Event::ConnectRequested]);
    let mut live: Option<Live> = None;
    let mut retry_at: Option<Instant> = None;
    let mut generation = 0u64;
    let mut shutdown_seen = false;

    loop {
        while let Some(event) = queue.pop_front() {
            let end_error = match &event {
                Event::ConnectionLost { reason } => ConnectionError::ConnectionLost(reason.clone()),
                Event::GoodbyeReceived { reason } if !is_explicit_close(reason) => {
                    ConnectionError::ConnectionLost(reason.clone())
                }
                _ => ConnectionError::Closed,
            };

            let (next, actions) = state.on_event(event, &policy);
            state = next;

            for action in actions {
                match action {
                    Action::Connect { attempt } => {
                        generation += 1;
                        debug!(attempt, server = %config.server, "connecting");
                        let attempt_result = tokio::select! {
                            result = establish(&transport, &config, generation, report_tx.clone()) => Some(result),
                            _ = shutdown_requested(&mut shutdown), if !shutdown_seen => None,
                        };
                        match attempt_result {
                            Some(Ok(established)) => {
                                let session = established.handle.session_id();
                                live = Some(established);
                                queue.push_back(Event::ConnectSucceeded { session });
                            }
                            Some(Err(error)) => {
                                let _ = transport.close().await;
                                queue.push_back(Event::ConnectFailed { error });
                            }
                            None => {
                                shutdown_seen = true;
                                queue.push_back(Event::DisconnectRequested);
                            }
                        }
                    }
                    Action::Disconnect => {
                        if let Some(established) = live.take() {
                            established.end(end_error.clone());
                        }
                        let _ = transport.close().await;
                    }
                    Action::SendGoodbye { reason } => {
                        if let Some(established) = &live {
                            let goodbye = Message::goodbye(&reason);
                            match established.handle.serialization().encode(&goodbye) {
                                Ok(frame) => {
                                    if let Err(e) = transport.send(&frame).await {
                                        debug!(error = %e, "goodbye not sent");
                                    }
                                }
                                Err(e) => warn!(error = %e, "failed to encode goodbye"),
                            }
                        }
                    }
                    Action::StartRetryTimer { delay } => {
                        debug!(?delay, "retry scheduled");
                        retry_at = Some(Instant::now() + delay);
                    }
                    Action::CancelRetry => retry_at = None,
                    Action::Emit(transition) => publish(&status, transition, live.as_ref()),
                }
            }
        }

        if state.is_terminal() || matches!(state, ConnectionState::Disconnected) {
            debug!("session supervisor stopped");
            return;
        }

        tokio::select! {
            Some((origin, event)) = report_rx.recv() => {
                if origin == generation && live.is_some() {
                    queue.push_back(event);
                }
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                queue.push_back(Event::RetryTimer);
            }
            _ = shutdown_requested(&mut shutdown), if !shutdown_seen => {
                shutdown_seen = true;
                queue.push_back(Event::DisconnectRequested);
            }
        }
    }
}

fn publish(status: &watch::Sender<SessionStatus>, transition: SessionEvent, live: Option<&Live>) {
    let next = match transition {
        SessionEvent::Connecting { attempt } => {
            info!(attempt, "connecting to router");
            SessionStatus::Connecting { attempt }
        }
        SessionEvent::AttemptFailed { attempt, error } => {
            warn!(attempt, %error, "connect attempt failed");
            return;
        }
        SessionEvent::Connected { session } => match live {
            Some(established) => {
                info!(session, serialization = ?established.handle.serialization(), "session established");
                SessionStatus::Connected(established.handle.clone())
            }
            None => return,
        },
        SessionEvent::Lost { reason } => {
            warn!(%reason, "session lost, reconnecting");
            return;
        }
        SessionEvent::Closed => {
            info!("session closed");
            SessionStatus::Closed
        }
        SessionEvent::Failed(reason) => {
            let error = ConnectionError::from(reason);
            warn!(%error, "session failed");
            SessionStatus::Failed(error)
        }
    };
    status.send_replace(next);
}

/// Connect the transport and perform HELLO/WELCOME.
async fn establish<T: Transport>(
    transport: &Arc<T>,
    config: &ConnectionConfig,
    generation: u64,
    reports: mpsc::UnboundedSender<Report>,
) -> Result<Live, String> {
    let serialization = transport
        .connect(&config.server, &config.serializations)
        .await
        .map_err(|e| e.to_string())?;

    let hello = serialization
        .encode(&Message::hello(&config.realm))
        .map_err(|e| e.to_string())?;
    transport.send(&hello).await.map_err(|e| e.to_string())?;

    let welcome = async {
        loop {
            let frame = transport.recv().await.map_err(|e| e.to_string())?;
            match serialization.decode(&frame) {
                Ok(Message::Welcome { session, .. }) => return Ok(session),
                Ok(Message::Abort { reason, .. }) => return Err(format!("aborted: {}", reason)),
                Ok(other) => debug!(code = ?other.code(), "ignored before welcome"),
                Err(e) => return Err(e.to_string()),
            }
        }
    };
    let session = tokio::time::timeout(config.call_timeout(), welcome)
        .await
        .map_err(|_| "no welcome from router".to_string())??;

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle::new(session, serialization, outbound);
    let reader = tokio::spawn(read_loop(
        Arc::clone(transport),
        handle.clone(),
        generation,
        reports.clone(),
    ));
    let writer = tokio::spawn(write_loop(
        Arc::clone(transport),
        serialization,
        outbound_rx,
        generation,
        reports,
    ));

    Ok(Live {
        handle,
        reader,
        writer,
    })
}

async fn write_loop<T: Transport>(
    transport: Arc<T>,
    serialization: Serialization,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    generation: u64,
    reports: mpsc::UnboundedSender<Report>,
) {
    while let Some(message) = outbound.recv().await {
        let frame = match serialization.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, code = ?message.code(), "dropping unencodable message");
                continue;
            }
        };
        debug!(code = ?message.code(), "send");
        if let Err(e) = transport.send(&frame).await {
            let _ = reports.send((
                generation,
                Event::ConnectionLost {
                    reason: e.to_string(),
                },
            ));
            return;
        }
    }
}

async fn read_loop<T: Transport>(
    transport: Arc<T>,
    handle: SessionHandle,
    generation: u64,
    reports: mpsc::UnboundedSender<Report>,
) {
    let event = loop {
        let frame = match transport.recv().await {
            Ok(frame) => frame,
            Err(e) => {
                break Event::ConnectionLost {
                    reason: e.to_string(),
                }
            }
        };
        let message = match handle.serialization().decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "undecodable frame from router");
                continue;
            }
        };
        debug!(code = ?message.code(), "recv");
        match message {
            Message::Goodbye { reason, .. } => break Event::GoodbyeReceived { reason },
            Message::Abort { reason, .. } => break Event::ConnectionLost { reason },
            other => handle.dispatch(other),
        }
    };
    let _ = reports.send((generation, event));
}

// =============================================================================
// Session handle
// =============================================================================

type Payload = (Args, Kwargs);

struct Subscriber {
    local: u64,
    sink: mpsc::UnboundedSender<Payload>,
}

enum Pending {
    Subscribe {
        topic: String,
        local: u64,
        sink: mpsc::UnboundedSender<Payload>,
        reply: oneshot::Sender<Result<u64, ConnectionError>>,
    },
    Unsubscribe {
        subscription: u64,
    },
    Call {
        procedure: String,
        call_args: Args,
        reply: oneshot::Sender<Result<TopicEvent, ConnectionError>>,
    },
}

struct HandleInner {
    session_id: u64,
    serialization: Serialization,
    outbound: mpsc::UnboundedSender<Message>,
    next_request: AtomicU64,
    next_local: AtomicU64,
    pending: DashMap<u64, Pending>,
    // router subscription id -> local subscribers sharing it
    subscriptions: DashMap<u64, Vec<Subscriber>>,
    closed: AtomicBool,
    ended: Mutex<Option<ConnectionError>>,
}

/// One established WAMP session, shared by every consumer.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.inner.session_id)
            .field("serialization", &self.inner.serialization)
            .finish()
    }
}

impl SessionHandle {
    fn new(
        session_id: u64,
        serialization: Serialization,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                session_id,
                serialization,
                outbound,
                next_request: AtomicU64::new(1),
                next_local: AtomicU64::new(1),
                pending: DashMap::new(),
                subscriptions: DashMap::new(),
                closed: AtomicBool::new(false),
                ended: Mutex::new(None),
            }),
        }
    }

    /// Router-assigned session id.
    pub fn session_id(&self) -> u64 {
        self.inner.session_id
    }

    /// Negotiated serialization.
    pub fn serialization(&self) -> Serialization {
        self.inner.serialization
    }

    /// Whether this session has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to `topic` on this session.
    ///
    /// The feed yields raw payloads until it is dropped or the session ends.
    /// Dropping it releases the router subscription once no other local
    /// subscriber shares it.
    pub async fn subscribe(&self, topic: &Topic) -> Result<TopicFeed, ConnectionError> {
        let request = self.next_request();
        let local = self.inner.next_local.fetch_add(1, Ordering::SeqCst);
        let (sink, events) = mpsc::unbounded_channel();
        let (reply, response) = oneshot::channel();

        self.insert_pending(
            request,
            Pending::Subscribe {
                topic: topic.to_string(),
                local,
                sink,
                reply,
            },
        )?;
        if let Err(e) = self.send(Message::Subscribe {
            request,
            options: Dict::new(),
            topic: topic.to_string(),
        }) {
            self.inner.pending.remove(&request);
            return Err(e);
        }

        let subscription = response.await.map_err(|_| self.ended())??;
        debug!(%topic, subscription, "subscribed");
        Ok(TopicFeed {
            handle: self.clone(),
            subscription,
            local,
            events,
        })
    }

    /// Call `procedure` on this session and decode the result.
    ///
    /// No deadline is applied here. Dropping the future before the result
    /// arrives cancels the call.
    pub async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<TopicEvent, ConnectionError> {
        let request = self.next_request();
        let (reply, response) = oneshot::channel();

        self.insert_pending(
            request,
            Pending::Call {
                procedure: procedure.to_string(),
                call_args: args.clone(),
                reply,
            },
        )?;
        let _guard = CallGuard {
            handle: self,
            request,
        };
        self.send(Message::Call {
            request,
            options: Dict::new(),
            procedure: procedure.to_string(),
            args,
            kwargs,
        })?;

        response.await.map_err(|_| self.ended())?
    }

    fn next_request(&self) -> u64 {
        self.inner.next_request.fetch_add(1, Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> Result<(), ConnectionError> {
        self.inner.outbound.send(message).map_err(|_| self.ended())
    }

    fn ended(&self) -> ConnectionError {
        self.inner
            .ended
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ConnectionError::ConnectionLost("session ended".into()))
    }

    fn insert_pending(&self, request: u64, pending: Pending) -> Result<(), ConnectionError> {
        self.inner.pending.insert(request, pending);
        if self.is_closed() {
            self.inner.pending.remove(&request);
            return Err(self.ended());
        }
        Ok(())
    }

    /// Route one inbound message to its pending request or subscribers.
    fn dispatch(&self, message: Message) {
        match message {
            Message::Event {
                subscription,
                args,
                kwargs,
                ..
            } => match self.inner.subscriptions.get(&subscription) {
                Some(subscribers) => {
                    for subscriber in subscribers.iter() {
                        let _ = subscriber.sink.send((args.clone(), kwargs.clone()));
                    }
                }
                None => debug!(subscription, "event for unknown subscription"),
            },
            Message::Subscribed {
                request,
                subscription,
            } => {
                if let Some((_, Pending::Subscribe { topic, local, sink, reply })) =
                    self.inner.pending.remove(&request)
                {
                    if self.is_unsubscribing(subscription) {
                        // The router handed back an id our UNSUBSCRIBE is about to drop.
                        debug!(%topic, subscription, "subscription being released, subscribing again");
                        self.resubscribe(topic, local, sink, reply);
                        return;
                    }
                    self.inner
                        .subscriptions
                        .entry(subscription)
                        .or_default()
                        .push(Subscriber { local, sink });
                    if reply.send(Ok(subscription)).is_err() {
                        // Subscriber gave up while waiting.
                        self.release(subscription, local);
                    }
                }
            }
            Message::Unsubscribed { request } => {
                self.inner.pending.remove(&request);
            }
            Message::Result {
                request,
                args,
                kwargs,
                ..
            } => match self.inner.pending.remove(&request) {
                Some((
                    _,
                    Pending::Call {
                        procedure,
                        call_args,
                        reply,
                    },
                )) => {
                    let event = TopicEvent::decode_rpc(&procedure, &call_args, &args, &kwargs);
                    let _ = reply.send(Ok(event));
                }
                _ => debug!(request, "result for unknown request ignored"),
            },
            Message::Error {
                request,
                error,
                kwargs,
                ..
            } => match self.inner.pending.remove(&request) {
                Some((_, Pending::Call { procedure, reply, .. })) => {
                    let _ = reply.send(Err(ConnectionError::Remote {
                        procedure,
                        error,
                        details: kwargs,
                    }));
                }
                Some((_, Pending::Subscribe { topic, reply, .. })) => {
                    let _ = reply.send(Err(ConnectionError::Remote {
                        procedure: topic,
                        error,
                        details: kwargs,
                    }));
                }
                Some((_, Pending::Unsubscribe { subscription })) => {
                    debug!(request, subscription, %error, "unsubscribe refused")
                }
                None => debug!(request, "error for unknown request ignored"),
            },
            other => debug!(code = ?other.code(), "unexpected message ignored"),
        }
    }

    /// Drop one local subscriber; unsubscribe when it was the last.
    fn release(&self, subscription: u64, local: u64) {
        let now_empty = match self.inner.subscriptions.get_mut(&subscription) {
            Some(mut subscribers) => {
                subscribers.retain(|s| s.local != local);
                subscribers.is_empty()
            }
            None => false,
        };
        if !now_empty {
            return;
        }
        self.inner
            .subscriptions
            .remove_if(&subscription, |_, subscribers| subscribers.is_empty());
        if self.is_closed() {
            return;
        }

        let request = self.next_request();
        self.inner
            .pending
            .insert(request, Pending::Unsubscribe { subscription });
        debug!(subscription, "unsubscribing");
        if self
            .send(Message::Unsubscribe {
                request,
                subscription,
            })
            .is_err()
        {
            self.inner.pending.remove(&request);
        }
    }

    fn is_unsubscribing(&self, subscription: u64) -> bool {
        self.inner.pending.iter().any(|entry| {
            matches!(entry.value(), Pending::Unsubscribe { subscription: s } if *s == subscription)
        })
    }

    /// Send SUBSCRIBE again for a subscriber whose first answer is stale.
    fn resubscribe(
        &self,
        topic: String,
        local: u64,
        sink: mpsc::UnboundedSender<Payload>,
        reply: oneshot::Sender<Result<u64, ConnectionError>>,
    ) {
        if reply.is_closed() {
            return;
        }
        let request = self.next_request();
        let message = Message::Subscribe {
            request,
            options: Dict::new(),
            topic: topic.clone(),
        };
        let pending = Pending::Subscribe {
            topic,
            local,
            sink,
            reply,
        };
        // On failure the reply is dropped and the subscriber sees the session end.
        if self.insert_pending(request, pending).is_ok() && self.send(message).is_err() {
            self.inner.pending.remove(&request);
        }
    }

    /// End the session: fail pending requests and close every feed.
    fn fail_all(&self, error: ConnectionError) {
        *self.inner.ended.lock().unwrap() = Some(error.clone());
        self.inner.closed.store(true, Ordering::SeqCst);

        let requests: Vec<u64> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        for request in requests {
            match self.inner.pending.remove(&request) {
                Some((_, Pending::Call { reply, .. })) => {
                    let _ = reply.send(Err(error.clone()));
                }
                Some((_, Pending::Subscribe { reply, .. })) => {
                    let _ = reply.send(Err(error.clone()));
                }
                _ => {}
            }
        }
        self.inner.subscriptions.clear();
    }
}

/// Cancels an unanswered call when dropped.
struct CallGuard<'a> {
    handle: &'a SessionHandle,
    request: u64,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.handle.inner.pending.remove(&self.request).is_some() {
            debug!(request = self.request, "cancelling call");
            let _ = self.handle.send(Message::Cancel {
                request: self.request,
                options: Dict::new(),
            });
        }
    }
}

/// Raw payloads of one topic on one session.
pub struct TopicFeed {
    handle: SessionHandle,
    subscription: u64,
    local: u64,
    events: mpsc::UnboundedReceiver<Payload>,
}

impl TopicFeed {
    /// Next `(args, kwargs)` payload, or `None` once the session ended.
    pub async fn next(&mut self) -> Option<(Args, Kwargs)> {
        self.events.recv().await
    }

    /// The session this feed belongs to.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for TopicFeed {
    fn drop(&mut self) {
        self.handle.release(self.subscription, self.local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CallReply, MockTransport};
    use serde_json::json;
    use std::time::Duration;
    use sync_types::wamp::{CLOSE_GOODBYE_AND_OUT, CLOSE_NORMAL};
    use sync_types::{MetaEvent, LAST_EVENT_PROCEDURE};

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            server: "ws://router.test/ws".into(),
            ..ConnectionConfig::default()
        }
    }

    fn start(mock: &MockTransport) -> Session {
        Session::start(config(), mock.clone())
    }

    fn goodbyes(mock: &MockTransport) -> Vec<String> {
        mock.sent_messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Goodbye { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }

    // ===========================================
    // Lifecycle Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn connects_and_publishes_handle() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let handle = session.connected().await.unwrap();
        assert_eq!(handle.session_id(), 1);
        assert_eq!(handle.serialization(), Serialization::MsgPack);
        assert_eq!(mock.connected_address().as_deref(), Some("ws://router.test/ws"));
        assert!(matches!(
            &mock.sent_messages()[0],
            Message::Hello { realm, .. } if realm == "realm1"
        ));

        // Late observers see the current handle at once.
        let status = session.status();
        assert!(matches!(&*status.borrow(), SessionStatus::Connected(h) if h.session_id() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_exhaust_retries() {
        let mock = MockTransport::new();
        mock.fail_connects(100);
        let session = start(&mock);

        let status = session.settled().await;
        assert!(matches!(
            status,
            SessionStatus::Failed(ConnectionError::MaxRetriesExceeded { attempts: 5 })
        ));
        assert_eq!(mock.connect_attempts(), 5);

        // A sixth attempt is never issued.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.connect_attempts(), 5);
        assert!(matches!(
            session.connected().await,
            Err(ConnectionError::MaxRetriesExceeded { attempts: 5 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_retry_bound() {
        let mock = MockTransport::new();
        mock.fail_connects(4);
        let session = start(&mock);

        let handle = session.connected().await.unwrap();
        assert_eq!(handle.session_id(), 1);
        assert_eq!(mock.connect_attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_counts_as_failed_attempt() {
        let mock = MockTransport::new();
        mock.abort_next_hello("wamp.error.no_such_realm");
        let session = start(&mock);

        session.connected().await.unwrap();
        assert_eq!(mock.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_router_goodbye_closes_cleanly() {
        let mock = MockTransport::new();
        let session = start(&mock);
        session.connected().await.unwrap();

        mock.close_session(CLOSE_NORMAL);

        assert!(matches!(session.settled().await, SessionStatus::Closed));
        assert_eq!(goodbyes(&mock), vec![CLOSE_GOODBYE_AND_OUT.to_string()]);
        assert!(matches!(session.connected().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn other_goodbye_is_connection_lost() {
        let mock = MockTransport::new();
        let session = start(&mock);
        session.connected().await.unwrap();

        mock.close_session("wamp.close.system_shutdown");

        match session.settled().await {
            SessionStatus::Failed(ConnectionError::ConnectionLost(reason)) => {
                assert_eq!(reason, "wamp.close.system_shutdown")
            }
            other => panic!("Expected ConnectionLost, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_transport_is_connection_lost() {
        let mock = MockTransport::new();
        let session = start(&mock);
        session.connected().await.unwrap();

        mock.drop_connection();

        assert!(matches!(
            session.settled().await,
            SessionStatus::Failed(ConnectionError::ConnectionLost(_))
        ));
        assert_eq!(mock.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_loss_when_enabled() {
        let mock = MockTransport::new();
        let session = Session::start(
            ConnectionConfig {
                reconnect_on_loss: true,
                ..config()
            },
            mock.clone(),
        );
        let first = session.connected().await.unwrap();

        mock.drop_connection();

        let mut status = session.status();
        let second = match &*status
            .wait_for(|s| matches!(s, SessionStatus::Connected(h) if h.session_id() != first.session_id()))
            .await
            .unwrap()
        {
            SessionStatus::Connected(handle) => handle.clone(),
            other => panic!("Expected Connected, got {:?}", other),
        };
        assert_eq!(first.session_id(), 1);
        assert_eq!(second.session_id(), 2);
        assert!(first.is_closed());
        assert_eq!(mock.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_receiver_waits_for_next_change() {
        let mock = MockTransport::new();
        let session = start(&mock);
        session.connected().await.unwrap();

        let mut status = session.status();
        assert!(!status.has_changed().unwrap());

        mock.close_session("wamp.close.system_shutdown");
        status.changed().await.unwrap();
        assert!(!matches!(&*status.borrow(), SessionStatus::Connected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn local_close_says_goodbye() {
        let mock = MockTransport::new();
        let session = start(&mock);
        session.connected().await.unwrap();

        session.close();

        assert!(matches!(session.settled().await, SessionStatus::Closed));
        assert_eq!(goodbyes(&mock), vec![CLOSE_NORMAL.to_string()]);
        assert!(!mock.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_clone_closes() {
        let mock = MockTransport::new();
        let session = start(&mock);
        session.connected().await.unwrap();
        let mut status = session.status();

        drop(session);

        while !status.borrow_and_update().is_final() {
            if status.changed().await.is_err() {
                break;
            }
        }
        assert!(matches!(&*status.borrow(), SessionStatus::Closed));
    }

    // ===========================================
    // Handle Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn handle_call_decodes_result() {
        let mock = MockTransport::new();
        mock.queue_reply(
            LAST_EVENT_PROCEDURE,
            CallReply::result(vec![json!({"short_name": "10"})]),
        );
        let session = start(&mock);
        let handle = session.connected().await.unwrap();

        let event = handle
            .call(
                LAST_EVENT_PROCEDURE,
                vec![json!("routes.10"), json!("routes.10")],
                Kwargs::new(),
            )
            .await
            .unwrap();
        match event {
            TopicEvent::Meta(MetaEvent::LastEvent { topic, args, .. }) => {
                assert_eq!(topic, "routes.10");
                assert_eq!(args.len(), 1);
            }
            other => panic!("Expected last event, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handle_call_surfaces_remote_error() {
        let mock = MockTransport::new();
        let session = start(&mock);
        let handle = session.connected().await.unwrap();

        let err = handle
            .call("agency.nothing", vec![], Kwargs::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Remote { ref procedure, ref error, .. }
                if procedure == "agency.nothing" && error == "wamp.error.no_such_procedure"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_calls_fail_when_session_is_lost() {
        let mock = MockTransport::new();
        mock.queue_reply("agency.routes", CallReply::Silent);
        let session = start(&mock);
        let handle = session.connected().await.unwrap();

        let call = tokio::spawn({
            let handle = handle.clone();
            async move { handle.call("agency.routes", vec![], Kwargs::new()).await }
        });
        assert!(mock.wait_for(|m| m.call_count("agency.routes") == 1).await);
        mock.drop_connection();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::ConnectionLost(_))));
        assert!(handle
            .call("agency.routes", vec![], Kwargs::new())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_is_cancelled() {
        let mock = MockTransport::new();
        mock.queue_reply("agency.routes", CallReply::Silent);
        let session = start(&mock);
        let handle = session.connected().await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            handle.call("agency.routes", vec![], Kwargs::new()),
        )
        .await;
        assert!(outcome.is_err());
        assert!(mock.wait_for(|m| m.cancels().len() == 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn feeds_share_one_router_subscription() {
        let mock = MockTransport::new();
        let session = start(&mock);
        let handle = session.connected().await.unwrap();
        let topic = Topic::parse("vehicles.4004").unwrap();

        let mut first = handle.subscribe(&topic).await.unwrap();
        let mut second = handle.subscribe(&topic).await.unwrap();
        assert!(mock.publish("vehicles.4004", vec![json!("4004")], Kwargs::new()));

        assert_eq!(first.next().await.unwrap().0, vec![json!("4004")]);
        assert_eq!(second.next().await.unwrap().0, vec![json!("4004")]);

        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.unsubscribe_count("vehicles.4004"), 0);

        drop(second);
        assert!(mock.wait_for(|m| m.unsubscribe_count("vehicles.4004") == 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_racing_last_release_subscribes_again() {
        let mock = MockTransport::new();
        let session = start(&mock);
        let handle = session.connected().await.unwrap();
        let topic = Topic::parse("routes.10").unwrap();
        let old = handle.subscribe(&topic).await.unwrap();

        // SUBSCRIBE reaches the router ahead of the old feed's UNSUBSCRIBE,
        // so it is answered with the id about to be dropped.
        let pending = handle.subscribe(&topic);
        tokio::pin!(pending);
        assert!(futures_util::poll!(&mut pending).is_pending());
        drop(old);

        let mut feed = pending.await.unwrap();
        assert_eq!(mock.subscribe_count("routes.10"), 3);
        assert_eq!(mock.unsubscribe_count("routes.10"), 1);
        assert!(mock.publish("routes.10", vec![json!("10")], Kwargs::new()));
        assert_eq!(feed.next().await.unwrap().0, vec![json!("10")]);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_ends_with_session() {
        let mock = MockTransport::new();
        let session = start(&mock);
        let handle = session.connected().await.unwrap();
        let mut feed = handle.subscribe(&Topic::parse("routes.10").unwrap()).await.unwrap();

        mock.drop_connection();

        assert!(feed.next().await.is_none());
        assert!(feed.handle().is_closed());
    }
}
