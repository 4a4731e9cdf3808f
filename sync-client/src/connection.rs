//! Session Façade.
//!
//! [`Connection`] is the seam every model and consumer talks through. The
//! [`Session`] implementation follows the latest [`SessionHandle`]
//! (re-subscribing after a reconnect) and gives every call its own deadline.
//!
//! [`SessionHandle`]: crate::session::SessionHandle

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use sync_types::{Args, Kwargs, Topic, TopicEvent};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::session::{latest_handle, Session, SessionStatus};

/// Subscribe and call, independent of which session is currently live.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Follow `topic`. Dropping the returned stream unsubscribes.
    fn subscribe(&self, topic: &Topic) -> Subscription;

    /// Call `procedure` and wait for its single result.
    async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<TopicEvent, ConnectionError>;
}

/// Sending half of a [`Subscription`].
pub type SubscriptionSender = mpsc::UnboundedSender<Result<TopicEvent, ConnectionError>>;

/// A stream of decoded events on one topic.
///
/// Ends after a terminal error or when the session closes.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    events: mpsc::UnboundedReceiver<Result<TopicEvent, ConnectionError>>,
}

impl Subscription {
    /// Create a subscription fed by the returned sender.
    ///
    /// The producer can watch `SubscriptionSender::closed` to learn when the
    /// consumer went away.
    pub fn channel(topic: Topic) -> (SubscriptionSender, Subscription) {
        let (sender, events) = mpsc::unbounded_channel();
        (sender, Subscription { topic, events })
    }

    /// Topic being followed.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<TopicEvent, ConnectionError>> {
        self.events.recv().await
    }
}

impl Stream for Subscription {
    type Item = Result<TopicEvent, ConnectionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[async_trait]
impl Connection for Session {
    fn subscribe(&self, topic: &Topic) -> Subscription {
        let (events, subscription) = Subscription::channel(topic.clone());
        tokio::spawn(follow(topic.clone(), self.status(), events));
        subscription
    }

    async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<TopicEvent, ConnectionError> {
        let mut status = self.status();
        let call = async {
            let handle = latest_handle(&mut status).await?;
            handle.call(procedure, args, kwargs).await
        };

        // Dropping `call` on timeout cancels the request.
        match tokio::time::timeout(self.config().call_timeout(), call).await {
            Ok(Ok(TopicEvent::DecodeFailure { topic, reason })) => {
                Err(ConnectionError::EventParseFailure { topic, reason })
            }
            Ok(result) => result,
            Err(_) => {
                warn!(procedure, "call timed out");
                Err(ConnectionError::Timeout {
                    procedure: procedure.to_string(),
                })
            }
        }
    }
}

/// Keep `topic` subscribed on whichever session is current.
async fn follow(
    topic: Topic,
    mut status: watch::Receiver<SessionStatus>,
    events: SubscriptionSender,
) {
    loop {
        let handle = tokio::select! {
            _ = events.closed() => return,
            handle = latest_handle(&mut status) => match handle {
                Ok(handle) => handle,
                Err(ConnectionError::Closed) => return,
                Err(e) => {
                    let _ = events.send(Err(e));
                    return;
                }
            },
        };

        if handle.is_closed() {
            // Status still names a session that already ended.
            tokio::select! {
                _ = events.closed() => return,
                changed = status.changed() => if changed.is_err() { return },
            }
            continue;
        }

        let mut feed = tokio::select! {
            _ = events.closed() => return,
            feed = handle.subscribe(&topic) => match feed {
                Ok(feed) => feed,
                Err(e @ ConnectionError::Remote { .. }) => {
                    warn!(%topic, error = %e, "subscribe refused");
                    let _ = events.send(Err(e));
                    return;
                }
                Err(e) => {
                    debug!(%topic, error = %e, "subscribe interrupted");
                    continue;
                }
            },
        };
        debug!(%topic, session = handle.session_id(), "following");

        loop {
            tokio::select! {
                _ = events.closed() => return,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = matches!(
                        &*status.borrow(),
                        SessionStatus::Connected(h) if h.session_id() == handle.session_id()
                    );
                    if !current {
                        break;
                    }
                }
                payload = feed.next() => match payload {
                    Some((args, kwargs)) => match TopicEvent::decode(&topic, &args, &kwargs) {
                        TopicEvent::DecodeFailure { topic, reason } => {
                            warn!(%topic, %reason, "undecodable event");
                            let _ = events.send(Err(ConnectionError::EventParseFailure { topic, reason }));
                            return;
                        }
                        event => {
                            if events.send(Ok(event)).is_err() {
                                return;
                            }
                        }
                    },
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::transport::{CallReply, MockTransport};
    use serde_json::json;
    use std::time::Duration;
    use sync_types::wamp::Dict;
    use sync_types::{AgencyEvent, Message, Serialization, VehicleEvent};
    use tokio::time::Instant;

    fn start(mock: &MockTransport) -> Session {
        Session::start(ConnectionConfig::default(), mock.clone())
    }

    fn topic(name: &str) -> Topic {
        Topic::parse(name).unwrap()
    }

    fn vehicle(name: &str, heading: f64) -> Args {
        vec![json!({"name": name, "heading": heading})]
    }

    // ===========================================
    // Subscription Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn subscription_delivers_decoded_events() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let mut subscription = session.subscribe(&topic("vehicles.4004"));
        assert!(mock.wait_for(|m| m.is_subscribed("vehicles.4004")).await);
        assert!(mock.publish("vehicles.4004", vehicle("4004", 90.0), Kwargs::new()));

        match subscription.next().await {
            Some(Ok(TopicEvent::Vehicle(VehicleEvent::Update(v)))) => {
                assert_eq!(v.name, "4004");
                assert_eq!(v.heading, Some(90.0));
            }
            other => panic!("Expected vehicle update, got {:?}", other),
        }
        assert_eq!(subscription.topic().to_string(), "vehicles.4004");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_subscription_unsubscribes_once() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let subscription = session.subscribe(&topic("routes.10"));
        assert!(mock.wait_for(|m| m.is_subscribed("routes.10")).await);

        drop(subscription);

        assert!(mock.wait_for(|m| m.unsubscribe_count("routes.10") == 1).await);
        assert!(!mock.publish("routes.10", vec![json!("10")], Kwargs::new()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.unsubscribe_count("routes.10"), 1);
        assert_eq!(mock.subscribe_count("routes.10"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn local_subscribers_share_router_subscription() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let mut first = session.subscribe(&topic("vehicles.4004"));
        let mut second = session.subscribe(&topic("vehicles.4004"));
        assert!(mock.wait_for(|m| m.subscribe_count("vehicles.4004") == 2).await);
        mock.publish("vehicles.4004", vehicle("4004", 10.0), Kwargs::new());

        assert!(matches!(first.next().await, Some(Ok(_))));
        assert!(matches!(second.next().await, Some(Ok(_))));

        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.unsubscribe_count("vehicles.4004"), 0);
        mock.publish("vehicles.4004", vehicle("4004", 20.0), Kwargs::new());
        assert!(matches!(second.next().await, Some(Ok(_))));

        drop(second);
        assert!(mock.wait_for(|m| m.unsubscribe_count("vehicles.4004") == 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_is_terminal() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let mut subscription = session.subscribe(&topic("vehicles.4004"));
        assert!(mock.wait_for(|m| m.is_subscribed("vehicles.4004")).await);
        mock.publish("vehicles.4004", vec![json!(42)], Kwargs::new());

        match subscription.next().await {
            Some(Err(ConnectionError::EventParseFailure { topic, .. })) => {
                assert_eq!(topic, "vehicles.4004")
            }
            other => panic!("Expected parse failure, got {:?}", other),
        }
        assert!(subscription.next().await.is_none());
        assert!(mock.wait_for(|m| m.unsubscribe_count("vehicles.4004") == 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_on_new_session() {
        let mock = MockTransport::new();
        let session = Session::start(
            ConnectionConfig {
                reconnect_on_loss: true,
                ..ConnectionConfig::default()
            },
            mock.clone(),
        );

        let mut subscription = session.subscribe(&topic("stations.BUS100W"));
        assert!(mock.wait_for(|m| m.is_subscribed("stations.BUS100W")).await);

        mock.drop_connection();

        assert!(mock.wait_for(|m| m.subscribe_count("stations.BUS100W") == 2).await);
        assert!(mock.wait_for(|m| m.is_subscribed("stations.BUS100W")).await);
        mock.publish(
            "stations.BUS100W",
            vec![json!({"stop_code": "BUS100W", "name": "Main St"})],
            Kwargs::new(),
        );
        assert!(matches!(
            subscription.next().await,
            Some(Ok(TopicEvent::Station(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn session_failure_ends_subscription_with_error() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let mut subscription = session.subscribe(&topic("routes.10"));
        assert!(mock.wait_for(|m| m.is_subscribed("routes.10")).await);
        mock.drop_connection();

        assert!(matches!(
            subscription.next().await,
            Some(Err(ConnectionError::ConnectionLost(_)))
        ));
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_close_ends_subscription_cleanly() {
        let mock = MockTransport::new();
        let session = start(&mock);

        let mut subscription = session.subscribe(&topic("routes.10"));
        assert!(mock.wait_for(|m| m.is_subscribed("routes.10")).await);
        session.close();

        assert!(subscription.next().await.is_none());
    }

    // ===========================================
    // Call Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn call_times_out_at_deadline_and_cancels() {
        let mock = MockTransport::new();
        mock.queue_reply("agency.routes", CallReply::Silent);
        let session = start(&mock);
        session.connected().await.unwrap();

        let started = Instant::now();
        let call = tokio::spawn({
            let session = session.clone();
            async move { session.call("agency.routes", vec![], Kwargs::new()).await }
        });

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(!call.is_finished());

        let result = call.await.unwrap();
        assert_eq!(
            result,
            Err(ConnectionError::Timeout {
                procedure: "agency.routes".into()
            })
        );
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert!(mock.wait_for(|m| m.cancels().len() == 1).await);

        // A late RESULT finds no handler and changes nothing.
        let request = mock.cancels()[0];
        let late = Message::Result {
            request,
            details: Dict::new(),
            args: vec![json!(["10"])],
            kwargs: Kwargs::new(),
        };
        mock.inject_frame(Serialization::MsgPack.encode(&late).unwrap());
        let last = session
            .call(
                sync_types::LAST_EVENT_PROCEDURE,
                vec![json!("routes.10"), json!("routes.10")],
                Kwargs::new(),
            )
            .await;
        assert!(last.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_are_independent() {
        let mock = MockTransport::new();
        mock.queue_reply("agency.stations", CallReply::Silent);
        mock.queue_reply(
            "agency.routes",
            CallReply::result(vec![json!([{"short_name": "10"}, {"short_name": "11"}])]),
        );
        let session = start(&mock);

        let slow = tokio::spawn({
            let session = session.clone();
            async move { session.call("agency.stations", vec![], Kwargs::new()).await }
        });
        let fast = session.call("agency.routes", vec![], Kwargs::new()).await;

        match fast {
            Ok(TopicEvent::Agency(AgencyEvent::Routes(routes))) => assert_eq!(routes.len(), 2),
            other => panic!("Expected routes, got {:?}", other),
        }
        assert!(!slow.is_finished());
        assert!(matches!(
            slow.await.unwrap(),
            Err(ConnectionError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn call_waits_for_connection() {
        let mock = MockTransport::new();
        mock.fail_connects(1);
        let session = start(&mock);

        let result = session
            .call(
                sync_types::LAST_EVENT_PROCEDURE,
                vec![json!("routes.10"), json!("routes.10")],
                Kwargs::new(),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(mock.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn call_on_failed_session_reports_failure() {
        let mock = MockTransport::new();
        mock.fail_connects(10);
        let session = Session::start(
            ConnectionConfig {
                max_connect_attempts: 1,
                ..ConnectionConfig::default()
            },
            mock.clone(),
        );

        let result = session.call("agency.routes", vec![], Kwargs::new()).await;
        assert_eq!(
            result,
            Err(ConnectionError::MaxRetriesExceeded { attempts: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_is_reported() {
        let mock = MockTransport::new();
        mock.queue_reply("agency.routes", CallReply::error("shark.error.unavailable"));
        let session = start(&mock);

        let result = session.call("agency.routes", vec![], Kwargs::new()).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Remote { ref error, .. }) if error == "shark.error.unavailable"
        ));
    }
}
