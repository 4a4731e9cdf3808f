//! Per-model synchronization task.
//!
//! The producer for a model's topic is the live subscription opened first,
//! then the `meta.last_event` call. The call's result is processed before
//! anything buffered on the subscription. Retryable failures re-open the
//! producer a bounded number of times.

use serde_json::Value;
use std::sync::{Arc, Weak};
use sync_types::{Kwargs, TopicEvent, LAST_EVENT_PROCEDURE};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EntityKey, ModelDelegate};
use crate::connection::Connection;
use crate::error::{ConnectionError, ModelError};

/// A model the sync task can drive.
pub(crate) trait Synchronized: Send + Sync + 'static {
    fn key(&self) -> &EntityKey;

    /// Apply `event` if this model interprets it. `None` means unhandled.
    fn handle_event(&self, event: &TopicEvent) -> Option<Result<(), ModelError>>;

    fn mark_live(&self);
}

/// Owns a sync task; dropping it aborts the task.
pub(crate) struct SyncGuard(JoinHandle<()>);

impl SyncGuard {
    pub(crate) fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// What a sync task needs from its registry.
pub(crate) struct SyncContext {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) delegate: Arc<dyn ModelDelegate>,
    pub(crate) retries: u32,
}

pub(crate) fn spawn<M: Synchronized>(model: &Arc<M>, context: SyncContext) -> SyncGuard {
    let key = model.key().clone();
    debug!(%key, "synchronizing");
    SyncGuard(tokio::spawn(run(Arc::downgrade(model), key, context)))
}

async fn run<M: Synchronized>(model: Weak<M>, key: EntityKey, context: SyncContext) {
    let mut retries = 0;
    loop {
        let error = match produce(&model, &key, &context).await {
            Ok(()) => {
                debug!(%key, "synchronization finished");
                return;
            }
            Err(error) => error,
        };

        if error.is_retryable() && retries < context.retries {
            retries += 1;
            warn!(%key, retry = retries, %error, "synchronization failed, retrying");
            continue;
        }

        warn!(%key, %error, "synchronization stopped");
        context
            .delegate
            .on_error(&key, &ModelError::Connection(error));
        return;
    }
}

/// Run one producer until it ends. `Ok` means the stream closed cleanly or
/// the model went away.
async fn produce<M: Synchronized>(
    model: &Weak<M>,
    key: &EntityKey,
    context: &SyncContext,
) -> Result<(), ConnectionError> {
    let topic = key
        .topic()
        .map_err(|e| ConnectionError::EventParseFailure {
            topic: key.to_string(),
            reason: e.to_string(),
        })?;

    let mut live = context.connection.subscribe(&topic);
    let name = Value::String(topic.to_string());
    let last = context
        .connection
        .call(LAST_EVENT_PROCEDURE, vec![name.clone(), name], Kwargs::new())
        .await?;
    if !deliver(model, key, last, context.delegate.as_ref())? {
        return Ok(());
    }

    while let Some(event) = live.next().await {
        if !deliver(model, key, event?, context.delegate.as_ref())? {
            return Ok(());
        }
    }
    Ok(())
}

/// Route one event to the model or its delegate. Returns false once the
/// model is gone.
fn deliver<M: Synchronized>(
    model: &Weak<M>,
    key: &EntityKey,
    event: TopicEvent,
    delegate: &dyn ModelDelegate,
) -> Result<bool, ConnectionError> {
    let Some(model) = model.upgrade() else {
        return Ok(false);
    };

    let event = match event {
        TopicEvent::Meta(meta) => match meta.replay() {
            Some(replayed) => replayed,
            None => {
                debug!(%key, "no last event stored");
                return Ok(true);
            }
        },
        other => other,
    };
    if let TopicEvent::DecodeFailure { topic, reason } = event {
        return Err(ConnectionError::EventParseFailure { topic, reason });
    }

    match model.handle_event(&event) {
        Some(Ok(())) => model.mark_live(),
        Some(Err(error)) => {
            warn!(%key, %error, "event not applied");
            delegate.on_error(key, &error);
        }
        None => delegate.on_event(key, &event),
    }
    Ok(true)
}
