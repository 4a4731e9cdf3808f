//! Mutable Model Engine.
//!
//! Long-lived mirrors of server entities (routes, stations, vehicles) that
//! stay current through their own topic.
//!
//! # Ownership
//!
//! A per-session [`ModelRegistry`] is the only identity map: relationship
//! sets hold identifiers, and the same identifier always resolves to the
//! same `Arc`. Consumers hold [`ModelLease`]s. An entity stays registered
//! while it is leased or reachable from a leased entity through its
//! relationship sets; everything else is swept after each apply and each
//! lease release, which also stops its synchronization.
//!
//! # Observing
//!
//! Each model publishes its whole state on a `watch` channel. An apply merges
//! and swaps the state under the channel's lock, so readers never see half an
//! update and concurrent applies never lose each other's fields. An apply
//! that changes nothing notifies nobody.
//!
//! # Synchronizing
//!
//! `synchronize()` starts one background task per model. It subscribes to the
//! model's topic, asks `meta.last_event` for the last known value, applies
//! that first and then every live event. Events the model does not interpret
//! go to the [`ModelDelegate`], as do errors.

mod registry;
mod route;
mod station;
mod sync;
mod vehicle;

pub use registry::{ModelLease, ModelRegistry};
pub use route::{MutableRoute, RouteState};
pub use station::{MutableStation, StationState};
pub use vehicle::{MutableVehicle, VehicleState};

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use sync_types::{DecodeError, Namespace, Topic, TopicEvent};
use tokio::sync::watch;

use crate::error::ModelError;
use registry::RegistryInner;
use sync::SyncGuard;

/// Identity of a registered entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    /// A route, by short name.
    Route(String),
    /// A station, by stop code.
    Station(String),
    /// A vehicle, by name.
    Vehicle(String),
}

impl EntityKey {
    /// The entity's identifier.
    pub fn identifier(&self) -> &str {
        match self {
            EntityKey::Route(id) | EntityKey::Station(id) | EntityKey::Vehicle(id) => id,
        }
    }

    /// Namespace of the entity's topic.
    pub fn namespace(&self) -> Namespace {
        match self {
            EntityKey::Route(_) => Namespace::Routes,
            EntityKey::Station(_) => Namespace::Stations,
            EntityKey::Vehicle(_) => Namespace::Vehicles,
        }
    }

    /// The entity's own topic.
    pub fn topic(&self) -> Result<Topic, DecodeError> {
        Topic::new(self.namespace(), self.identifier())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace(), self.identifier())
    }
}

/// Synchronization phase of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Created, nothing applied yet.
    Uninitialized,
    /// Seeded from a snapshot; no event from the server applied yet.
    Synchronizing,
    /// At least one server event applied.
    Live,
}

/// Receives what models do not handle themselves.
pub trait ModelDelegate: Send + Sync {
    /// An event arrived on the model's topic that the model does not interpret.
    fn on_event(&self, model: &EntityKey, event: &TopicEvent);

    /// Synchronization failed. Errors that end synchronization are reported
    /// once, after retries.
    fn on_error(&self, model: &EntityKey, error: &ModelError);
}

/// Identity, state and synchronization slot shared by every model kind.
pub(crate) struct ModelCore<S> {
    key: EntityKey,
    state: watch::Sender<S>,
    phase: watch::Sender<SyncPhase>,
    sync: Mutex<Option<SyncGuard>>,
    registry: Weak<RegistryInner>,
}

impl<S: Clone + PartialEq + Default> ModelCore<S> {
    pub(crate) fn new(key: EntityKey, registry: Weak<RegistryInner>) -> Self {
        let (state, _) = watch::channel(S::default());
        let (phase, _) = watch::channel(SyncPhase::Uninitialized);
        Self {
            key,
            state,
            phase,
            sync: Mutex::new(None),
            registry,
        }
    }

    pub(crate) fn key(&self) -> &EntityKey {
        &self.key
    }

    pub(crate) fn current(&self) -> S {
        self.state.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<S> {
        self.state.subscribe()
    }

    pub(crate) fn registry(&self) -> Option<Arc<RegistryInner>> {
        self.registry.upgrade()
    }

    /// Swap in `f(current)`, computed under the state lock. Returns whether
    /// anything changed.
    pub(crate) fn update(&self, f: impl FnOnce(&S) -> S) -> bool {
        match self.try_update(|current| Ok::<_, std::convert::Infallible>(f(current))) {
            Ok(changed) => changed,
            Err(never) => match never {},
        }
    }

    /// Like [`update`](Self::update), but `f` may refuse. A refusal leaves
    /// the state untouched and notifies nobody.
    pub(crate) fn try_update<E>(&self, f: impl FnOnce(&S) -> Result<S, E>) -> Result<bool, E> {
        let mut refused = None;
        let changed = self.state.send_if_modified(|current| match f(current) {
            Ok(next) if next != *current => {
                *current = next;
                true
            }
            Ok(_) => false,
            Err(e) => {
                refused = Some(e);
                false
            }
        });
        match refused {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    pub(crate) fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub(crate) fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub(crate) fn mark_seeded(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == SyncPhase::Uninitialized {
                *phase = SyncPhase::Synchronizing;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn mark_live(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == SyncPhase::Live {
                false
            } else {
                *phase = SyncPhase::Live;
                true
            }
        });
    }

    pub(crate) fn is_synchronizing(&self) -> bool {
        self.sync
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |guard| !guard.is_finished())
    }

    /// Start `model`'s sync task unless one is already running.
    pub(crate) fn synchronize<M: sync::Synchronized>(&self, model: &Arc<M>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut slot = self.sync.lock().unwrap();
        if slot.as_ref().map_or(false, |guard| !guard.is_finished()) {
            return;
        }
        *slot = Some(registry.spawn_sync(model));
    }

    /// Stop synchronizing. Dropping the guard aborts the task.
    pub(crate) fn take_sync(&self) -> Option<SyncGuard> {
        self.sync.lock().unwrap().take()
    }
}

/// Keep `current` unless `next` is known.
pub(crate) fn known<T: Clone>(next: &Option<T>, current: &Option<T>) -> Option<T> {
    next.clone().or_else(|| current.clone())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for model tests.

    use super::*;
    use crate::config::{ConnectionConfig, ModelsConfig};
    use crate::session::Session;
    use crate::transport::MockTransport;

    /// Records everything handed to the delegate.
    #[derive(Default)]
    pub(crate) struct RecordingDelegate {
        pub(crate) events: Mutex<Vec<(EntityKey, TopicEvent)>>,
        pub(crate) errors: Mutex<Vec<(EntityKey, ModelError)>>,
    }

    impl RecordingDelegate {
        pub(crate) fn errors(&self) -> Vec<(EntityKey, ModelError)> {
            self.errors.lock().unwrap().clone()
        }

        pub(crate) fn events(&self) -> Vec<(EntityKey, TopicEvent)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ModelDelegate for RecordingDelegate {
        fn on_event(&self, model: &EntityKey, event: &TopicEvent) {
            self.events.lock().unwrap().push((model.clone(), event.clone()));
        }

        fn on_error(&self, model: &EntityKey, error: &ModelError) {
            self.errors.lock().unwrap().push((model.clone(), error.clone()));
        }
    }

    /// A registry over a mock router session.
    pub(crate) fn registry() -> (ModelRegistry, MockTransport, Arc<RecordingDelegate>) {
        let mock = MockTransport::new();
        let session = Session::start(ConnectionConfig::default(), mock.clone());
        let delegate = Arc::new(RecordingDelegate::default());
        let registry = ModelRegistry::new(
            Arc::new(session),
            delegate.clone(),
            &ModelsConfig::default(),
        );
        (registry, mock, delegate)
    }
}
