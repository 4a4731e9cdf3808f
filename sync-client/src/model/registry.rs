//! Model registry: identity map, leases and reachability sweep.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};
use sync_types::{AgencyEvent, Args, Kwargs, Route, Station, TopicEvent, Vehicle};
use tracing::{debug, info};

use super::sync::{self, SyncContext, SyncGuard, Synchronized};
use super::{EntityKey, ModelDelegate, MutableRoute, MutableStation, MutableVehicle};
use crate::config::ModelsConfig;
use crate::connection::Connection;
use crate::error::{ConnectionError, ModelError};

/// Procedure listing every route of the agency.
const AGENCY_ROUTES_PROCEDURE: &str = "agency.routes";

/// A model kind stored in the arena.
pub(crate) trait Registered: Sized {
    fn table(arena: &mut Arena) -> &mut HashMap<String, Arc<Self>>;
    fn create(identifier: &str, registry: Weak<RegistryInner>) -> Self;
    fn key_for(identifier: &str) -> EntityKey;

    /// Entities this one keeps alive.
    fn links(&self) -> Vec<EntityKey>;

    fn stop_sync(&self) -> Option<SyncGuard>;
}

#[derive(Default)]
pub(crate) struct Arena {
    pub(crate) routes: HashMap<String, Arc<MutableRoute>>,
    pub(crate) stations: HashMap<String, Arc<MutableStation>>,
    pub(crate) vehicles: HashMap<String, Arc<MutableVehicle>>,
    // lease count per root
    leases: HashMap<EntityKey, usize>,
}

impl Arena {
    fn links(&self, key: &EntityKey) -> Vec<EntityKey> {
        match key {
            EntityKey::Route(id) => self.routes.get(id).map(|m| m.links()),
            EntityKey::Station(id) => self.stations.get(id).map(|m| m.links()),
            EntityKey::Vehicle(id) => self.vehicles.get(id).map(|m| m.links()),
        }
        .unwrap_or_default()
    }

    /// Everything reachable from a leased root.
    fn reachable(&self) -> HashSet<EntityKey> {
        let mut seen = HashSet::new();
        let mut stack: Vec<EntityKey> = self.leases.keys().cloned().collect();
        while let Some(key) = stack.pop() {
            if seen.contains(&key) {
                continue;
            }
            let links = self.links(&key);
            seen.insert(key);
            stack.extend(links.into_iter().filter(|k| !seen.contains(k)));
        }
        seen
    }

    fn len(&self) -> usize {
        self.routes.len() + self.stations.len() + self.vehicles.len()
    }
}

fn sweep_table<M: Registered>(
    table: &mut HashMap<String, Arc<M>>,
    reachable: &HashSet<EntityKey>,
    stopped: &mut Vec<SyncGuard>,
) {
    table.retain(|id, model| {
        let keep = reachable.contains(&M::key_for(id));
        if !keep {
            stopped.extend(model.stop_sync());
        }
        keep
    });
}

pub(crate) struct RegistryInner {
    connection: Arc<dyn Connection>,
    delegate: Arc<dyn ModelDelegate>,
    apply_retries: u32,
    arena: Mutex<Arena>,
}

impl RegistryInner {
    /// The model registered under `identifier`, created if missing.
    pub(crate) fn entry<M: Registered>(self: &Arc<Self>, identifier: &str) -> Arc<M> {
        let mut arena = self.arena.lock().unwrap();
        self.entry_locked(&mut arena, identifier)
    }

    fn entry_locked<M: Registered>(self: &Arc<Self>, arena: &mut Arena, identifier: &str) -> Arc<M> {
        M::table(arena)
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(M::create(identifier, Arc::downgrade(self))))
            .clone()
    }

    pub(crate) fn get<M: Registered>(&self, identifier: &str) -> Option<Arc<M>> {
        let mut arena = self.arena.lock().unwrap();
        M::table(&mut arena).get(identifier).cloned()
    }

    /// Resolve identifiers, skipping any not registered.
    pub(crate) fn resolve<'a, M: Registered>(
        &self,
        identifiers: impl IntoIterator<Item = &'a String>,
    ) -> Vec<Arc<M>> {
        let mut arena = self.arena.lock().unwrap();
        let table = M::table(&mut arena);
        identifiers
            .into_iter()
            .filter_map(|id| table.get(id).cloned())
            .collect()
    }

    /// Get or create a model and root it, atomically.
    fn lease_entry<M: Registered>(self: &Arc<Self>, identifier: &str) -> Arc<M> {
        let mut arena = self.arena.lock().unwrap();
        let model = self.entry_locked(&mut arena, identifier);
        *arena.leases.entry(M::key_for(identifier)).or_default() += 1;
        model
    }

    fn retain(&self, key: &EntityKey) {
        let mut arena = self.arena.lock().unwrap();
        *arena.leases.entry(key.clone()).or_default() += 1;
    }

    fn release(&self, key: &EntityKey) {
        {
            let mut arena = self.arena.lock().unwrap();
            if let Some(count) = arena.leases.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    arena.leases.remove(key);
                }
            }
        }
        self.sweep();
    }

    /// Drop every entity no lease reaches and stop its synchronization.
    pub(crate) fn sweep(&self) {
        let mut stopped = Vec::new();
        let removed = {
            let mut arena = self.arena.lock().unwrap();
            let before = arena.len();
            let reachable = arena.reachable();
            sweep_table(&mut arena.routes, &reachable, &mut stopped);
            sweep_table(&mut arena.stations, &reachable, &mut stopped);
            sweep_table(&mut arena.vehicles, &reachable, &mut stopped);
            before - arena.len()
        };
        if removed > 0 {
            debug!(removed, stopped = stopped.len(), "released unreachable models");
        }
        // Aborts happen here, outside the arena lock.
        drop(stopped);
    }

    pub(crate) fn spawn_sync<M: Synchronized>(&self, model: &Arc<M>) -> SyncGuard {
        sync::spawn(
            model,
            SyncContext {
                connection: Arc::clone(&self.connection),
                delegate: Arc::clone(&self.delegate),
                retries: self.apply_retries,
            },
        )
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Ok(arena) = self.arena.get_mut() {
            let guards: Vec<SyncGuard> = arena
                .routes
                .values()
                .filter_map(|m| m.stop_sync())
                .chain(arena.stations.values().filter_map(|m| m.stop_sync()))
                .chain(arena.vehicles.values().filter_map(|m| m.stop_sync()))
                .collect();
            drop(guards);
        }
    }
}

/// Per-session identity map for mutable models.
///
/// Cheap to clone. Models are created through leases; an entity lives while
/// a lease reaches it.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.len())
            .finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Create an empty registry whose models sync over `connection`.
    pub fn new(
        connection: Arc<dyn Connection>,
        delegate: Arc<dyn ModelDelegate>,
        config: &ModelsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connection,
                delegate,
                apply_retries: config.apply_retries,
                arena: Mutex::new(Arena::default()),
            }),
        }
    }

    /// Lease the route `snapshot` describes, seeding it from the snapshot,
    /// and start synchronizing it.
    ///
    /// # Errors
    ///
    /// Returns the seeding apply's error; nothing stays leased then.
    pub fn lease_route(&self, snapshot: &Route) -> Result<ModelLease<MutableRoute>, ModelError> {
        let lease = self.lease::<MutableRoute>(&snapshot.short_name);
        lease.apply(snapshot)?;
        lease.synchronize();
        Ok(lease)
    }

    /// Lease and synchronize a station.
    pub fn lease_station(
        &self,
        snapshot: &Station,
    ) -> Result<ModelLease<MutableStation>, ModelError> {
        let lease = self.lease::<MutableStation>(&snapshot.stop_code);
        lease.apply(snapshot)?;
        lease.synchronize();
        Ok(lease)
    }

    /// Lease and synchronize a vehicle.
    pub fn lease_vehicle(
        &self,
        snapshot: &Vehicle,
    ) -> Result<ModelLease<MutableVehicle>, ModelError> {
        let lease = self.lease::<MutableVehicle>(&snapshot.name);
        lease.apply(snapshot)?;
        lease.synchronize();
        Ok(lease)
    }

    fn lease<M: Registered>(&self, identifier: &str) -> ModelLease<M> {
        ModelLease {
            model: self.inner.lease_entry::<M>(identifier),
            key: M::key_for(identifier),
            registry: Arc::clone(&self.inner),
        }
    }

    /// Call `agency.routes` and lease a model for each route returned.
    pub async fn load_agency_routes(&self) -> Result<Vec<ModelLease<MutableRoute>>, ModelError> {
        let event = self
            .inner
            .connection
            .call(AGENCY_ROUTES_PROCEDURE, Args::new(), Kwargs::new())
            .await?;
        let routes = match event {
            TopicEvent::Agency(AgencyEvent::Routes(routes)) => routes,
            _ => {
                return Err(ConnectionError::EventParseFailure {
                    topic: AGENCY_ROUTES_PROCEDURE.into(),
                    reason: "result is not a route list".into(),
                }
                .into())
            }
        };
        info!(count = routes.len(), "loaded agency routes");
        routes.iter().map(|route| self.lease_route(route)).collect()
    }

    /// The registered route `short_name`, if any.
    pub fn route(&self, short_name: &str) -> Option<Arc<MutableRoute>> {
        self.inner.get(short_name)
    }

    /// The registered station `stop_code`, if any.
    pub fn station(&self, stop_code: &str) -> Option<Arc<MutableStation>> {
        self.inner.get(stop_code)
    }

    /// The registered vehicle `name`, if any.
    pub fn vehicle(&self, name: &str) -> Option<Arc<MutableVehicle>> {
        self.inner.get(name)
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &EntityKey) -> bool {
        let arena = self.inner.arena.lock().unwrap();
        match key {
            EntityKey::Route(id) => arena.routes.contains_key(id),
            EntityKey::Station(id) => arena.stations.contains_key(id),
            EntityKey::Vehicle(id) => arena.vehicles.contains_key(id),
        }
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.inner.arena.lock().unwrap().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A consumer's hold on a model. Dropping the last lease that reaches an
/// entity unregisters it and stops its synchronization.
pub struct ModelLease<M> {
    model: Arc<M>,
    key: EntityKey,
    registry: Arc<RegistryInner>,
}

impl<M> ModelLease<M> {
    /// Key of the leased model.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl<M> Deref for ModelLease<M> {
    type Target = Arc<M>;

    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

impl<M> Clone for ModelLease<M> {
    fn clone(&self) -> Self {
        self.registry.retain(&self.key);
        Self {
            model: Arc::clone(&self.model),
            key: self.key.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M> Drop for ModelLease<M> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

impl<M> fmt::Debug for ModelLease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelLease").field(&self.key).finish()
    }
}
