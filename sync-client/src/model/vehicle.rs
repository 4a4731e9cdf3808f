//! Mutable vehicle.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use sync_types::{Point, Route, Station, TopicEvent, Vehicle, VehicleEvent};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::registry::{Arena, Registered, RegistryInner};
use super::sync::{SyncGuard, Synchronized};
use super::{known, EntityKey, ModelCore, MutableRoute, MutableStation, SyncPhase};
use crate::error::ModelError;

/// Everything known about a vehicle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleState {
    /// Numeric agency code.
    pub code: Option<i64>,
    /// Last reported location.
    pub position: Option<Point>,
    /// Passenger capacity.
    pub capacity: Option<i64>,
    /// Passengers on board.
    pub onboard: Option<i64>,
    /// Load factor.
    pub saturation: Option<f64>,
    /// Stop code of the station most recently served.
    pub last_station: Option<String>,
    /// Stop code of the station served next.
    pub next_station: Option<String>,
    /// Short name of the route being driven. Advisory only.
    pub route: Option<String>,
    /// Seconds ahead of or behind schedule.
    pub schedule_delta: Option<f64>,
    /// Compass heading in degrees.
    pub heading: Option<f64>,
    /// Speed in km/h.
    pub speed: Option<f64>,
}

/// A live vehicle.
pub struct MutableVehicle {
    core: ModelCore<VehicleState>,
}

impl std::fmt::Debug for MutableVehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableVehicle")
            .field("name", &self.identifier())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl MutableVehicle {
    /// Vehicle name.
    pub fn identifier(&self) -> &str {
        self.core.key().identifier()
    }

    /// Registry key.
    pub fn key(&self) -> &EntityKey {
        self.core.key()
    }

    /// Current state.
    pub fn state(&self) -> VehicleState {
        self.core.current()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<VehicleState> {
        self.core.watch()
    }

    /// Synchronization phase.
    pub fn phase(&self) -> SyncPhase {
        self.core.phase()
    }

    /// Observe phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.core.watch_phase()
    }

    /// The route this vehicle drives, if it is still registered.
    pub fn route(&self) -> Option<Arc<MutableRoute>> {
        let id = self.core.current().route?;
        self.core.registry()?.get(&id)
    }

    /// The station most recently served.
    pub fn last_station(&self) -> Option<Arc<MutableStation>> {
        let id = self.core.current().last_station?;
        self.core.registry()?.get(&id)
    }

    /// The station served next.
    pub fn next_station(&self) -> Option<Arc<MutableStation>> {
        let id = self.core.current().next_station?;
        self.core.registry()?.get(&id)
    }

    /// Rebuild an immutable snapshot. Related entities are id-only references.
    pub fn snapshot(&self) -> Vehicle {
        let state = self.core.current();
        Vehicle {
            name: self.identifier().to_string(),
            code: state.code,
            position: state.position,
            capacity: state.capacity,
            onboard: state.onboard,
            saturation: state.saturation,
            last_station: state.last_station.map(Station::new),
            next_station: state.next_station.map(Station::new),
            route: state.route.map(Route::new),
            schedule_delta: state.schedule_delta,
            heading: state.heading,
            speed: state.speed,
        }
    }

    /// Start synchronizing with the vehicle's topic, unless already running.
    pub fn synchronize(self: &Arc<Self>) {
        self.core.synchronize(self);
    }

    /// Whether a sync task is running.
    pub fn is_synchronizing(&self) -> bool {
        self.core.is_synchronizing()
    }

    /// Apply `vehicle` and release whatever it made unreachable.
    ///
    /// # Errors
    ///
    /// [`ModelError::ApplyFailure`] if `vehicle` is a different vehicle.
    pub fn apply(&self, vehicle: &Vehicle) -> Result<(), ModelError> {
        self.apply_snapshot(vehicle)?;
        if let Some(registry) = self.core.registry() {
            registry.sweep();
        }
        Ok(())
    }

    pub(crate) fn apply_snapshot(&self, vehicle: &Vehicle) -> Result<(), ModelError> {
        let id = self.identifier();
        if vehicle.name != id {
            return Err(ModelError::ApplyFailure {
                expected: id.to_string(),
                actual: vehicle.name.clone(),
            });
        }

        let last_station = vehicle.last_station.as_ref().map(|s| s.stop_code.clone());
        let next_station = vehicle.next_station.as_ref().map(|s| s.stop_code.clone());
        let route = vehicle.route.as_ref().map(|r| r.short_name.clone());

        let changed = self.core.update(|current| VehicleState {
            code: known(&vehicle.code, &current.code),
            position: known(&vehicle.position, &current.position),
            capacity: known(&vehicle.capacity, &current.capacity),
            onboard: known(&vehicle.onboard, &current.onboard),
            saturation: known(&vehicle.saturation, &current.saturation),
            last_station: known(&last_station, &current.last_station),
            next_station: known(&next_station, &current.next_station),
            route: known(&route, &current.route),
            schedule_delta: known(&vehicle.schedule_delta, &current.schedule_delta),
            heading: known(&vehicle.heading, &current.heading),
            speed: known(&vehicle.speed, &current.speed),
        });
        if changed {
            debug!(vehicle = id, "vehicle updated");
        }
        self.core.mark_seeded();

        if let Some(registry) = self.core.registry() {
            for station in [&vehicle.last_station, &vehicle.next_station].into_iter().flatten() {
                let member = registry.entry::<MutableStation>(&station.stop_code);
                if let Err(e) = member.apply_snapshot(station) {
                    warn!(vehicle = id, station = %station.stop_code, error = %e, "nested station not applied");
                }
            }
        }
        Ok(())
    }

    /// Point the route reference at `route` unless one is already set.
    pub(crate) fn adopt_route(&self, route: &str) {
        let adopted = self.core.update(|current| match current.route {
            Some(_) => current.clone(),
            None => VehicleState {
                route: Some(route.to_string()),
                ..current.clone()
            },
        });
        if adopted {
            debug!(vehicle = self.identifier(), route, "route reference set");
        }
    }
}

impl Registered for MutableVehicle {
    fn table(arena: &mut Arena) -> &mut HashMap<String, Arc<Self>> {
        &mut arena.vehicles
    }

    fn create(identifier: &str, registry: Weak<RegistryInner>) -> Self {
        Self {
            core: ModelCore::new(Self::key_for(identifier), registry),
        }
    }

    fn key_for(identifier: &str) -> EntityKey {
        EntityKey::Vehicle(identifier.to_string())
    }

    // The route reference is advisory and not traced.
    fn links(&self) -> Vec<EntityKey> {
        let state = self.core.current();
        [state.last_station, state.next_station]
            .into_iter()
            .flatten()
            .map(EntityKey::Station)
            .collect()
    }

    fn stop_sync(&self) -> Option<SyncGuard> {
        self.core.take_sync()
    }
}

impl Synchronized for MutableVehicle {
    fn key(&self) -> &EntityKey {
        self.core.key()
    }

    fn handle_event(&self, event: &TopicEvent) -> Option<Result<(), ModelError>> {
        match event {
            TopicEvent::Vehicle(VehicleEvent::Update(vehicle)) => Some(self.apply(vehicle)),
            _ => None,
        }
    }

    fn mark_live(&self) {
        self.core.mark_live();
    }
}
