//! Mutable station.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use sync_core::MemberDiff;
use sync_types::{Point, Station, StationEvent, TopicEvent};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::registry::{Arena, Registered, RegistryInner};
use super::sync::{SyncGuard, Synchronized};
use super::{known, EntityKey, ModelCore, MutableRoute, MutableVehicle, SyncPhase};
use crate::error::ModelError;

/// Everything known about a station.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StationState {
    /// Display name.
    pub name: Option<String>,
    /// Longer description.
    pub description: Option<String>,
    /// Location.
    pub position: Option<Point>,
    /// Short names of routes serving the station.
    pub routes: BTreeSet<String>,
    /// Names of vehicles at or approaching the station.
    pub vehicles: BTreeSet<String>,
}

/// A live station.
pub struct MutableStation {
    core: ModelCore<StationState>,
}

impl std::fmt::Debug for MutableStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableStation")
            .field("stop_code", &self.identifier())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl MutableStation {
    /// Stop code.
    pub fn identifier(&self) -> &str {
        self.core.key().identifier()
    }

    /// Registry key.
    pub fn key(&self) -> &EntityKey {
        self.core.key()
    }

    /// Current state.
    pub fn state(&self) -> StationState {
        self.core.current()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<StationState> {
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

    /// Routes serving the station, resolved through the registry.
    pub fn routes(&self) -> Vec<Arc<MutableRoute>> {
        let ids = self.core.current().routes;
        self.core
            .registry()
            .map(|registry| registry.resolve(&ids))
            .unwrap_or_default()
    }

    /// Vehicles at or approaching the station.
    pub fn vehicles(&self) -> Vec<Arc<MutableVehicle>> {
        let ids = self.core.current().vehicles;
        self.core
            .registry()
            .map(|registry| registry.resolve(&ids))
            .unwrap_or_default()
    }

    /// Start synchronizing with the station's topic, unless already running.
    pub fn synchronize(self: &Arc<Self>) {
        self.core.synchronize(self);
    }

    /// Whether a sync task is running.
    pub fn is_synchronizing(&self) -> bool {
        self.core.is_synchronizing()
    }

    /// Apply `station` and release whatever it made unreachable.
    ///
    /// # Errors
    ///
    /// [`ModelError::ApplyFailure`] if `station` is a different station.
    pub fn apply(&self, station: &Station) -> Result<(), ModelError> {
        self.apply_snapshot(station)?;
        if let Some(registry) = self.core.registry() {
            registry.sweep();
        }
        Ok(())
    }

    pub(crate) fn apply_snapshot(&self, station: &Station) -> Result<(), ModelError> {
        let id = self.identifier();
        if station.stop_code != id {
            return Err(ModelError::ApplyFailure {
                expected: id.to_string(),
                actual: station.stop_code.clone(),
            });
        }

        let mut merged = None;
        let changed = self.core.update(|current| {
            let routes: BTreeSet<String> = match &station.routes {
                Some(routes) => routes.iter().map(|r| r.short_name.clone()).collect(),
                None => current.routes.clone(),
            };
            let vehicles: BTreeSet<String> = match &station.vehicles {
                Some(vehicles) => vehicles.iter().map(|v| v.name.clone()).collect(),
                None => current.vehicles.clone(),
            };
            merged = Some((
                MemberDiff::between(&current.routes, &routes),
                MemberDiff::between(&current.vehicles, &vehicles),
            ));

            StationState {
                name: known(&station.name, &current.name),
                description: known(&station.description, &current.description),
                position: known(&station.position, &current.position),
                routes,
                vehicles,
            }
        });
        if let (true, Some((route_diff, vehicle_diff))) = (changed, &merged) {
            debug!(
                station = id,
                routes_added = ?route_diff.added,
                routes_removed = ?route_diff.removed,
                vehicles_added = ?vehicle_diff.added,
                vehicles_removed = ?vehicle_diff.removed,
                "station updated"
            );
        }
        self.core.mark_seeded();

        if let Some(registry) = self.core.registry() {
            for route in station.routes.iter().flatten() {
                let member = registry.entry::<MutableRoute>(&route.short_name);
                if let Err(e) = member.apply_snapshot(route) {
                    warn!(station = id, route = %route.short_name, error = %e, "nested route not applied");
                }
            }
            for vehicle in station.vehicles.iter().flatten() {
                let member = registry.entry::<MutableVehicle>(&vehicle.name);
                if let Err(e) = member.apply_snapshot(vehicle) {
                    warn!(station = id, vehicle = %vehicle.name, error = %e, "nested vehicle not applied");
                }
            }
        }
        Ok(())
    }
}

impl Registered for MutableStation {
    fn table(arena: &mut Arena) -> &mut HashMap<String, Arc<Self>> {
        &mut arena.stations
    }

    fn create(identifier: &str, registry: Weak<RegistryInner>) -> Self {
        Self {
            core: ModelCore::new(Self::key_for(identifier), registry),
        }
    }

    fn key_for(identifier: &str) -> EntityKey {
        EntityKey::Station(identifier.to_string())
    }

    fn links(&self) -> Vec<EntityKey> {
        let state = self.core.current();
        state
            .routes
            .into_iter()
            .map(EntityKey::Route)
            .chain(state.vehicles.into_iter().map(EntityKey::Vehicle))
            .collect()
    }

    fn stop_sync(&self) -> Option<SyncGuard> {
        self.core.take_sync()
    }
}

impl Synchronized for MutableStation {
    fn key(&self) -> &EntityKey {
        self.core.key()
    }

    fn handle_event(&self, event: &TopicEvent) -> Option<Result<(), ModelError>> {
        match event {
            TopicEvent::Station(StationEvent::Update(station)) => Some(self.apply(station)),
            _ => None,
        }
    }

    fn mark_live(&self) {
        self.core.mark_live();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::registry;
    use serde_json::json;
    use sync_types::{Kwargs, Route, Vehicle};

    #[tokio::test(start_paused = true)]
    async fn station_links_routes_and_vehicles() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry
            .lease_station(&Station {
                name: Some("Main St".into()),
                position: Some(Point::new(40.0, -86.9)),
                routes: Some(vec![Route::new("10"), Route::new("11")]),
                vehicles: Some(vec![Vehicle::new("4004")]),
                ..Station::new("BUS100W")
            })
            .unwrap();

        let state = lease.state();
        assert_eq!(state.name.as_deref(), Some("Main St"));
        assert_eq!(lease.routes().len(), 2);
        assert_eq!(lease.vehicles()[0].identifier(), "4004");
        assert!(registry.route("10").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn station_apply_rejects_other_identifier() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry.lease_station(&Station::new("BUS100W")).unwrap();

        let err = lease.apply(&Station::new("BUS200E")).unwrap_err();
        assert!(matches!(err, ModelError::ApplyFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_route_is_released() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry
            .lease_station(&Station {
                routes: Some(vec![Route::new("10"), Route::new("11")]),
                ..Station::new("BUS100W")
            })
            .unwrap();
        let kept = registry.route("11").unwrap();

        lease
            .apply(&Station {
                routes: Some(vec![Route::new("11")]),
                ..Station::new("BUS100W")
            })
            .unwrap();

        assert!(registry.route("10").is_none());
        assert!(Arc::ptr_eq(&kept, &registry.route("11").unwrap()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_applies_keep_both_fields() {
        let (registry, _mock, _delegate) = registry();
        let codes: Vec<String> = (0..500).map(|i| format!("S{i}")).collect();
        let _route = registry
            .lease_route(&Route {
                stations: Some(codes.iter().map(|c| Station::new(c.as_str())).collect()),
                ..Route::new("10")
            })
            .unwrap();
        let stations: Vec<Arc<MutableStation>> =
            codes.iter().filter_map(|c| registry.station(c)).collect();
        assert_eq!(stations.len(), codes.len());

        let barrier = std::sync::Barrier::new(2);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for station in &stations {
                    barrier.wait();
                    let named = Station {
                        name: Some("Main St".into()),
                        ..Station::new(station.identifier())
                    };
                    station.apply_snapshot(&named).unwrap();
                }
            });
            scope.spawn(|| {
                for station in &stations {
                    barrier.wait();
                    let placed = Station {
                        position: Some(Point::new(40.4, -86.9)),
                        ..Station::new(station.identifier())
                    };
                    station.apply_snapshot(&placed).unwrap();
                }
            });
        });

        for station in &stations {
            let state = station.state();
            assert_eq!(state.name.as_deref(), Some("Main St"), "{}", station.identifier());
            assert_eq!(state.position, Some(Point::new(40.4, -86.9)), "{}", station.identifier());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn station_follows_its_topic() {
        let (registry, mock, _delegate) = registry();
        let lease = registry.lease_station(&Station::new("BUS100W")).unwrap();
        assert!(mock.wait_for(|m| m.is_subscribed("stations.BUS100W")).await);

        mock.publish(
            "stations.BUS100W",
            vec![json!({"stop_code": "BUS100W", "name": "Main St", "lat": 40.4, "lng": -86.9})],
            Kwargs::new(),
        );

        let mut phase = lease.watch_phase();
        phase.wait_for(|p| *p == SyncPhase::Live).await.unwrap();
        assert_eq!(lease.state().position, Some(Point::new(40.4, -86.9)));
    }
}
