//! Mutable route.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use sync_core::{reduce, CanonicalStop, MemberDiff};
use sync_types::{Point, Route, RouteEvent, TopicEvent, Vehicle};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::registry::{Arena, Registered, RegistryInner};
use super::sync::{SyncGuard, Synchronized};
use super::{known, EntityKey, ModelCore, MutableStation, MutableVehicle, SyncPhase};
use crate::error::ModelError;

/// Everything known about a route.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteState {
    /// Numeric agency code.
    pub code: Option<i64>,
    /// Display name.
    pub name: Option<String>,
    /// Longer description.
    pub description: Option<String>,
    /// Display color.
    pub color: Option<String>,
    /// Drawn path.
    pub path: Option<Vec<Point>>,
    /// Stop codes of stations served.
    pub stations: BTreeSet<String>,
    /// Names of vehicles on the route.
    pub vehicles: BTreeSet<String>,
    /// Raw itinerary as stop codes.
    pub itinerary: Vec<String>,
}

/// A live route.
pub struct MutableRoute {
    core: ModelCore<RouteState>,
    canonical: watch::Sender<Vec<CanonicalStop<String>>>,
}

impl std::fmt::Debug for MutableRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableRoute")
            .field("short_name", &self.identifier())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl MutableRoute {
    /// Route short name.
    pub fn identifier(&self) -> &str {
        self.core.key().identifier()
    }

    /// Registry key.
    pub fn key(&self) -> &EntityKey {
        self.core.key()
    }

    /// Current state.
    pub fn state(&self) -> RouteState {
        self.core.current()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<RouteState> {
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

    /// Canonical itinerary, as stop codes.
    pub fn canonical_itinerary(&self) -> Vec<CanonicalStop<String>> {
        self.canonical.borrow().clone()
    }

    /// Observe the canonical itinerary. Only changes are published.
    pub fn watch_canonical(&self) -> watch::Receiver<Vec<CanonicalStop<String>>> {
        self.canonical.subscribe()
    }

    /// Stations served, resolved through the registry.
    pub fn stations(&self) -> Vec<Arc<MutableStation>> {
        let ids = self.core.current().stations;
        self.core
            .registry()
            .map(|registry| registry.resolve(&ids))
            .unwrap_or_default()
    }

    /// Vehicles on the route, resolved through the registry.
    pub fn vehicles(&self) -> Vec<Arc<MutableVehicle>> {
        let ids = self.core.current().vehicles;
        self.core
            .registry()
            .map(|registry| registry.resolve(&ids))
            .unwrap_or_default()
    }

    /// Start synchronizing with the route's topic, unless already running.
    pub fn synchronize(self: &Arc<Self>) {
        self.core.synchronize(self);
    }

    /// Whether a sync task is running.
    pub fn is_synchronizing(&self) -> bool {
        self.core.is_synchronizing()
    }

    /// Apply `route` and release whatever it made unreachable.
    ///
    /// # Errors
    ///
    /// [`ModelError::ApplyFailure`] if `route` is a different route, and
    /// [`ModelError::StateInconsistency`] if its itinerary names a station
    /// outside its station set. Nothing changes on error.
    pub fn apply(&self, route: &Route) -> Result<(), ModelError> {
        self.apply_snapshot(route)?;
        if let Some(registry) = self.core.registry() {
            registry.sweep();
        }
        Ok(())
    }

    pub(crate) fn apply_snapshot(&self, route: &Route) -> Result<(), ModelError> {
        let id = self.identifier();
        if route.short_name != id {
            return Err(ModelError::ApplyFailure {
                expected: id.to_string(),
                actual: route.short_name.clone(),
            });
        }

        let mut merged = None;
        let changed = self.core.try_update(|current| {
            let stations: BTreeSet<String> = match &route.stations {
                Some(stations) => stations.iter().map(|s| s.stop_code.clone()).collect(),
                None => current.stations.clone(),
            };
            let itinerary: Vec<String> = match &route.itinerary {
                Some(itinerary) => itinerary.iter().map(|s| s.stop_code.clone()).collect(),
                None => current.itinerary.clone(),
            };
            if let Some(missing) = itinerary.iter().find(|s| !stations.contains(*s)) {
                return Err(ModelError::StateInconsistency {
                    route: id.to_string(),
                    station: missing.clone(),
                });
            }
            let vehicles: BTreeSet<String> = match &route.vehicles {
                Some(vehicles) => vehicles.iter().map(|v| v.name.clone()).collect(),
                None => current.vehicles.clone(),
            };

            let station_diff = MemberDiff::between(&current.stations, &stations);
            let vehicle_diff = MemberDiff::between(&current.vehicles, &vehicles);
            let reduce_again = itinerary != current.itinerary || !station_diff.is_unchanged();
            merged = Some((station_diff, vehicle_diff, reduce_again));

            Ok(RouteState {
                code: known(&route.code, &current.code),
                name: known(&route.name, &current.name),
                description: known(&route.description, &current.description),
                color: known(&route.color, &current.color),
                path: known(&route.path, &current.path),
                stations,
                vehicles,
                itinerary,
            })
        })?;
        let Some((station_diff, vehicle_diff, reduce_again)) = merged else {
            return Ok(());
        };
        if changed {
            debug!(
                route = id,
                stations_added = ?station_diff.added,
                stations_removed = ?station_diff.removed,
                vehicles_added = ?vehicle_diff.added,
                vehicles_removed = ?vehicle_diff.removed,
                "route updated"
            );
        }
        self.core.mark_seeded();

        if let Some(registry) = self.core.registry() {
            for station in route.stations.iter().flatten() {
                let member = registry.entry::<MutableStation>(&station.stop_code);
                if let Err(e) = member.apply_snapshot(station) {
                    warn!(route = id, station = %station.stop_code, error = %e, "nested station not applied");
                }
            }
            for vehicle in route.vehicles.iter().flatten() {
                let member = registry.entry::<MutableVehicle>(&vehicle.name);
                if let Err(e) = member.apply_snapshot(vehicle) {
                    warn!(route = id, vehicle = %vehicle.name, error = %e, "nested vehicle not applied");
                }
                if vehicle_diff.added.contains(&vehicle.name) {
                    member.adopt_route(id);
                }
            }
        }

        if reduce_again {
            self.publish_canonical();
        }
        Ok(())
    }

    /// Reduce the committed itinerary and publish it if it changed.
    ///
    /// Reading the state under the canonical channel's lock means the last
    /// of several concurrent publishers always sees the last committed apply.
    fn publish_canonical(&self) {
        let changed = self.canonical.send_if_modified(|published| {
            let canonical = reduce(&self.core.current().itinerary);
            if *published == canonical {
                false
            } else {
                *published = canonical;
                true
            }
        });
        if changed {
            debug!(route = self.identifier(), "canonical itinerary republished");
        }
    }

    /// Apply a vehicle update to the matching member, if any.
    fn apply_vehicle_update(&self, vehicle: &Vehicle) -> Result<(), ModelError> {
        if !self.core.current().vehicles.contains(&vehicle.name) {
            debug!(route = self.identifier(), vehicle = %vehicle.name, "update for non-member vehicle ignored");
            return Ok(());
        }
        let Some(registry) = self.core.registry() else {
            return Ok(());
        };
        let Some(member) = registry.get::<MutableVehicle>(&vehicle.name) else {
            return Ok(());
        };
        member.apply_snapshot(vehicle)?;
        registry.sweep();
        Ok(())
    }
}

impl Registered for MutableRoute {
    fn table(arena: &mut Arena) -> &mut std::collections::HashMap<String, Arc<Self>> {
        &mut arena.routes
    }

    fn create(identifier: &str, registry: Weak<RegistryInner>) -> Self {
        Self {
            core: ModelCore::new(Self::key_for(identifier), registry),
            canonical: watch::channel(Vec::new()).0,
        }
    }

    fn key_for(identifier: &str) -> EntityKey {
        EntityKey::Route(identifier.to_string())
    }

    fn links(&self) -> Vec<EntityKey> {
        let state = self.core.current();
        state
            .stations
            .into_iter()
            .map(EntityKey::Station)
            .chain(state.vehicles.into_iter().map(EntityKey::Vehicle))
            .collect()
    }

    fn stop_sync(&self) -> Option<SyncGuard> {
        self.core.take_sync()
    }
}

impl Synchronized for MutableRoute {
    fn key(&self) -> &EntityKey {
        self.core.key()
    }

    fn handle_event(&self, event: &TopicEvent) -> Option<Result<(), ModelError>> {
        match event {
            TopicEvent::Route(RouteEvent::Update(route)) => Some(self.apply(route)),
            TopicEvent::Route(RouteEvent::VehicleUpdate(vehicle)) => {
                Some(self.apply_vehicle_update(vehicle))
            }
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
    use crate::error::ConnectionError;
    use crate::model::testing::registry;
    use crate::transport::CallReply;
    use serde_json::json;
    use sync_types::{Kwargs, Station};

    fn route(id: &str, stations: &[&str], vehicles: &[&str]) -> Route {
        Route {
            stations: Some(stations.iter().map(|s| Station::new(*s)).collect()),
            vehicles: Some(vehicles.iter().map(|v| Vehicle::new(*v)).collect()),
            ..Route::new(id)
        }
    }

    fn with_itinerary(mut route: Route, itinerary: &[&str]) -> Route {
        route.itinerary = Some(itinerary.iter().map(|s| Station::new(*s)).collect());
        route
    }

    // ===========================================
    // Apply Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn seeding_copies_attributes() {
        let (registry, _mock, _delegate) = registry();
        let snapshot = Route {
            code: Some(10),
            name: Some("Downtown".into()),
            color: Some("#ff0000".into()),
            ..route("10", &["A"], &[])
        };

        let lease = registry.lease_route(&snapshot).unwrap();

        let state = lease.state();
        assert_eq!(state.code, Some(10));
        assert_eq!(state.name.as_deref(), Some("Downtown"));
        assert_eq!(state.color.as_deref(), Some("#ff0000"));
        assert_eq!(state.stations.len(), 1);
        assert_eq!(lease.phase(), SyncPhase::Synchronizing);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_is_idempotent() {
        let (registry, _mock, _delegate) = registry();
        let snapshot = with_itinerary(
            Route {
                name: Some("Downtown".into()),
                ..route("10", &["A", "B", "C"], &["4004"])
            },
            &["A", "B", "C", "A"],
        );
        let lease = registry.lease_route(&snapshot).unwrap();
        let before = lease.state();
        let mut changes = lease.watch();
        let mut canonical = lease.watch_canonical();
        changes.borrow_and_update();
        canonical.borrow_and_update();

        lease.apply(&snapshot).unwrap();

        assert_eq!(lease.state(), before);
        assert!(!changes.has_changed().unwrap());
        assert!(!canonical.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn identifier_mismatch_leaves_state_unchanged() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry
            .lease_route(&Route {
                name: Some("Downtown".into()),
                ..route("10", &["A"], &[])
            })
            .unwrap();
        let before = lease.state();

        let err = lease
            .apply(&Route {
                name: Some("Elsewhere".into()),
                ..route("11", &["Z"], &[])
            })
            .unwrap_err();

        assert_eq!(
            err,
            ModelError::ApplyFailure {
                expected: "10".into(),
                actual: "11".into()
            }
        );
        assert_eq!(lease.state(), before);
        assert!(registry.station("Z").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_values_keep_last_known() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry
            .lease_route(&Route {
                name: Some("Downtown".into()),
                ..route("10", &["A"], &["4004"])
            })
            .unwrap();

        lease
            .apply(&Route {
                color: Some("#00ff00".into()),
                ..Route::new("10")
            })
            .unwrap();

        let state = lease.state();
        assert_eq!(state.name.as_deref(), Some("Downtown"));
        assert_eq!(state.color.as_deref(), Some("#00ff00"));
        assert!(state.stations.contains("A"));
        assert!(state.vehicles.contains("4004"));
    }

    #[tokio::test(start_paused = true)]
    async fn member_diff_keeps_instances() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry.lease_route(&route("10", &["A", "B", "C"], &[])).unwrap();
        let b = registry.station("B").unwrap();
        let c = registry.station("C").unwrap();

        lease.apply(&route("10", &["B", "C", "D"], &[])).unwrap();

        let ids: Vec<String> = lease.state().stations.into_iter().collect();
        assert_eq!(ids, vec!["B", "C", "D"]);
        assert!(Arc::ptr_eq(&b, &registry.station("B").unwrap()));
        assert!(Arc::ptr_eq(&c, &registry.station("C").unwrap()));
        assert!(registry.station("D").is_some());
        assert!(registry.station("A").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn kept_members_are_updated_in_place() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry.lease_route(&route("10", &["A"], &[])).unwrap();
        let a = registry.station("A").unwrap();

        lease
            .apply(&Route {
                stations: Some(vec![Station {
                    name: Some("Main St".into()),
                    ..Station::new("A")
                }]),
                ..Route::new("10")
            })
            .unwrap();

        assert_eq!(a.state().name.as_deref(), Some("Main St"));
        assert!(Arc::ptr_eq(&a, &lease.stations()[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn itinerary_outside_station_set_is_inconsistent() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry.lease_route(&route("10", &["A", "B"], &[])).unwrap();
        let before = lease.state();

        let err = lease
            .apply(&with_itinerary(Route::new("10"), &["A", "X", "B"]))
            .unwrap_err();

        assert_eq!(
            err,
            ModelError::StateInconsistency {
                route: "10".into(),
                station: "X".into()
            }
        );
        assert_eq!(lease.state(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_applies_converge() {
        let (registry, _mock, _delegate) = registry();
        let _lease = registry.lease_route(&route("10", &["A", "B", "C", "D"], &[])).unwrap();
        let model = registry.route("10").unwrap();
        let barrier = std::sync::Barrier::new(2);

        for round in 0..200 {
            let name = format!("Downtown {round}");
            let itinerary: &[&str] = if round % 2 == 0 {
                &["A", "B", "C", "A"]
            } else {
                &["A", "C", "D", "A"]
            };
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    let renamed = Route {
                        name: Some(name.clone()),
                        ..Route::new("10")
                    };
                    model.apply_snapshot(&renamed).unwrap();
                });
                scope.spawn(|| {
                    barrier.wait();
                    model
                        .apply_snapshot(&with_itinerary(Route::new("10"), itinerary))
                        .unwrap();
                });
            });

            let state = model.state();
            assert_eq!(state.name.as_deref(), Some(name.as_str()));
            assert_eq!(state.itinerary, itinerary);
            assert_eq!(model.canonical_itinerary(), reduce(&state.itinerary));
        }
    }

    // ===========================================
    // Canonical Itinerary Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn canonical_itinerary_follows_itinerary() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry
            .lease_route(&with_itinerary(
                route("10", &["A", "B", "C", "D"], &[]),
                &["A", "B", "C", "B", "D", "A"],
            ))
            .unwrap();

        let canonical = lease.canonical_itinerary();
        assert_eq!(canonical.len(), 4);
        assert!(canonical[0].is_constant());
        assert!(canonical[1].is_constant());
        let conditional: BTreeSet<&str> = canonical
            .iter()
            .filter(|stop| !stop.is_constant())
            .map(|stop| stop.station().as_str())
            .collect();
        assert_eq!(conditional, BTreeSet::from(["C", "D"]));
    }

    #[tokio::test(start_paused = true)]
    async fn canonical_republished_only_on_change() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry
            .lease_route(&with_itinerary(
                route("10", &["A", "B", "C"], &[]),
                &["A", "B", "C", "A"],
            ))
            .unwrap();
        let mut canonical = lease.watch_canonical();
        canonical.borrow_and_update();

        // Station set changes, reduced itinerary does not.
        lease
            .apply(&with_itinerary(
                route("10", &["A", "B", "C", "D"], &[]),
                &["A", "B", "C", "A"],
            ))
            .unwrap();
        assert!(!canonical.has_changed().unwrap());

        lease
            .apply(&with_itinerary(Route::new("10"), &["A", "B", "D", "A"]))
            .unwrap();
        assert!(canonical.has_changed().unwrap());
        let stops: Vec<String> = canonical
            .borrow_and_update()
            .iter()
            .map(|stop| stop.station().clone())
            .collect();
        assert_eq!(stops, vec!["A", "B", "D"]);
    }

    // ===========================================
    // Vehicle Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn entering_vehicle_gets_route_reference() {
        let (registry, _mock, _delegate) = registry();
        let other = registry.lease_route(&route("11", &[], &["5005"])).unwrap();
        let lease = registry.lease_route(&route("10", &[], &["4004", "5005"])).unwrap();

        let vehicle = registry.vehicle("4004").unwrap();
        assert_eq!(vehicle.state().route.as_deref(), Some("10"));
        // Never overwritten.
        let shared = registry.vehicle("5005").unwrap();
        assert_eq!(shared.state().route.as_deref(), Some("11"));
        drop((other, lease));
    }

    #[tokio::test(start_paused = true)]
    async fn vehicle_update_applies_to_member_only() {
        let (registry, _mock, _delegate) = registry();
        let lease = registry.lease_route(&route("10", &[], &["4004"])).unwrap();

        let moved = Vehicle {
            heading: Some(180.0),
            ..Vehicle::new("4004")
        };
        let event = TopicEvent::Route(RouteEvent::VehicleUpdate(moved));
        assert_eq!(lease.handle_event(&event), Some(Ok(())));
        assert_eq!(
            registry.vehicle("4004").unwrap().state().heading,
            Some(180.0)
        );

        let stranger = TopicEvent::Route(RouteEvent::VehicleUpdate(Vehicle::new("9999")));
        assert_eq!(lease.handle_event(&stranger), Some(Ok(())));
        assert!(registry.vehicle("9999").is_none());
    }

    // ===========================================
    // Synchronization Tests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn last_event_is_applied_first() {
        let (registry, mock, _delegate) = registry();
        mock.queue_reply(
            sync_types::LAST_EVENT_PROCEDURE,
            CallReply::result(vec![json!({"short_name": "10", "name": "Downtown"})]),
        );

        let lease = registry.lease_route(&Route::new("10")).unwrap();
        let mut phase = lease.watch_phase();
        phase.wait_for(|p| *p == SyncPhase::Live).await.unwrap();

        assert_eq!(lease.state().name.as_deref(), Some("Downtown"));
        let calls = mock.calls();
        assert_eq!(calls[0].0, sync_types::LAST_EVENT_PROCEDURE);
        assert_eq!(calls[0].1, vec![json!("routes.10"), json!("routes.10")]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_event_before_last_event_is_applied_after_it() {
        let (registry, mock, _delegate) = registry();
        mock.queue_reply(sync_types::LAST_EVENT_PROCEDURE, CallReply::Silent);
        let lease = registry.lease_route(&Route::new("10")).unwrap();
        assert!(
            mock.wait_for(|m| m.is_subscribed("routes.10")
                && m.call_count(sync_types::LAST_EVENT_PROCEDURE) == 1)
                .await
        );

        assert!(mock.publish(
            "routes.10",
            vec![json!({"short_name": "10", "name": "Downtown"})],
            Kwargs::new(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        // Held until the last event is in.
        assert_eq!(lease.state().name, None);
        assert_eq!(lease.phase(), SyncPhase::Synchronizing);

        assert!(mock.answer_held(
            sync_types::LAST_EVENT_PROCEDURE,
            CallReply::result(vec![
                json!({"short_name": "10", "name": "Old Downtown", "color": "#123456"})
            ]),
        ));

        assert!(mock.wait_for(|_| lease.state().name.as_deref() == Some("Downtown")).await);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let state = lease.state();
        assert_eq!(state.name.as_deref(), Some("Downtown"));
        assert_eq!(state.color.as_deref(), Some("#123456"));
        assert_eq!(lease.phase(), SyncPhase::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn live_events_are_applied() {
        let (registry, mock, _delegate) = registry();
        let lease = registry.lease_route(&Route::new("10")).unwrap();
        assert!(mock.wait_for(|m| m.is_subscribed("routes.10")).await);

        mock.publish(
            "routes.10",
            vec![json!({"short_name": "10", "color": "#123456"})],
            Kwargs::new(),
        );

        let mut changes = lease.watch();
        changes
            .wait_for(|state| state.color.is_some())
            .await
            .unwrap();
        assert_eq!(lease.phase(), SyncPhase::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn inconsistent_event_is_delegated_and_skipped() {
        let (registry, mock, delegate) = registry();
        let lease = registry.lease_route(&route("10", &["A"], &[])).unwrap();
        assert!(mock.wait_for(|m| m.is_subscribed("routes.10")).await);

        mock.publish(
            "routes.10",
            vec![json!({"short_name": "10", "stations": ["X"]})],
            Kwargs::new(),
        );
        assert!(mock.wait_for(|_| !delegate.errors().is_empty()).await);
        mock.publish(
            "routes.10",
            vec![json!({"short_name": "10", "name": "Downtown"})],
            Kwargs::new(),
        );

        let mut changes = lease.watch();
        changes.wait_for(|state| state.name.is_some()).await.unwrap();
        assert_eq!(
            delegate.errors()[0],
            (
                EntityKey::Route("10".into()),
                ModelError::StateInconsistency {
                    route: "10".into(),
                    station: "X".into()
                }
            )
        );
        assert!(lease.is_synchronizing());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_is_delegated() {
        let (registry, mock, delegate) = registry();
        for _ in 0..4 {
            mock.queue_reply(
                sync_types::LAST_EVENT_PROCEDURE,
                CallReply::error("shark.error.unavailable"),
            );
        }
        let lease = registry
            .lease_route(&Route {
                name: Some("Downtown".into()),
                ..Route::new("10")
            })
            .unwrap();

        assert!(mock.wait_for(|_| !delegate.errors().is_empty()).await);

        assert_eq!(mock.call_count(sync_types::LAST_EVENT_PROCEDURE), 4);
        assert_eq!(delegate.errors().len(), 1);
        assert!(matches!(
            &delegate.errors()[0].1,
            ModelError::Connection(ConnectionError::Remote { .. })
        ));
        assert!(mock.wait_for(|_| !lease.is_synchronizing()).await);
        // Stale but still queryable.
        assert_eq!(lease.state().name.as_deref(), Some("Downtown"));
        assert_eq!(lease.phase(), SyncPhase::Synchronizing);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_events_are_not_interpreted() {
        let (registry, _mock, delegate) = registry();
        let lease = registry.lease_route(&Route::new("10")).unwrap();

        let foreign = TopicEvent::Station(sync_types::StationEvent::Update(Station::new("A")));
        assert_eq!(lease.handle_event(&foreign), None);
        assert!(delegate.events().is_empty());
    }
}
