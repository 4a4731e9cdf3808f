//! Immutable entity snapshots decoded from wire payloads.
//!
//! A snapshot is one entity's state at a point in time. Every field other
//! than the identifier is optional, and `None` means "unknown" rather than
//! "empty". Payloads are JSON-like values and decode the same way under
//! both WAMP serializations.
//!
//! # Wire shapes
//!
//! - A bare string is an id-only reference, optionally namespaced
//!   (`"routes.10"` and `"10"` both name route `10`).
//! - An object carries the identifier either under its natural key
//!   (`short_name`, `stop_code`, `name`) or as a namespaced `id`.
//! - Associations live under `associated_objects`, keyed by the backend's
//!   qualified type name (`"Shark::Station"` and friends).

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::topic::{unqualify, Namespace, Topic};
use crate::DecodeError;

/// Explicit per-type schema for snapshot types.
pub trait Model: Clone + std::fmt::Debug + PartialEq + DeserializeOwned + Send + Sync + 'static {
    /// Topic namespace for this entity type.
    const NAMESPACE: Namespace;

    /// Backend type name used as an `associated_objects` key.
    const QUALIFIED_NAME: &'static str;

    /// The stable identifier.
    fn identifier(&self) -> &str;

    /// Whether every optional attribute is known.
    fn is_fully_defined(&self) -> bool;

    /// The topic this entity publishes on.
    fn topic(&self) -> Result<Topic, DecodeError> {
        Self::topic_for(self.identifier())
    }

    /// The topic for an identifier of this type.
    fn topic_for(identifier: &str) -> Result<Topic, DecodeError> {
        Topic::new(Self::NAMESPACE, identifier)
    }

    /// Decode a snapshot from a payload value.
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Self::deserialize(value).map_err(|e| DecodeError::InvalidSnapshot(e.to_string()))
    }
}

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "PointRepr")]
pub struct Point {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl Point {
    /// Create a point.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        Some(Self::new(lat?, lng?))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Pair(f64, f64),
    Object {
        #[serde(alias = "latitude")]
        lat: f64,
        #[serde(alias = "lon", alias = "longitude")]
        lng: f64,
    },
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Pair(lat, lng) | PointRepr::Object { lat, lng } => Point { lat, lng },
        }
    }
}

/// `associated_objects` block.
#[derive(Default, Deserialize)]
struct Associated {
    #[serde(rename = "Shark::Route")]
    routes: Option<Vec<Route>>,
    #[serde(rename = "Shark::Station")]
    stations: Option<Vec<Station>>,
    #[serde(rename = "Shark::Vehicle")]
    vehicles: Option<Vec<Vehicle>>,
}

fn identifier_of(
    namespace: Namespace,
    natural: Option<String>,
    id: Option<String>,
) -> Result<String, DecodeError> {
    let identifier = natural
        .or_else(|| id.map(|id| unqualify(namespace, &id).to_string()))
        .unwrap_or_default();
    if identifier.is_empty() {
        return Err(DecodeError::InvalidSnapshot(format!(
            "{} payload has no identifier",
            namespace
        )));
    }
    Ok(identifier)
}

fn id_reference(namespace: Namespace, id: &str) -> Result<String, DecodeError> {
    identifier_of(namespace, None, Some(id.to_string()))
}

// ===========================================================================
// Route
// ===========================================================================

/// A transit route.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "RouteRepr")]
pub struct Route {
    /// Identifier, e.g. `"10"`
    pub short_name: String,
    /// Numeric agency code
    pub code: Option<i64>,
    /// Display name
    pub name: Option<String>,
    /// Longer description
    pub description: Option<String>,
    /// Display color, as sent by the backend (usually hex)
    pub color: Option<String>,
    /// Drawn path
    pub path: Option<Vec<Point>>,
    /// Stations served by the route
    pub stations: Option<Vec<Station>>,
    /// Vehicles currently on the route
    pub vehicles: Option<Vec<Vehicle>>,
    /// Raw stop-by-stop itinerary, possibly looping
    pub itinerary: Option<Vec<Station>>,
}

impl Route {
    /// An id-only route reference.
    pub fn new(short_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            ..Default::default()
        }
    }
}

impl Model for Route {
    const NAMESPACE: Namespace = Namespace::Routes;
    const QUALIFIED_NAME: &'static str = "Shark::Route";

    fn identifier(&self) -> &str {
        &self.short_name
    }

    fn is_fully_defined(&self) -> bool {
        self.code.is_some()
            && self.name.is_some()
            && self.description.is_some()
            && self.color.is_some()
            && self.path.is_some()
            && self.stations.is_some()
            && self.vehicles.is_some()
            && self.itinerary.is_some()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RouteRepr {
    Id(String),
    Object(RouteObject),
}

#[derive(Deserialize)]
struct RouteObject {
    short_name: Option<String>,
    id: Option<String>,
    code: Option<i64>,
    name: Option<String>,
    description: Option<String>,
    color: Option<String>,
    path: Option<Vec<Point>>,
    #[serde(default)]
    associated_objects: Associated,
    stations: Option<Vec<Station>>,
}

impl TryFrom<RouteRepr> for Route {
    type Error = DecodeError;

    fn try_from(repr: RouteRepr) -> Result<Self, Self::Error> {
        match repr {
            RouteRepr::Id(id) => Ok(Route::new(id_reference(Namespace::Routes, &id)?)),
            RouteRepr::Object(o) => Ok(Route {
                short_name: identifier_of(Namespace::Routes, o.short_name, o.id)?,
                code: o.code,
                name: o.name,
                description: o.description,
                color: o.color,
                path: o.path,
                stations: o.associated_objects.stations,
                vehicles: o.associated_objects.vehicles,
                itinerary: o.stations,
            }),
        }
    }
}

// ===========================================================================
// Station
// ===========================================================================

/// A stop.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "StationRepr")]
pub struct Station {
    /// Identifier, e.g. `"BUS100W"`
    pub stop_code: String,
    /// Display name
    pub name: Option<String>,
    /// Longer description
    pub description: Option<String>,
    /// Location
    pub position: Option<Point>,
    /// Routes serving this station
    pub routes: Option<Vec<Route>>,
    /// Vehicles at or approaching this station
    pub vehicles: Option<Vec<Vehicle>>,
}

impl Station {
    /// An id-only station reference.
    pub fn new(stop_code: impl Into<String>) -> Self {
        Self {
            stop_code: stop_code.into(),
            ..Default::default()
        }
    }
}

impl Model for Station {
    const NAMESPACE: Namespace = Namespace::Stations;
    const QUALIFIED_NAME: &'static str = "Shark::Station";

    fn identifier(&self) -> &str {
        &self.stop_code
    }

    fn is_fully_defined(&self) -> bool {
        self.name.is_some()
            && self.description.is_some()
            && self.position.is_some()
            && self.routes.is_some()
            && self.vehicles.is_some()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StationRepr {
    Id(String),
    Object(StationObject),
}

#[derive(Deserialize)]
struct StationObject {
    stop_code: Option<String>,
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "lon", alias = "longitude")]
    lng: Option<f64>,
    #[serde(default)]
    associated_objects: Associated,
}

impl TryFrom<StationRepr> for Station {
    type Error = DecodeError;

    fn try_from(repr: StationRepr) -> Result<Self, Self::Error> {
        match repr {
            StationRepr::Id(id) => Ok(Station::new(id_reference(Namespace::Stations, &id)?)),
            StationRepr::Object(o) => Ok(Station {
                stop_code: identifier_of(Namespace::Stations, o.stop_code, o.id)?,
                name: o.name,
                description: o.description,
                position: Point::from_parts(o.lat, o.lng),
                routes: o.associated_objects.routes,
                vehicles: o.associated_objects.vehicles,
            }),
        }
    }
}

// ===========================================================================
// Vehicle
// ===========================================================================

/// A vehicle in service.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "VehicleRepr")]
pub struct Vehicle {
    /// Identifier, e.g. `"4004"`
    pub name: String,
    /// Numeric agency code
    pub code: Option<i64>,
    /// Last reported location
    pub position: Option<Point>,
    /// Passenger capacity
    pub capacity: Option<i64>,
    /// Passengers on board
    pub onboard: Option<i64>,
    /// Load factor, 0 to 100
    pub saturation: Option<f64>,
    /// Station most recently served
    pub last_station: Option<Station>,
    /// Station served next
    pub next_station: Option<Station>,
    /// Route being driven
    pub route: Option<Route>,
    /// Seconds ahead (negative) or behind schedule
    pub schedule_delta: Option<f64>,
    /// Compass heading in degrees
    pub heading: Option<f64>,
    /// Speed in km/h
    pub speed: Option<f64>,
}

impl Vehicle {
    /// An id-only vehicle reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Model for Vehicle {
    const NAMESPACE: Namespace = Namespace::Vehicles;
    const QUALIFIED_NAME: &'static str = "Shark::Vehicle";

    fn identifier(&self) -> &str {
        &self.name
    }

    fn is_fully_defined(&self) -> bool {
        self.code.is_some()
            && self.position.is_some()
            && self.capacity.is_some()
            && self.onboard.is_some()
            && self.saturation.is_some()
            && self.last_station.is_some()
            && self.next_station.is_some()
            && self.route.is_some()
            && self.schedule_delta.is_some()
            && self.heading.is_some()
            && self.speed.is_some()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VehicleRepr {
    Id(String),
    Object(VehicleObject),
}

#[derive(Deserialize)]
struct VehicleObject {
    name: Option<String>,
    id: Option<String>,
    code: Option<i64>,
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "lon", alias = "longitude")]
    lng: Option<f64>,
    capacity: Option<i64>,
    onboard: Option<i64>,
    saturation: Option<f64>,
    last_station: Option<Station>,
    next_station: Option<Station>,
    route: Option<Route>,
    schedule_delta: Option<f64>,
    heading: Option<f64>,
    speed: Option<f64>,
}

impl TryFrom<VehicleRepr> for Vehicle {
    type Error = DecodeError;

    fn try_from(repr: VehicleRepr) -> Result<Self, Self::Error> {
        match repr {
            VehicleRepr::Id(id) => Ok(Vehicle::new(id_reference(Namespace::Vehicles, &id)?)),
            VehicleRepr::Object(o) => Ok(Vehicle {
                name: identifier_of(Namespace::Vehicles, o.name, o.id)?,
                code: o.code,
                position: Point::from_parts(o.lat, o.lng),
                capacity: o.capacity,
                onboard: o.onboard,
                saturation: o.saturation,
                last_station: o.last_station,
                next_station: o.next_station,
                route: o.route,
                schedule_delta: o.schedule_delta,
                heading: o.heading,
                speed: o.speed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_is_id_only_reference() {
        let route = Route::from_value(&json!("routes.10")).unwrap();
        assert_eq!(route, Route::new("10"));

        let station = Station::from_value(&json!("BUS100W")).unwrap();
        assert_eq!(station.stop_code, "BUS100W");
        assert!(station.name.is_none());
    }

    #[test]
    fn decodes_route_object() {
        let route = Route::from_value(&json!({
            "short_name": "10",
            "code": 10,
            "name": "Salisbury",
            "color": "4C9A2A",
            "path": [[40.42, -86.91], {"lat": 40.43, "lng": -86.92}],
            "associated_objects": {
                "Shark::Station": ["stations.A", {"stop_code": "B", "name": "Walmart"}],
                "Shark::Vehicle": ["vehicles.4004"]
            },
            "stations": ["A", "B", "A"]
        }))
        .unwrap();

        assert_eq!(route.identifier(), "10");
        assert_eq!(route.code, Some(10));
        assert_eq!(route.description, None);
        assert_eq!(
            route.path,
            Some(vec![Point::new(40.42, -86.91), Point::new(40.43, -86.92)])
        );
        let stations = route.stations.unwrap();
        assert_eq!(stations[0].stop_code, "A");
        assert_eq!(stations[1].name.as_deref(), Some("Walmart"));
        assert_eq!(route.vehicles.unwrap()[0].name, "4004");
        let itinerary: Vec<_> = route
            .itinerary
            .unwrap()
            .into_iter()
            .map(|s| s.stop_code)
            .collect();
        assert_eq!(itinerary, vec!["A", "B", "A"]);
    }

    #[test]
    fn namespaced_id_field_is_identifier() {
        let station = Station::from_value(&json!({"id": "stations.BUS100W", "lat": 1.0, "lng": 2.0}))
            .unwrap();
        assert_eq!(station.stop_code, "BUS100W");
        assert_eq!(station.position, Some(Point::new(1.0, 2.0)));
    }

    #[test]
    fn missing_identifier_fails() {
        assert!(Route::from_value(&json!({"name": "Salisbury"})).is_err());
        assert!(Vehicle::from_value(&json!("")).is_err());
        assert!(Station::from_value(&json!(42)).is_err());
    }

    #[test]
    fn decodes_vehicle_references() {
        let vehicle = Vehicle::from_value(&json!({
            "name": "4004",
            "lat": 40.4,
            "lng": -86.9,
            "saturation": 42.5,
            "last_station": "stations.A",
            "next_station": {"stop_code": "B"},
            "route": "routes.10",
            "heading": 90
        }))
        .unwrap();
        assert_eq!(vehicle.position, Some(Point::new(40.4, -86.9)));
        assert_eq!(vehicle.last_station, Some(Station::new("A")));
        assert_eq!(vehicle.next_station, Some(Station::new("B")));
        assert_eq!(vehicle.route, Some(Route::new("10")));
        assert_eq!(vehicle.heading, Some(90.0));
        assert_eq!(vehicle.speed, None);
    }

    #[test]
    fn half_a_position_is_unknown() {
        let vehicle = Vehicle::from_value(&json!({"name": "4004", "lat": 40.4})).unwrap();
        assert_eq!(vehicle.position, None);
    }

    #[test]
    fn fully_defined_requires_every_attribute() {
        let mut station = Station {
            name: Some("Walmart".into()),
            description: Some("East side".into()),
            position: Some(Point::new(0.0, 0.0)),
            routes: Some(vec![]),
            ..Station::new("A")
        };
        assert!(!station.is_fully_defined());
        station.vehicles = Some(vec![]);
        assert!(station.is_fully_defined());
    }

    #[test]
    fn topic_uses_namespace() {
        assert_eq!(Route::new("10").topic().unwrap().to_string(), "routes.10");
        assert_eq!(Vehicle::topic_for("4004").unwrap().to_string(), "vehicles.4004");
        assert!(Station::new("").topic().is_err());
    }
}
