//! Topic Event Codec.
//!
//! Maps raw event and RPC payloads onto the closed [`TopicEvent`] union.
//! Decoding is a pure function of its inputs: it never fails and never
//! panics. Payloads that do not fit a known shape become
//! [`TopicEvent::DecodeFailure`], and callers decide whether that is fatal.

use serde_json::Value;

use crate::snapshot::{Model, Route, Station, Vehicle};
use crate::topic::{Namespace, Topic};
use crate::wamp::{Args, Kwargs};

/// Procedure returning the most recent event published on a topic.
pub const LAST_EVENT_PROCEDURE: &str = "meta.last_event";

/// Keyword argument carrying the event kind on entity topics.
const EVENT_KIND: &str = "event";

/// A typed event received on a topic or returned from a call.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEvent {
    /// `meta.*`
    Meta(MetaEvent),
    /// `routes.*`
    Route(RouteEvent),
    /// `stations.*`
    Station(StationEvent),
    /// `vehicles.*`
    Vehicle(VehicleEvent),
    /// `agency.*` list procedures
    Agency(AgencyEvent),
    /// Payload did not match any known shape
    DecodeFailure {
        /// Topic or procedure the payload arrived on
        topic: String,
        /// What did not match
        reason: String,
    },
}

/// Events in the `meta` namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaEvent {
    /// The last payload published on `topic`, undecoded.
    LastEvent {
        /// Topic the payload was published on
        topic: String,
        /// Positional payload
        args: Args,
        /// Keyword payload
        kwargs: Kwargs,
    },
}

/// Events on a route's topic.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    /// Full route replace
    Update(Route),
    /// One vehicle on the route changed
    VehicleUpdate(Vehicle),
}

/// Events on a station's topic.
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// Full station replace
    Update(Station),
}

/// Events on a vehicle's topic.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleEvent {
    /// Full vehicle replace
    Update(Vehicle),
}

/// Results of the `agency.*` list procedures.
#[derive(Debug, Clone, PartialEq)]
pub enum AgencyEvent {
    /// `agency.routes`
    Routes(Vec<Route>),
    /// `agency.stations`
    Stations(Vec<Station>),
    /// `agency.vehicles`
    Vehicles(Vec<Vehicle>),
}

impl TopicEvent {
    /// Decode an event published on `topic`.
    pub fn decode(topic: &Topic, args: &Args, kwargs: &Kwargs) -> TopicEvent {
        let kind = kwargs
            .get(EVENT_KIND)
            .and_then(Value::as_str)
            .unwrap_or("update");

        let decoded = match (topic.namespace(), kind) {
            (Namespace::Routes, "update") => {
                payload::<Route>(args).map(|r| TopicEvent::Route(RouteEvent::Update(r)))
            }
            (Namespace::Routes, "vehicle_update") => {
                payload::<Vehicle>(args).map(|v| TopicEvent::Route(RouteEvent::VehicleUpdate(v)))
            }
            (Namespace::Stations, "update") => {
                payload::<Station>(args).map(|s| TopicEvent::Station(StationEvent::Update(s)))
            }
            (Namespace::Vehicles, "update") => {
                payload::<Vehicle>(args).map(|v| TopicEvent::Vehicle(VehicleEvent::Update(v)))
            }
            (Namespace::Meta, _) => Ok(TopicEvent::Meta(MetaEvent::LastEvent {
                topic: args
                    .first()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| topic.to_string()),
                args: args.clone(),
                kwargs: kwargs.clone(),
            })),
            (Namespace::Agency, _) => agency(topic.identifier(), args),
            (namespace, kind) => Err(format!("no {:?} event in namespace {}", kind, namespace)),
        };

        decoded.unwrap_or_else(|reason| TopicEvent::DecodeFailure {
            topic: topic.to_string(),
            reason,
        })
    }

    /// Decode the result of calling `procedure` with `call_args`.
    ///
    /// `meta.last_event` is answered with the stored payload of the topic
    /// named by its first argument. Every other procedure decodes as if the
    /// result had been published on a topic of the same name.
    pub fn decode_rpc(procedure: &str, call_args: &Args, args: &Args, kwargs: &Kwargs) -> TopicEvent {
        if procedure == LAST_EVENT_PROCEDURE {
            return match call_args.first().and_then(Value::as_str) {
                Some(topic) => TopicEvent::Meta(MetaEvent::LastEvent {
                    topic: topic.to_string(),
                    args: args.clone(),
                    kwargs: kwargs.clone(),
                }),
                None => TopicEvent::DecodeFailure {
                    topic: procedure.to_string(),
                    reason: "last event requested without a topic".into(),
                },
            };
        }

        match Topic::parse(procedure) {
            Ok(topic) => TopicEvent::decode(&topic, args, kwargs),
            Err(e) => TopicEvent::DecodeFailure {
                topic: procedure.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Whether this is a [`TopicEvent::DecodeFailure`].
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, TopicEvent::DecodeFailure { .. })
    }
}

impl MetaEvent {
    /// Decode the carried payload against the topic it was published on.
    ///
    /// Returns `None` when the backend had nothing stored for the topic.
    pub fn replay(&self) -> Option<TopicEvent> {
        let MetaEvent::LastEvent {
            topic,
            args,
            kwargs,
        } = self;
        if args.iter().all(Value::is_null) && kwargs.is_empty() {
            return None;
        }

        let event = match Topic::parse(topic) {
            Ok(parsed) if parsed.namespace() == Namespace::Meta => TopicEvent::DecodeFailure {
                topic: topic.clone(),
                reason: "last event of a meta topic".into(),
            },
            Ok(parsed) => TopicEvent::decode(&parsed, args, kwargs),
            Err(e) => TopicEvent::DecodeFailure {
                topic: topic.clone(),
                reason: e.to_string(),
            },
        };
        Some(event)
    }
}

fn payload<M: Model>(args: &Args) -> Result<M, String> {
    let value = args.first().ok_or_else(|| "missing payload".to_string())?;
    M::from_value(value).map_err(|e| e.to_string())
}

fn list<M: Model>(args: &Args) -> Result<Vec<M>, String> {
    let items = match args.first() {
        Some(Value::Array(items)) => items.as_slice(),
        _ => args.as_slice(),
    };
    items
        .iter()
        .map(|item| M::from_value(item).map_err(|e| e.to_string()))
        .collect()
}

fn agency(collection: &str, args: &Args) -> Result<TopicEvent, String> {
    let event = match collection {
        "routes" => AgencyEvent::Routes(list(args)?),
        "stations" => AgencyEvent::Stations(list(args)?),
        "vehicles" => AgencyEvent::Vehicles(list(args)?),
        other => return Err(format!("unknown agency collection {:?}", other)),
    };
    Ok(TopicEvent::Agency(event))
}
