//! Topic naming: `<namespace>.<identifier>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DecodeError;

/// The closed set of topic namespaces the backend publishes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// `routes.<short_name>`
    Routes,
    /// `stations.<stop_code>`
    Stations,
    /// `vehicles.<name>`
    Vehicles,
    /// `meta.<procedure>`, e.g. `meta.last_event`
    Meta,
    /// `agency.<collection>` list procedures
    Agency,
}

impl Namespace {
    /// The namespace as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Routes => "routes",
            Namespace::Stations => "stations",
            Namespace::Vehicles => "vehicles",
            Namespace::Meta => "meta",
            Namespace::Agency => "agency",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routes" => Ok(Namespace::Routes),
            "stations" => Ok(Namespace::Stations),
            "vehicles" => Ok(Namespace::Vehicles),
            "meta" => Ok(Namespace::Meta),
            "agency" => Ok(Namespace::Agency),
            other => Err(DecodeError::InvalidTopic(other.to_string())),
        }
    }
}

/// A validated publish/subscribe topic.
///
/// Both halves are non-empty. The identifier may itself contain dots; only
/// the first dot separates the namespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    namespace: Namespace,
    identifier: String,
}

impl Topic {
    /// Build a topic from its parts.
    pub fn new(namespace: Namespace, identifier: impl Into<String>) -> Result<Self, DecodeError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(DecodeError::InvalidTopic(format!("{}.", namespace)));
        }
        Ok(Self {
            namespace,
            identifier,
        })
    }

    /// Parse a `namespace.identifier` string.
    pub fn parse(topic: &str) -> Result<Self, DecodeError> {
        let (namespace, identifier) = topic
            .split_once('.')
            .ok_or_else(|| DecodeError::InvalidTopic(topic.to_string()))?;
        let namespace = namespace
            .parse::<Namespace>()
            .map_err(|_| DecodeError::InvalidTopic(topic.to_string()))?;
        Self::new(namespace, identifier).map_err(|_| DecodeError::InvalidTopic(topic.to_string()))
    }

    /// The namespace half.
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// The identifier half.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Strip a `namespace.` prefix from an identifier if present.
///
/// References on the wire are sometimes fully qualified (`"routes.10"`) and
/// sometimes bare (`"10"`).
pub fn unqualify(namespace: Namespace, id: &str) -> &str {
    id.strip_prefix(namespace.as_str())
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(id)
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.identifier)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self)
    }
}

impl FromStr for Topic {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
