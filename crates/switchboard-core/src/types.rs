//! Identity and descriptor types shared across crates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an inbound event came from.
///
/// Errors are routed back to the same (scope, client[, component]) triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    /// Session namespace (one agent instance).
    pub scope: String,
    /// Client within the scope.
    pub client_id: String,
    /// Component socket the event arrived on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
}

impl Origin {
    /// Origin of a top-level client session.
    pub fn client(scope: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            client_id: client_id.into(),
            component_id: None,
        }
    }

    /// Attach the component the event arrived on.
    #[must_use]
    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }
}

/// Public description of a component, as listed to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptor {
    /// Stable component id used in envelopes.
    pub id: String,
    /// Display name.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Client features the component needs to render.
    #[serde(default)]
    pub required_features: Vec<String>,
    /// Initial modal configuration handed to the client.
    #[serde(default)]
    pub default_modal_config: Value,
}

impl ComponentDescriptor {
    /// Descriptor with only id and name set.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            required_features: Vec::new(),
            default_modal_config: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a required client feature.
    #[must_use]
    pub fn requires(mut self, feature: impl Into<String>) -> Self {
        self.required_features.push(feature.into());
        self
    }

    /// Set the default modal configuration.
    #[must_use]
    pub fn with_modal_config(mut self, config: Value) -> Self {
        self.default_modal_config = config;
        self
    }
}

/// Generate a fresh, time-ordered request id.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::now_v7().simple())
}

/// Generate a fresh connection id.
pub fn new_connection_id() -> String {
    format!("conn_{}", uuid::Uuid::now_v7().simple())
}

/// Current UTC time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
