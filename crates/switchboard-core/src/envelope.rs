//! Wire envelopes exchanged over a duplex connection.
//!
//! Inbound: `{"type": "event" | "ping" | "get_registrations", "data": {...}}`.
//! Outbound: `{"type": "ui_event" | "pong" | "component_registrations" | "error",
//! "data": {...}, "timestamp": "..."}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;
use crate::types::{ComponentDescriptor, now_rfc3339};

// ── Inbound ─────────────────────────────────────────────────────────

/// A decoded client message.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// Invoke an action on a component.
    Event(EventRequest),
    /// Liveness probe; answered with `pong`.
    Ping,
    /// Ask for the components available in the caller's scope.
    GetRegistrations,
}

/// `data` block of an inbound `event`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    /// Target component id.
    pub component: String,
    /// Action on the component.
    pub action: String,
    /// Handler-specific payload, passed through untouched.
    #[serde(default)]
    pub payload: Value,
    /// Client-side correlation id. Informational only: the server always
    /// generates its own request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl InboundMessage {
    /// Decode an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            "event" => Ok(Self::Event(serde_json::from_value(raw.data)?)),
            "ping" => Ok(Self::Ping),
            "get_registrations" => Ok(Self::GetRegistrations),
            _ => Err(EnvelopeError::UnknownType(raw.kind)),
        }
    }

    /// Wire name of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Ping => "ping",
            Self::GetRegistrations => "get_registrations",
        }
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// Kind tag of an outbound envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// Handler-produced event for the UI.
    UiEvent,
    /// Reply to `ping`.
    Pong,
    /// Reply to `get_registrations`.
    ComponentRegistrations,
    /// Failure report for an inbound message.
    Error,
}

/// A server-to-client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    /// Kind-specific body.
    pub data: Value,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

/// Body of a `ui_event`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiEvent {
    /// Component that produced the event.
    pub component: String,
    /// Action the event belongs to.
    pub action: String,
    /// Request that produced it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Handler-specific content.
    #[serde(default)]
    pub payload: Value,
}

/// Body of an `error` envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Component the failed message targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Action the failed message targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Tracked request, when one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Human-readable reason.
    pub error: String,
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Body of a `component_registrations` envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registrations {
    /// Scope the listing applies to.
    pub scope: String,
    /// Components available in the scope.
    pub components: Vec<ComponentDescriptor>,
}

impl OutboundEnvelope {
    fn new(kind: OutboundKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: now_rfc3339(),
        }
    }

    /// A handler event for the UI.
    pub fn ui_event(event: &UiEvent) -> Self {
        Self::new(OutboundKind::UiEvent, serde_json::to_value(event).unwrap_or_default())
    }

    /// Reply to a `ping`.
    pub fn pong() -> Self {
        Self::new(OutboundKind::Pong, Value::Object(serde_json::Map::new()))
    }

    /// Component listing for a scope.
    pub fn registrations(registrations: &Registrations) -> Self {
        Self::new(
            OutboundKind::ComponentRegistrations,
            serde_json::to_value(registrations).unwrap_or_default(),
        )
    }

    /// Failure report.
    pub fn error(event: &ErrorEvent) -> Self {
        Self::new(OutboundKind::Error, serde_json::to_value(event).unwrap_or_default())
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode `data` into its typed body.
    pub fn decode_data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone())
    }
}
