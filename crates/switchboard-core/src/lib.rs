//! # switchboard-core
//!
//! Shared vocabulary for the switchboard crates:
//!
//! - [`envelope`]: inbound/outbound wire messages
//! - [`errors`]: the tracker error taxonomy and error codes
//! - [`outcome`]: the `{success, error?, ...}` handler result contract
//! - [`types`]: origins, component descriptors, id generation
//! - [`logging`]: tracing subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod logging;
pub mod outcome;
pub mod types;

pub use envelope::{
    ErrorEvent, EventRequest, InboundMessage, OutboundEnvelope, OutboundKind, Registrations,
    UiEvent,
};
pub use errors::{EnvelopeError, TrackError};
pub use outcome::HandlerResult;
pub use types::{ComponentDescriptor, Origin};
