//! Turns inbound envelopes into tracked handler calls and routes failures
//! back to the client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use switchboard_core::errors::INVALID_ENVELOPE;
use switchboard_core::types::new_request_id;
use switchboard_core::{
    ErrorEvent, EventRequest, HandlerResult, InboundMessage, Origin, OutboundEnvelope,
    Registrations, TrackError,
};
use tracing::{debug, warn};

use crate::connections::{ConnectionRegistry, SendReport};
use crate::handlers::{ActionContext, ActionHandler, HandlerRegistry};
use crate::metrics::{DISPATCH_ERRORS_TOTAL, DISPATCH_TOTAL};
use crate::tracker::{HandlerCall, RequestTracker, TrackRequest, TrackedHandler};

/// Adapts a raw [`ActionHandler`] to the tracker's result contract.
struct ActionAdapter {
    handler: Arc<dyn ActionHandler>,
    connections: Arc<ConnectionRegistry>,
}

#[async_trait]
impl TrackedHandler for ActionAdapter {
    async fn call(&self, call: HandlerCall) -> HandlerResult {
        let ctx = ActionContext {
            request_id: call.request_id,
            component: call.component,
            action: call.action,
            origin: call.origin,
            connections: self.connections.clone(),
            cancel: call.cancel,
        };
        match self.handler.handle(&ctx, call.payload).await {
            Ok(value) => HandlerResult::from_value(value),
            Err(err) => HandlerResult::from_error(&TrackError::HandlerException {
                message: err.to_string(),
            }),
        }
    }
}

/// Outcome of dispatching one inbound `event`.
#[derive(Clone, Debug)]
pub struct Dispatched {
    /// Request id assigned by the dispatcher.
    pub request_id: String,
    /// Result of the first attempt (or its timeout).
    pub result: HandlerResult,
}

/// Composition root of handler lookup, tracking and error reporting.
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    tracker: Arc<RequestTracker>,
    connections: Arc<ConnectionRegistry>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher over shared registries.
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        tracker: Arc<RequestTracker>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            handlers,
            tracker,
            connections,
            timeout: None,
        }
    }

    /// Use `timeout` for every dispatched event instead of the tracker
    /// default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Handler registry.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Request tracker.
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// Connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Decode and dispatch a text frame. Undecodable frames are answered
    /// with an `error` envelope.
    pub async fn handle_text(&self, origin: &Origin, text: &str) -> Option<Dispatched> {
        match InboundMessage::parse(text) {
            Ok(message) => self.dispatch(origin, message).await,
            Err(e) => {
                warn!(scope = %origin.scope, client_id = %origin.client_id, error = %e, "invalid envelope");
                let _ = self.report_error(
                    origin,
                    ErrorEvent {
                        component: None,
                        action: None,
                        request_id: None,
                        error: e.to_string(),
                        code: Some(INVALID_ENVELOPE.to_owned()),
                    },
                );
                None
            }
        }
    }

    /// Dispatch a decoded message. Returns the tracked outcome for events.
    pub async fn dispatch(&self, origin: &Origin, message: InboundMessage) -> Option<Dispatched> {
        counter!(DISPATCH_TOTAL, "kind" => message.kind()).increment(1);
        match message {
            InboundMessage::Event(event) => Some(self.handle_event(origin, event).await),
            InboundMessage::Ping => {
                self.connections.touch(&origin.scope, &origin.client_id);
                let _ = self.reply(origin, &OutboundEnvelope::pong());
                None
            }
            InboundMessage::GetRegistrations => {
                let _ = self.reply(origin, &self.registrations(&origin.scope));
                None
            }
        }
    }

    /// Track one `event` under a fresh request id.
    ///
    /// A failed outcome is reported to the origin as an `error` envelope;
    /// successful handlers deliver their own payloads.
    pub async fn handle_event(&self, origin: &Origin, event: EventRequest) -> Dispatched {
        let EventRequest {
            component,
            action,
            payload,
            request_id: client_request_id,
        } = event;
        let _ = self.ensure_wrapped(&component, &action);

        let request_id = new_request_id();
        debug!(
            request_id,
            client_request_id = client_request_id.as_deref().unwrap_or_default(),
            component,
            action,
            "dispatching event"
        );

        let (request_id, result) = self
            .tracker
            .track_request(TrackRequest {
                request_id: Some(request_id),
                component: component.clone(),
                action: action.clone(),
                payload,
                origin: Some(origin.clone()),
                timeout: self.timeout,
            })
            .await;

        if !result.is_success() {
            let code = result.code().map(str::to_owned);
            counter!(
                DISPATCH_ERRORS_TOTAL,
                "code" => code.clone().unwrap_or_else(|| "UNKNOWN".to_owned())
            )
            .increment(1);
            let _ = self.report_error(
                origin,
                ErrorEvent {
                    component: Some(component),
                    action: Some(action),
                    request_id: Some(request_id.clone()),
                    error: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_owned()),
                    code,
                },
            );
        }

        Dispatched { request_id, result }
    }

    /// Component listing for `scope`.
    pub fn registrations(&self, scope: &str) -> OutboundEnvelope {
        OutboundEnvelope::registrations(&Registrations {
            scope: scope.to_owned(),
            components: self.handlers.components_for_scope(scope),
        })
    }

    /// Register the tracked wrapper of a raw handler the first time the
    /// pair is dispatched. Returns whether a handler exists.
    fn ensure_wrapped(&self, component: &str, action: &str) -> bool {
        if self.tracker.has_handler(component, action) {
            return true;
        }
        let Some(handler) = self.handlers.get(component, action) else {
            return false;
        };
        self.tracker.register_handler(
            component,
            action,
            Arc::new(ActionAdapter {
                handler,
                connections: self.connections.clone(),
            }),
        );
        debug!(component, action, "wrapped handler for tracking");
        true
    }

    fn report_error(&self, origin: &Origin, event: ErrorEvent) -> SendReport {
        self.reply(origin, &OutboundEnvelope::error(&event))
    }

    fn reply(&self, origin: &Origin, envelope: &OutboundEnvelope) -> SendReport {
        self.connections.send(
            envelope,
            &origin.scope,
            Some(&origin.client_id),
            origin.component_id.as_deref(),
        )
    }
}
