//! Per-invocation context handed to action handlers.

use std::sync::Arc;

use serde_json::Value;
use switchboard_core::{OutboundEnvelope, Origin, UiEvent};
use tokio_util::sync::CancellationToken;

use crate::connections::{ConnectionRegistry, SendReport};

/// Everything a handler needs besides its payload.
///
/// Handlers report success payloads themselves through [`emit`](Self::emit);
/// the dispatcher only reports failures.
#[derive(Clone)]
pub struct ActionContext {
    /// Tracker-assigned request id.
    pub request_id: String,
    /// Target component.
    pub component: String,
    /// Invoked action.
    pub action: String,
    /// Connection the triggering event arrived on, if any.
    pub origin: Option<Origin>,
    /// Delivery to connected clients.
    pub connections: Arc<ConnectionRegistry>,
    /// Cancelled when the attempt is abandoned or the server shuts down.
    pub cancel: CancellationToken,
}

impl ActionContext {
    /// Send a `ui_event` for this request back to its origin.
    ///
    /// Without an origin nothing is sent and the report is empty.
    pub fn emit(&self, payload: Value) -> SendReport {
        let Some(origin) = &self.origin else {
            return SendReport::default();
        };
        let envelope = self.ui_event(payload);
        self.connections.send(
            &envelope,
            &origin.scope,
            Some(&origin.client_id),
            origin.component_id.as_deref(),
        )
    }

    /// Send a `ui_event` to every client of the origin's scope that
    /// subscribed to this component (or the whole scope if none did).
    pub fn emit_to_scope(&self, payload: Value) -> SendReport {
        let Some(origin) = &self.origin else {
            return SendReport::default();
        };
        let envelope = self.ui_event(payload);
        self.connections
            .send(&envelope, &origin.scope, None, Some(&self.component))
    }

    /// Whether the attempt has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ui_event(&self, payload: Value) -> OutboundEnvelope {
        OutboundEnvelope::ui_event(&UiEvent {
            component: self.component.clone(),
            action: self.action.clone(),
            request_id: Some(self.request_id.clone()),
            payload,
        })
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("request_id", &self.request_id)
            .field("component", &self.component)
            .field("action", &self.action)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ClientChannel;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context(origin: Option<Origin>) -> (ActionContext, mpsc::Receiver<Arc<String>>) {
        let connections = Arc::new(ConnectionRegistry::default());
        let (tx, rx) = mpsc::channel(8);
        let _ = connections.connect("s1", "c1", Arc::new(ClientChannel::with_id("conn_1", tx)));
        let ctx = ActionContext {
            request_id: "req_1".into(),
            component: "chart".into(),
            action: "render".into(),
            origin,
            connections,
            cancel: CancellationToken::new(),
        };
        (ctx, rx)
    }

    #[test]
    fn emit_reaches_origin() {
        let (ctx, mut rx) = context(Some(Origin::client("s1", "c1")));
        let report = ctx.emit(json!({"svg": "<svg/>"}));
        assert_eq!(report.delivered, 1);
        let v: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(v["type"], "ui_event");
        assert_eq!(v["data"]["requestId"], "req_1");
        assert_eq!(v["data"]["component"], "chart");
        assert_eq!(v["data"]["payload"]["svg"], "<svg/>");
    }

    #[test]
    fn emit_without_origin_sends_nothing() {
        let (ctx, mut rx) = context(None);
        assert_eq!(ctx.emit(json!({})).total(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_to_scope_falls_back_to_all_clients() {
        let (ctx, mut rx) = context(Some(Origin::client("s1", "other")));
        let report = ctx.emit_to_scope(json!({"n": 1}));
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn cancellation_visible() {
        let (ctx, _rx) = context(None);
        assert!(!ctx.is_cancelled());
        ctx.cancel.cancel();
        assert!(ctx.is_cancelled());
    }
}
