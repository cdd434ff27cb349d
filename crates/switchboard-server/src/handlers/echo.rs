//! Built-in `echo` component for smoke tests and client development.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use switchboard_core::ComponentDescriptor;

use super::{ActionContext, ActionHandler, Component};
use crate::errors::HandlerError;

/// Component id of the echo component.
pub const ECHO_COMPONENT: &str = "echo";

/// Longest delay `echo.sleep` accepts.
const MAX_SLEEP: Duration = Duration::from_secs(300);

/// Echoes payloads back as `ui_event`s.
///
/// - `echo`: emits the payload and returns `{"echoed": payload}`
/// - `fail`: fails with `payload.message` (or a fixed text)
/// - `sleep`: waits `payload.ms` milliseconds, honouring cancellation, then emits
pub struct EchoComponent;

impl Component for EchoComponent {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new(ECHO_COMPONENT, "Echo")
            .with_description("Sends every payload back to its sender")
    }

    fn actions(&self) -> Vec<(String, Arc<dyn ActionHandler>)> {
        let echo: Arc<dyn ActionHandler> = Arc::new(Echo);
        let fail: Arc<dyn ActionHandler> = Arc::new(Fail);
        let sleep: Arc<dyn ActionHandler> = Arc::new(Sleep);
        vec![
            ("echo".to_owned(), echo),
            ("fail".to_owned(), fail),
            ("sleep".to_owned(), sleep),
        ]
    }
}

struct Echo;

#[async_trait]
impl ActionHandler for Echo {
    async fn handle(&self, ctx: &ActionContext, payload: Value) -> Result<Value, HandlerError> {
        let _ = ctx.emit(payload.clone());
        Ok(json!({ "echoed": payload }))
    }
}

struct Fail;

#[async_trait]
impl ActionHandler for Fail {
    async fn handle(&self, _ctx: &ActionContext, payload: Value) -> Result<Value, HandlerError> {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("echo failure requested");
        Err(HandlerError::failed(message))
    }
}

struct Sleep;

#[async_trait]
impl ActionHandler for Sleep {
    async fn handle(&self, ctx: &ActionContext, payload: Value) -> Result<Value, HandlerError> {
        let ms = payload
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| HandlerError::invalid("missing numeric 'ms'"))?;
        let delay = Duration::from_millis(ms).min(MAX_SLEEP);

        tokio::select! {
            () = ctx.cancel.cancelled() => Err(HandlerError::Cancelled),
            () = tokio::time::sleep(delay) => {
                let _ = ctx.emit(json!({ "slept_ms": delay.as_millis() as u64 }));
                Ok(json!({ "slept_ms": delay.as_millis() as u64 }))
            }
        }
    }
}
