//! WebSocket session lifecycle: one connected socket from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use switchboard_core::Origin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connections::ClientChannel;
use crate::dispatcher::Dispatcher;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Socket-level settings of a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is considered dead.
    pub pong_timeout: Duration,
    /// Outbound channel capacity.
    pub outbound_buffer: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            outbound_buffer: 1024,
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the socket: a session socket via `connect` (flushing
///    anything queued while the client was away), a component socket via
///    `register_component`
/// 2. Dispatches each inbound text frame in its own task
/// 3. Forwards outbound envelopes and sends periodic Ping frames,
///    dropping clients that stop answering
/// 4. Deregisters on close, unless a newer socket has taken over
#[instrument(skip_all, fields(scope = %origin.scope, client_id = %origin.client_id, component_id = ?origin.component_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    origin: Origin,
    dispatcher: Arc<Dispatcher>,
    limits: SessionLimits,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let connections = dispatcher.connections().clone();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(limits.outbound_buffer.max(1));
    let channel = Arc::new(ClientChannel::new(send_tx));
    let connection_id = channel.id().to_owned();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    match &origin.component_id {
        Some(component_id) => {
            connections.register_component(
                component_id,
                &origin.client_id,
                &origin.scope,
                channel.clone(),
            );
            info!(connection_id, "component socket opened");
        }
        None => {
            let flushed = connections.connect(&origin.scope, &origin.client_id, channel.clone());
            info!(connection_id, flushed, "session socket opened");
        }
    }

    // Outbound forwarder with periodic Ping frames.
    let outbound_conn = channel.clone();
    let outbound_shutdown = shutdown.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(limits.ping_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > limits.pong_timeout
                    {
                        warn!("client unresponsive for {:?}, disconnecting", limits.pong_timeout);
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_shutdown.cancelled() => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: Utf8Bytes::from_static("server shutting down"),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                let text = match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Message::Ping(_) | Message::Pong(_) => {
                        channel.mark_alive();
                        continue;
                    }
                    Message::Close(_) => {
                        debug!("client sent close frame");
                        break;
                    }
                };
                channel.mark_alive();

                let dispatcher = dispatcher.clone();
                let origin = origin.clone();
                let _ = tokio::spawn(async move {
                    let _ = dispatcher.handle_text(&origin, &text).await;
                });
            }
            _ = &mut outbound => break,
        }
    }

    outbound.abort();
    match &origin.component_id {
        Some(component_id) => {
            let _ = connections.release_component(
                component_id,
                &origin.client_id,
                &origin.scope,
                &connection_id,
            );
        }
        None => {
            let _ = connections.disconnect_connection(&origin.scope, &origin.client_id, &connection_id);
        }
    }
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    let lifetime = channel.age();
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(lifetime.as_secs_f64());
    info!(
        connection_id,
        duration_secs = lifetime.as_secs(),
        dropped = channel.drop_count(),
        "socket closed"
    );
}
