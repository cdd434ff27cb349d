//! Axum upgrade handlers for session and component sockets.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::Response;
use switchboard_core::Origin;
use tracing::debug;

use super::session::{SessionLimits, run_ws_session};
use crate::server::AppState;

/// `GET /ws/{scope}/{client_id}`: the client's session socket.
pub async fn session_socket(
    ws: WebSocketUpgrade,
    Path((scope, client_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, Origin::client(scope, client_id), state)
}

/// `GET /ws/{scope}/{client_id}/{component_id}`: a socket dedicated to one
/// component of the client.
pub async fn component_socket(
    ws: WebSocketUpgrade,
    Path((scope, client_id, component_id)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Response {
    upgrade(
        ws,
        Origin::client(scope, client_id).with_component(component_id),
        state,
    )
}

fn upgrade(ws: WebSocketUpgrade, origin: Origin, state: AppState) -> Response {
    debug!(scope = %origin.scope, client_id = %origin.client_id, component_id = ?origin.component_id, "websocket upgrade");
    let limits = SessionLimits {
        ping_interval: state.config.ping_interval(),
        pong_timeout: state.config.pong_timeout(),
        outbound_buffer: state.config.outbound_buffer,
    };
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, origin, state.dispatcher, limits, shutdown))
}
