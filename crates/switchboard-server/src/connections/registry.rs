//! Scope/client/component-keyed connection table with offline queues.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use switchboard_core::OutboundEnvelope;
use tracing::{debug, info, warn};

use super::channel::{ClientChannel, SendError};
use crate::metrics::{
    CONN_ACTIVE, CONN_DELIVERED_TOTAL, CONN_DROPPED_TOTAL, CONN_FLUSHED_TOTAL, CONN_PRUNED_TOTAL,
    CONN_QUEUED_TOTAL, CONN_TRANSPORT_FAILURES_TOTAL,
};

/// Default queue bound per (scope, client).
pub const DEFAULT_MAX_QUEUED: usize = 1_000;

/// An envelope held for a disconnected client.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    /// Scope of the target client.
    pub scope: String,
    /// Target client.
    pub client_id: String,
    /// Serialized envelope.
    pub envelope: Arc<String>,
    /// When the message was queued.
    pub enqueued_at: DateTime<Utc>,
}

/// Per-target delivery counts of one `send` or `broadcast`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Pushed to a live channel.
    pub delivered: usize,
    /// Held for a disconnected client.
    pub queued: usize,
    /// Discarded (no known target, or serialization failed).
    pub dropped: usize,
}

impl SendReport {
    /// Number of targets the message was routed to, in any way.
    pub fn total(&self) -> usize {
        self.delivered + self.queued + self.dropped
    }
}

type SessionKey = (String, String);
type LinkKey = (String, String, String);

struct Session {
    channel: Arc<ClientChannel>,
    active: bool,
    connected_at: Instant,
    last_seen: Instant,
    disconnected_at: Option<Instant>,
    queue: VecDeque<QueuedMessage>,
}

struct ComponentLink {
    channel: Arc<ClientChannel>,
}

#[derive(Default)]
struct State {
    sessions: HashMap<SessionKey, Session>,
    links: HashMap<LinkKey, ComponentLink>,
}

impl State {
    fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.active).count()
    }
}

/// Tracks live duplex connections and buffers what cannot be delivered.
///
/// Sessions are keyed by `(scope, client)`. A client may additionally
/// register per-component channels for targeted delivery. A session that
/// disconnects keeps its component links and queue until it reconnects
/// (queue flushed in order) or is pruned.
///
/// All state sits behind one lock that is never held across an await;
/// channel writes are non-blocking `try_send`s.
pub struct ConnectionRegistry {
    state: Mutex<State>,
    max_queued: usize,
}

impl ConnectionRegistry {
    /// Create a registry bounding each client queue at `max_queued`.
    pub fn new(max_queued: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_queued: max_queued.max(1),
        }
    }

    /// Register `channel` as the active session for `(scope, client_id)`.
    ///
    /// Replaces any previous channel. Messages queued while the client was
    /// away are written to the new channel in enqueue order before this
    /// returns, so they precede anything sent afterwards. Returns the
    /// number of messages flushed.
    pub fn connect(&self, scope: &str, client_id: &str, channel: Arc<ClientChannel>) -> usize {
        let key = (scope.to_owned(), client_id.to_owned());
        let mut state = self.state.lock();
        let now = Instant::now();
        let session = match state.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let session = entry.into_mut();
                session.channel = channel;
                session.active = true;
                session.connected_at = now;
                session.last_seen = now;
                session.disconnected_at = None;
                session
            }
            Entry::Vacant(entry) => entry.insert(Session {
                channel,
                active: true,
                connected_at: now,
                last_seen: now,
                disconnected_at: None,
                queue: VecDeque::new(),
            }),
        };

        let flushed = flush_queue(session, &key);
        let connection_id = session.channel.id().to_owned();
        let remaining = session.queue.len();
        gauge!(CONN_ACTIVE).set(state.active_count() as f64);
        drop(state);

        info!(scope, client_id, connection_id, flushed, remaining, "client connected");
        flushed
    }

    /// Mark `(scope, client_id)` inactive, keeping queue and component links.
    ///
    /// Returns whether an active session was deactivated.
    pub fn disconnect(&self, scope: &str, client_id: &str) -> bool {
        let mut state = self.state.lock();
        let changed = state
            .sessions
            .get_mut(&(scope.to_owned(), client_id.to_owned()))
            .is_some_and(mark_inactive);
        if changed {
            gauge!(CONN_ACTIVE).set(state.active_count() as f64);
            drop(state);
            info!(scope, client_id, "client disconnected");
        }
        changed
    }

    /// Like [`disconnect`](Self::disconnect), but only if the session is
    /// still bound to `connection_id`.
    ///
    /// A socket that was superseded by a reconnect must not deactivate its
    /// replacement when it finally closes.
    pub fn disconnect_connection(&self, scope: &str, client_id: &str, connection_id: &str) -> bool {
        let mut state = self.state.lock();
        let changed = state
            .sessions
            .get_mut(&(scope.to_owned(), client_id.to_owned()))
            .filter(|s| s.channel.id() == connection_id)
            .is_some_and(mark_inactive);
        if changed {
            gauge!(CONN_ACTIVE).set(state.active_count() as f64);
            drop(state);
            info!(scope, client_id, connection_id, "client disconnected");
        } else {
            debug!(scope, client_id, connection_id, "stale connection closed, session untouched");
        }
        changed
    }

    /// Opt `(scope, client_id)` in to targeted delivery for `component_id`.
    pub fn register_component(
        &self,
        component_id: &str,
        client_id: &str,
        scope: &str,
        channel: Arc<ClientChannel>,
    ) {
        let key = (scope.to_owned(), client_id.to_owned(), component_id.to_owned());
        let connection_id = channel.id().to_owned();
        let _ = self.state.lock().links.insert(key, ComponentLink { channel });
        debug!(scope, client_id, component_id, connection_id, "component registered");
    }

    /// Drop the component link. Returns whether one existed.
    pub fn unregister_component(&self, component_id: &str, client_id: &str, scope: &str) -> bool {
        let key = (scope.to_owned(), client_id.to_owned(), component_id.to_owned());
        let removed = self.state.lock().links.remove(&key).is_some();
        if removed {
            debug!(scope, client_id, component_id, "component unregistered");
        }
        removed
    }

    /// Drop the component link only if it still uses `connection_id`.
    pub fn release_component(
        &self,
        component_id: &str,
        client_id: &str,
        scope: &str,
        connection_id: &str,
    ) -> bool {
        let key = (scope.to_owned(), client_id.to_owned(), component_id.to_owned());
        let mut state = self.state.lock();
        if state
            .links
            .get(&key)
            .is_some_and(|l| l.channel.id() == connection_id)
        {
            let _ = state.links.remove(&key);
            drop(state);
            debug!(scope, client_id, component_id, connection_id, "component released");
            true
        } else {
            false
        }
    }

    /// Deliver `event` to the most specific target set that exists:
    ///
    /// 1. `(scope, client, component)` link
    /// 2. `(scope, client)` session
    /// 3. every link for `component` in `scope`
    /// 4. every session of `scope`
    ///
    /// Inactive or failing targets are queued instead of raising. Only a
    /// closed channel marks its session inactive; a full one keeps the
    /// session active and holds the message until the writer catches up.
    /// Sends to a client that never connected are dropped.
    pub fn send(
        &self,
        event: &OutboundEnvelope,
        scope: &str,
        client_id: Option<&str>,
        component_id: Option<&str>,
    ) -> SendReport {
        let Some(json) = serialize(event) else {
            return SendReport {
                dropped: 1,
                ..SendReport::default()
            };
        };
        let mut report = SendReport::default();
        let mut state = self.state.lock();

        match (client_id, component_id) {
            (Some(client), component) => {
                deliver_to_client(
                    &mut state,
                    scope,
                    client,
                    component,
                    &json,
                    self.max_queued,
                    &mut report,
                );
            }
            (None, Some(component)) => {
                let clients: Vec<String> = state
                    .links
                    .keys()
                    .filter(|(s, _, c)| s == scope && c == component)
                    .map(|(_, client, _)| client.clone())
                    .collect();
                if clients.is_empty() {
                    deliver_to_scope(&mut state, scope, &json, self.max_queued, &mut report);
                } else {
                    for client in clients {
                        deliver_to_client(
                            &mut state,
                            scope,
                            &client,
                            Some(component),
                            &json,
                            self.max_queued,
                            &mut report,
                        );
                    }
                }
            }
            (None, None) => {
                deliver_to_scope(&mut state, scope, &json, self.max_queued, &mut report);
            }
        }
        if report.queued > 0 {
            gauge!(CONN_ACTIVE).set(state.active_count() as f64);
        }
        drop(state);

        debug!(
            scope,
            client_id,
            component_id,
            kind = ?event.kind,
            delivered = report.delivered,
            queued = report.queued,
            dropped = report.dropped,
            "send"
        );
        report
    }

    /// Deliver `event` to every active session and component link across
    /// all scopes, once per channel.
    pub fn broadcast(&self, event: &OutboundEnvelope) -> SendReport {
        let Some(json) = serialize(event) else {
            return SendReport {
                dropped: 1,
                ..SendReport::default()
            };
        };
        let mut report = SendReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut state = self.state.lock();

        for (key, session) in &mut state.sessions {
            if !session.active {
                continue;
            }
            let _ = seen.insert(session.channel.id().to_owned());
            if write_live(session, key, &json) {
                report.delivered += 1;
            } else {
                enqueue(session, key, json.clone(), self.max_queued);
                report.queued += 1;
            }
        }

        let mut dead_links = Vec::new();
        for (key, link) in &state.links {
            if !seen.insert(link.channel.id().to_owned()) {
                continue;
            }
            match link.channel.send(json.clone()) {
                Ok(()) => report.delivered += 1,
                Err(SendError::Full { .. }) => {
                    link_backpressured(&key.0, &key.1, &key.2, link.channel.id());
                    report.dropped += 1;
                }
                Err(SendError::Closed(_)) => {
                    transport_failed(&key.0, &key.1, link.channel.id());
                    dead_links.push(key.clone());
                }
            }
        }
        for key in dead_links {
            let _ = state.links.remove(&key);
            report.dropped += 1;
        }
        gauge!(CONN_ACTIVE).set(state.active_count() as f64);
        drop(state);

        debug!(
            kind = ?event.kind,
            delivered = report.delivered,
            queued = report.queued,
            dropped = report.dropped,
            "broadcast"
        );
        report
    }

    /// Remove sessions disconnected for at least `max_age`, together with
    /// their queues. Component links that rode on the pruned socket, or
    /// whose own socket has closed, go with them; links on another live
    /// socket are kept. Returns how many sessions were removed.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let mut state = self.state.lock();
        let stale: Vec<SessionKey> = state
            .sessions
            .iter()
            .filter(|(_, s)| {
                !s.active && s.disconnected_at.is_some_and(|at| at.elapsed() >= max_age)
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut discarded = 0usize;
        for key in &stale {
            let Some(session) = state.sessions.remove(key) else {
                continue;
            };
            discarded += session.queue.len();
            let connection_id = session.channel.id();
            state.links.retain(|(scope, client, _), link| {
                scope != &key.0
                    || client != &key.1
                    || (link.channel.id() != connection_id && !link.channel.is_closed())
            });
        }
        drop(state);

        if !stale.is_empty() {
            counter!(CONN_PRUNED_TOTAL).increment(stale.len() as u64);
            info!(
                pruned = stale.len(),
                discarded_messages = discarded,
                max_age_secs = max_age.as_secs(),
                "pruned stale sessions"
            );
        }
        stale.len()
    }

    /// Refresh the last-seen time of a session.
    ///
    /// Inbound traffic means the writer is draining, so an active session
    /// with a backlog gets another flush attempt.
    pub fn touch(&self, scope: &str, client_id: &str) {
        let key = (scope.to_owned(), client_id.to_owned());
        let mut state = self.state.lock();
        let Some(session) = state.sessions.get_mut(&key) else {
            return;
        };
        session.last_seen = Instant::now();
        if session.active && !session.queue.is_empty() {
            let _ = flush_queue(session, &key);
            if !session.active {
                gauge!(CONN_ACTIVE).set(state.active_count() as f64);
            }
        }
    }

    /// Time since the session was last seen.
    pub fn idle_for(&self, scope: &str, client_id: &str) -> Option<Duration> {
        self.state
            .lock()
            .sessions
            .get(&(scope.to_owned(), client_id.to_owned()))
            .map(|s| s.last_seen.elapsed())
    }

    /// How long the current connection of an active session has lasted.
    pub fn connected_for(&self, scope: &str, client_id: &str) -> Option<Duration> {
        self.state
            .lock()
            .sessions
            .get(&(scope.to_owned(), client_id.to_owned()))
            .filter(|s| s.active)
            .map(|s| s.connected_at.elapsed())
    }

    /// Whether `(scope, client_id)` has an active session.
    pub fn is_active(&self, scope: &str, client_id: &str) -> bool {
        self.state
            .lock()
            .sessions
            .get(&(scope.to_owned(), client_id.to_owned()))
            .is_some_and(|s| s.active)
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        self.state.lock().active_count()
    }

    /// Number of sessions, active or awaiting prune.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Messages queued for `(scope, client_id)`.
    pub fn queued_len(&self, scope: &str, client_id: &str) -> usize {
        self.state
            .lock()
            .sessions
            .get(&(scope.to_owned(), client_id.to_owned()))
            .map_or(0, |s| s.queue.len())
    }

    /// Snapshot of the messages queued for `(scope, client_id)`, oldest first.
    pub fn queued(&self, scope: &str, client_id: &str) -> Vec<QueuedMessage> {
        self.state
            .lock()
            .sessions
            .get(&(scope.to_owned(), client_id.to_owned()))
            .map(|s| s.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Component ids `(scope, client_id)` is registered for, sorted.
    pub fn components_of(&self, scope: &str, client_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .links
            .keys()
            .filter(|(s, c, _)| s == scope && c == client_id)
            .map(|(_, _, component)| component.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUED)
    }
}

fn serialize(event: &OutboundEnvelope) -> Option<Arc<String>> {
    match event.to_json() {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(kind = ?event.kind, error = %e, "failed to serialize envelope");
            counter!(CONN_DROPPED_TOTAL, "reason" => "serialize").increment(1);
            None
        }
    }
}

fn mark_inactive(session: &mut Session) -> bool {
    if !session.active {
        return false;
    }
    session.active = false;
    session.disconnected_at = Some(Instant::now());
    true
}

fn transport_failed(scope: &str, client_id: &str, connection_id: &str) {
    counter!(CONN_TRANSPORT_FAILURES_TOTAL).increment(1);
    warn!(scope, client_id, connection_id, "channel closed, marking inactive");
}

fn link_backpressured(scope: &str, client_id: &str, component_id: &str, connection_id: &str) {
    counter!(CONN_DROPPED_TOTAL, "reason" => "backpressure").increment(1);
    warn!(
        scope,
        client_id,
        component_id,
        connection_id,
        "component channel full, message dropped"
    );
}

fn enqueue(session: &mut Session, key: &SessionKey, envelope: Arc<String>, max_queued: usize) {
    while session.queue.len() >= max_queued {
        let _ = session.queue.pop_front();
        counter!(CONN_DROPPED_TOTAL, "reason" => "queue_full").increment(1);
        warn!(
            scope = %key.0,
            client_id = %key.1,
            max_queued,
            "offline queue full, dropped oldest message"
        );
    }
    session.queue.push_back(QueuedMessage {
        scope: key.0.clone(),
        client_id: key.1.clone(),
        envelope,
        enqueued_at: Utc::now(),
    });
    counter!(CONN_QUEUED_TOTAL).increment(1);
}

// Writes the queue out in order and stops at the first failure, leaving the
// rest queued. A full channel leaves the session active; a closed one marks
// it inactive.
fn flush_queue(session: &mut Session, key: &SessionKey) -> usize {
    let mut flushed = 0;
    while let Some(message) = session.queue.pop_front() {
        match session.channel.send(message.envelope.clone()) {
            Ok(()) => flushed += 1,
            Err(e) => {
                session.queue.push_front(message);
                if e.is_closed() {
                    transport_failed(&key.0, &key.1, session.channel.id());
                    let _ = mark_inactive(session);
                } else {
                    debug!(
                        scope = %key.0,
                        client_id = %key.1,
                        remaining = session.queue.len(),
                        "channel full, flush paused"
                    );
                }
                break;
            }
        }
    }
    if flushed > 0 {
        counter!(CONN_FLUSHED_TOTAL).increment(flushed as u64);
    }
    flushed
}

fn deliver_to_session(
    state: &mut State,
    key: &SessionKey,
    json: &Arc<String>,
    max_queued: usize,
    report: &mut SendReport,
) {
    let Some(session) = state.sessions.get_mut(key) else {
        counter!(CONN_DROPPED_TOTAL, "reason" => "unknown_client").increment(1);
        debug!(scope = %key.0, client_id = %key.1, "no session for client, message dropped");
        report.dropped += 1;
        return;
    };
    if session.active && write_live(session, key, json) {
        counter!(CONN_DELIVERED_TOTAL).increment(1);
        report.delivered += 1;
        return;
    }
    enqueue(session, key, json.clone(), max_queued);
    report.queued += 1;
}

// Pushes to an active session's channel, draining any backlog first so live
// messages never overtake queued ones. Returns false when the message must
// be queued instead.
fn write_live(session: &mut Session, key: &SessionKey, json: &Arc<String>) -> bool {
    if !session.queue.is_empty() {
        let _ = flush_queue(session, key);
    }
    if !session.active || !session.queue.is_empty() {
        return false;
    }
    match session.channel.send(json.clone()) {
        Ok(()) => true,
        Err(SendError::Full { .. }) => {
            debug!(scope = %key.0, client_id = %key.1, "channel full, message queued");
            false
        }
        Err(SendError::Closed(_)) => {
            transport_failed(&key.0, &key.1, session.channel.id());
            let _ = mark_inactive(session);
            false
        }
    }
}

fn deliver_to_client(
    state: &mut State,
    scope: &str,
    client_id: &str,
    component_id: Option<&str>,
    json: &Arc<String>,
    max_queued: usize,
    report: &mut SendReport,
) {
    if let Some(component) = component_id {
        let link_key = (scope.to_owned(), client_id.to_owned(), component.to_owned());
        if let Some(link) = state.links.get(&link_key) {
            match link.channel.send(json.clone()) {
                Ok(()) => {
                    counter!(CONN_DELIVERED_TOTAL).increment(1);
                    report.delivered += 1;
                    return;
                }
                Err(SendError::Full { .. }) => {
                    link_backpressured(scope, client_id, component, link.channel.id());
                    report.dropped += 1;
                    return;
                }
                Err(SendError::Closed(_)) => {
                    transport_failed(scope, client_id, link.channel.id());
                    let _ = state.links.remove(&link_key);
                }
            }
        }
    }
    let key = (scope.to_owned(), client_id.to_owned());
    deliver_to_session(state, &key, json, max_queued, report);
}

fn deliver_to_scope(
    state: &mut State,
    scope: &str,
    json: &Arc<String>,
    max_queued: usize,
    report: &mut SendReport,
) {
    let keys: Vec<SessionKey> = state
        .sessions
        .keys()
        .filter(|(s, _)| s == scope)
        .cloned()
        .collect();
    if keys.is_empty() {
        counter!(CONN_DROPPED_TOTAL, "reason" => "empty_scope").increment(1);
        debug!(scope, "no sessions in scope, message dropped");
        report.dropped += 1;
        return;
    }
    for key in &keys {
        deliver_to_session(state, key, json, max_queued, report);
    }
}
