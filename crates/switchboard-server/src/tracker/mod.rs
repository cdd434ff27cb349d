//! Request/response correlation with per-attempt deadlines and bounded
//! retry.
//!
//! Every call is recorded as a [`PendingRequest`]. Handlers run as spawned
//! tasks under a deadline; a missed deadline reports a timeout to the
//! caller and leaves the request open, and the background sweep
//! ([`sweep`]) retries it until it succeeds, fails, or exhausts its
//! budget.

pub mod config;
pub mod request;
pub mod sweep;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use switchboard_core::types::new_request_id;
use switchboard_core::{HandlerResult, Origin, TrackError};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use config::{Backoff, TimeoutPolicy, TrackerConfig};
pub use request::{PendingRequest, RequestStatus};

use crate::metrics::{
    TRACKER_ATTEMPT_DURATION_SECONDS, TRACKER_EVICTED_TOTAL, TRACKER_OUTCOMES_TOTAL,
    TRACKER_PENDING, TRACKER_REQUESTS_TOTAL, TRACKER_RETRIES_TOTAL, TRACKER_TIMEOUTS_TOTAL,
};

/// Arguments of one handler attempt.
#[derive(Clone, Debug)]
pub struct HandlerCall {
    /// Tracked request id (stable across retries).
    pub request_id: String,
    /// Target component.
    pub component: String,
    /// Invoked action.
    pub action: String,
    /// Payload, identical on every attempt.
    pub payload: Value,
    /// Connection the request came from, if any.
    pub origin: Option<Origin>,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Cancelled when the attempt is abandoned or the tracker shuts down.
    pub cancel: CancellationToken,
}

/// A handler already speaking the `{success, error?, ...}` contract.
#[async_trait]
pub trait TrackedHandler: Send + Sync {
    /// Run one attempt.
    async fn call(&self, call: HandlerCall) -> HandlerResult;
}

/// A closure-backed [`TrackedHandler`].
pub struct FnTracked<F>(F);

/// Wrap an async closure as a [`TrackedHandler`].
pub fn tracked_fn<F, Fut>(f: F) -> FnTracked<F>
where
    F: Fn(HandlerCall) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    FnTracked(f)
}

#[async_trait]
impl<F, Fut> TrackedHandler for FnTracked<F>
where
    F: Fn(HandlerCall) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, call: HandlerCall) -> HandlerResult {
        (self.0)(call).await
    }
}

/// Parameters of [`RequestTracker::track_request`].
#[derive(Clone, Debug, Default)]
pub struct TrackRequest {
    /// Use this id instead of generating one.
    pub request_id: Option<String>,
    /// Target component.
    pub component: String,
    /// Action on the component.
    pub action: String,
    /// Handler payload.
    pub payload: Value,
    /// Connection the request came from.
    pub origin: Option<Origin>,
    /// Per-attempt deadline; the configured default when `None`.
    pub timeout: Option<Duration>,
}

type HandlerKey = (String, String);

/// Correlates requests with handler outcomes.
pub struct RequestTracker {
    config: TrackerConfig,
    handlers: RwLock<HashMap<HandlerKey, Arc<dyn TrackedHandler>>>,
    requests: Mutex<HashMap<String, PendingRequest>>,
    shutdown: CancellationToken,
}

impl RequestTracker {
    /// Create a tracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Register the handler for a `(component, action)` pair, replacing
    /// any previous one.
    pub fn register_handler(&self, component: &str, action: &str, handler: Arc<dyn TrackedHandler>) {
        debug!(component, action, "tracked handler registered");
        let _ = self
            .handlers
            .write()
            .insert((component.to_owned(), action.to_owned()), handler);
    }

    /// Handler registered for a pair.
    pub fn get_handler(&self, component: &str, action: &str) -> Option<Arc<dyn TrackedHandler>> {
        self.handlers
            .read()
            .get(&(component.to_owned(), action.to_owned()))
            .cloned()
    }

    /// Whether a handler is registered for a pair.
    pub fn has_handler(&self, component: &str, action: &str) -> bool {
        self.handlers
            .read()
            .contains_key(&(component.to_owned(), action.to_owned()))
    }

    /// Track a call with a fresh request id.
    ///
    /// Returns the request id and the outcome of the first attempt, or a
    /// timeout result if the deadline passes first. Never fails: missing
    /// handlers, handler errors and panics all come back as
    /// `{success: false, error}`.
    pub async fn track(
        &self,
        component: &str,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> (String, HandlerResult) {
        self.track_request(TrackRequest {
            component: component.to_owned(),
            action: action.to_owned(),
            payload,
            timeout,
            ..TrackRequest::default()
        })
        .await
    }

    /// Track a call described by `request`.
    pub async fn track_request(&self, request: TrackRequest) -> (String, HandlerResult) {
        let request_id = request.request_id.unwrap_or_else(new_request_id);
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let handler = self.get_handler(&request.component, &request.action);
        counter!(TRACKER_REQUESTS_TOTAL).increment(1);

        let mut record = PendingRequest::new(
            request_id.clone(),
            request.component,
            request.action,
            request.payload,
            request.origin,
            timeout,
            self.config.max_attempts,
        );

        let Some(handler) = handler else {
            let err = TrackError::HandlerNotFound {
                component: record.component.clone(),
                action: record.action.clone(),
            };
            warn!(request_id, component = %record.component, action = %record.action, "no handler found");
            let result = HandlerResult::from_error(&err);
            record.settle(RequestStatus::Error, result.clone());
            counter!(TRACKER_OUTCOMES_TOTAL, "status" => "error").increment(1);
            self.insert(record);
            return (request_id, result);
        };

        let call = self.call_for(&record);
        self.insert(record);
        debug!(request_id, component = %call.component, action = %call.action, "tracking request");

        let result = self.run_attempt(handler, call, timeout).await;
        (request_id, result)
    }

    /// Re-run a request with its original payload.
    ///
    /// Terminal requests return their stored result without invoking the
    /// handler. A request whose attempt count has reached the budget is
    /// failed with "Maximum retries reached". Otherwise the attempt count
    /// is incremented, the status becomes `retrying`, and the handler is
    /// invoked again under the same request id.
    pub async fn retry(&self, request_id: &str) -> HandlerResult {
        let (handler, call, timeout) = {
            let mut requests = self.requests.lock();
            let Some(record) = requests.get_mut(request_id) else {
                return HandlerResult::failure(format!("Unknown request '{request_id}'"));
            };
            if record.status.is_terminal() {
                return record
                    .result
                    .clone()
                    .unwrap_or_else(|| HandlerResult::failure("Request already finished"));
            }
            if !record.has_attempts_left() {
                let result = HandlerResult::from_error(&TrackError::MaxRetriesExceeded);
                record.settle(RequestStatus::Error, result.clone());
                counter!(TRACKER_OUTCOMES_TOTAL, "status" => "error").increment(1);
                warn!(
                    request_id,
                    attempts = record.attempt,
                    "maximum retries reached"
                );
                drop(requests);
                self.update_pending_gauge();
                return result;
            }

            let Some(handler) = self.get_handler(&record.component, &record.action) else {
                let err = TrackError::HandlerNotFound {
                    component: record.component.clone(),
                    action: record.action.clone(),
                };
                let result = HandlerResult::from_error(&err);
                record.settle(RequestStatus::Error, result.clone());
                counter!(TRACKER_OUTCOMES_TOTAL, "status" => "error").increment(1);
                drop(requests);
                self.update_pending_gauge();
                return result;
            };

            record.begin_retry();
            counter!(TRACKER_RETRIES_TOTAL).increment(1);
            info!(
                request_id,
                attempt = record.attempt,
                max_attempts = record.max_attempts,
                "retrying request"
            );
            (handler, self.call_for(record), record.timeout)
        };

        self.run_attempt(handler, call, timeout).await
    }

    /// Snapshot of a request.
    pub fn get_request(&self, request_id: &str) -> Option<PendingRequest> {
        self.requests.lock().get(request_id).cloned()
    }

    /// Latest result of a request, if any attempt has produced one.
    pub fn get_result(&self, request_id: &str) -> Option<HandlerResult> {
        self.requests
            .lock()
            .get(request_id)
            .and_then(|r| r.result.clone())
    }

    /// Requests still `pending` or `retrying`, oldest first.
    pub fn list_pending(&self) -> Vec<PendingRequest> {
        self.list_where(|s| !s.is_terminal())
    }

    /// Requests that completed, oldest first.
    pub fn list_completed(&self) -> Vec<PendingRequest> {
        self.list_where(|s| s == RequestStatus::Completed)
    }

    /// Requests that ended in error, oldest first.
    pub fn list_error(&self) -> Vec<PendingRequest> {
        self.list_where(|s| s == RequestStatus::Error)
    }

    /// Number of requests still open.
    pub fn pending_count(&self) -> usize {
        self.requests
            .lock()
            .values()
            .filter(|r| !r.status.is_terminal())
            .count()
    }

    /// Remove completed requests. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        self.clear_where(|s| s == RequestStatus::Completed)
    }

    /// Remove errored requests. Returns how many were removed.
    pub fn clear_error(&self) -> usize {
        self.clear_where(|s| s == RequestStatus::Error)
    }

    /// Remove every request. In-flight attempts finish but their outcomes
    /// are discarded.
    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut requests = self.requests.lock();
            let n = requests.len();
            requests.clear();
            n
        };
        self.update_pending_gauge();
        removed
    }

    /// Remove completed and errored requests that finished at least
    /// `older_than` ago. Open requests are never evicted. Returns how many
    /// were removed.
    pub fn evict_finished(&self, older_than: Duration) -> usize {
        let removed = {
            let mut requests = self.requests.lock();
            let before = requests.len();
            requests.retain(|_, r| r.finished_for().is_none_or(|age| age < older_than));
            before - requests.len()
        };
        if removed > 0 {
            counter!(TRACKER_EVICTED_TOTAL).increment(removed as u64);
            debug!(removed, retention_secs = older_than.as_secs(), "evicted finished requests");
        }
        removed
    }

    /// Cancel every in-flight attempt's token.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Ids of open requests whose current attempt is older than its
    /// deadline plus the configured backoff.
    ///
    /// Each returned request has its attempt clock restarted under the same
    /// lock, so it is not handed out again before its retry begins.
    pub fn claim_due_retries(&self) -> Vec<String> {
        let now = tokio::time::Instant::now();
        self.requests
            .lock()
            .values_mut()
            .filter(|r| {
                !r.status.is_terminal()
                    && r.attempt_age() > r.timeout + self.config.backoff.delay(r.attempt)
            })
            .map(|r| {
                r.attempt_started = now;
                r.request_id.clone()
            })
            .collect()
    }

    fn insert(&self, record: PendingRequest) {
        let _ = self
            .requests
            .lock()
            .insert(record.request_id.clone(), record);
        self.update_pending_gauge();
    }

    fn call_for(&self, record: &PendingRequest) -> HandlerCall {
        HandlerCall {
            request_id: record.request_id.clone(),
            component: record.component.clone(),
            action: record.action.clone(),
            payload: record.payload.clone(),
            origin: record.origin.clone(),
            attempt: record.attempt,
            cancel: self.shutdown.child_token(),
        }
    }

    async fn run_attempt(
        &self,
        handler: Arc<dyn TrackedHandler>,
        call: HandlerCall,
        timeout: Duration,
    ) -> HandlerResult {
        let request_id = call.request_id.clone();
        let component = call.component.clone();
        let attempt = call.attempt;
        let cancel = call.cancel.clone();
        let started = tokio::time::Instant::now();

        let mut task = tokio::spawn(async move { handler.call(call).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => {
                histogram!(TRACKER_ATTEMPT_DURATION_SECONDS, "component" => component)
                    .record(started.elapsed().as_secs_f64());
                let result = match joined {
                    Ok(result) => result,
                    Err(err) => HandlerResult::from_error(&join_failure(err)),
                };
                let status = if result.is_success() {
                    RequestStatus::Completed
                } else {
                    RequestStatus::Error
                };
                if !result.is_success() {
                    warn!(
                        request_id,
                        attempt,
                        error = result.error.as_deref().unwrap_or_default(),
                        "handler failed"
                    );
                }
                self.settle(&request_id, attempt, status, &result);
                result
            }
            Err(_elapsed) => {
                counter!(TRACKER_TIMEOUTS_TOTAL).increment(1);
                if self.config.timeout_policy == TimeoutPolicy::Cancel {
                    cancel.cancel();
                    task.abort();
                }
                let err = TrackError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                };
                warn!(request_id, attempt, timeout_ms = timeout.as_millis() as u64, "request timed out");
                let result = HandlerResult::from_error(&err);
                self.record_timeout(&request_id, attempt, &result);
                result
            }
        }
    }

    // Late outcomes of superseded attempts, and outcomes of cleared
    // requests, are dropped here.
    fn settle(&self, request_id: &str, attempt: u32, status: RequestStatus, result: &HandlerResult) {
        {
            let mut requests = self.requests.lock();
            let Some(record) = requests.get_mut(request_id) else {
                debug!(request_id, "outcome for unknown request discarded");
                return;
            };
            if record.attempt != attempt || record.status.is_terminal() {
                debug!(
                    request_id,
                    attempt,
                    current = record.attempt,
                    "outcome of superseded attempt discarded"
                );
                return;
            }
            record.settle(status, result.clone());
        }
        counter!(TRACKER_OUTCOMES_TOTAL, "status" => status.as_str()).increment(1);
        self.update_pending_gauge();
    }

    fn record_timeout(&self, request_id: &str, attempt: u32, result: &HandlerResult) {
        let mut requests = self.requests.lock();
        if let Some(record) = requests
            .get_mut(request_id)
            .filter(|r| r.attempt == attempt && !r.status.is_terminal())
        {
            record.result = Some(result.clone());
            record.updated_at = chrono::Utc::now();
        }
    }

    fn list_where(&self, keep: impl Fn(RequestStatus) -> bool) -> Vec<PendingRequest> {
        let mut out: Vec<PendingRequest> = self
            .requests
            .lock()
            .values()
            .filter(|r| keep(r.status))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    fn clear_where(&self, remove: impl Fn(RequestStatus) -> bool) -> usize {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, r| !remove(r.status));
        before - requests.len()
    }

    fn update_pending_gauge(&self) {
        gauge!(TRACKER_PENDING).set(self.pending_count() as f64);
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn join_failure(err: JoinError) -> TrackError {
    let message = if err.is_panic() {
        panic_message(err.into_panic().as_ref())
    } else {
        "Handler task was cancelled".to_owned()
    };
    TrackError::HandlerException { message }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Handler panicked: {s}")
    } else {
        "Handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tracker() -> RequestTracker {
        RequestTracker::new(TrackerConfig {
            default_timeout: Duration::from_secs(5),
            ..TrackerConfig::default()
        })
    }

    fn constant(result: HandlerResult) -> Arc<dyn TrackedHandler> {
        Arc::new(tracked_fn(move |_call| {
            let result = result.clone();
            async move { result }
        }))
    }

    fn sleeper(delay: Duration, calls: Arc<AtomicU32>) -> Arc<dyn TrackedHandler> {
        Arc::new(tracked_fn(move |_call| {
            let calls = calls.clone();
            async move {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                HandlerResult::ok()
            }
        }))
    }

    struct Panicker;

    #[async_trait]
    impl TrackedHandler for Panicker {
        async fn call(&self, _call: HandlerCall) -> HandlerResult {
            panic!("kaboom")
        }
    }

    fn with_rows(rows: u64) -> HandlerResult {
        HandlerResult::from_value(json!({"rows": rows}))
    }

    #[tokio::test]
    async fn success_completes_and_stores_result() {
        let t = tracker();
        t.register_handler("db", "query", constant(with_rows(3)));
        let (id, result) = t.track("db", "query", json!({}), None).await;
        assert!(result.is_success());
        assert_eq!(t.get_request(&id).unwrap().status, RequestStatus::Completed);
        assert_eq!(t.get_result(&id), Some(with_rows(3)));
        assert_eq!(t.list_completed().len(), 1);
    }

    #[tokio::test]
    async fn unregistered_handler_is_terminal_error() {
        let t = tracker();
        let (id, result) = t.track("nope", "missing", json!({}), None).await;
        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().starts_with("No handler found"));
        assert_eq!(result.code(), Some("HANDLER_NOT_FOUND"));
        assert_eq!(t.get_request(&id).unwrap().status, RequestStatus::Error);
    }

    #[tokio::test]
    async fn failure_result_is_error_status() {
        let t = tracker();
        t.register_handler("db", "query", constant(HandlerResult::failure("bad sql")));
        let (id, result) = t.track("db", "query", json!({}), None).await;
        assert_eq!(result.error.as_deref(), Some("bad sql"));
        let record = t.get_request(&id).unwrap();
        assert_eq!(record.status, RequestStatus::Error);
        assert_eq!(record.result.unwrap().error.as_deref(), Some("bad sql"));
    }

    #[tokio::test]
    async fn panicking_handler_is_captured() {
        let t = tracker();
        t.register_handler("db", "query", Arc::new(Panicker));
        let (id, result) = t.track("db", "query", json!({}), None).await;
        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("kaboom"));
        assert_eq!(result.code(), Some("HANDLER_EXCEPTION"));
        assert_eq!(t.get_request(&id).unwrap().status, RequestStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_after_deadline() {
        let t = tracker();
        let calls = Arc::new(AtomicU32::new(0));
        t.register_handler("slow", "run", sleeper(Duration::from_secs(1), calls.clone()));

        let start = tokio::time::Instant::now();
        let (id, result) = t
            .track("slow", "run", json!({}), Some(Duration::from_millis(100)))
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(result.error.as_deref(), Some("Request timed out after 0.1s"));
        assert_eq!(result.code(), Some("TIMEOUT"));

        // Still open: the sweep may retry it.
        let record = t.get_request(&id).unwrap();
        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(t.list_pending().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_bounded_by_max_attempts() {
        let t = tracker();
        let calls = Arc::new(AtomicU32::new(0));
        t.register_handler("slow", "run", sleeper(Duration::from_secs(10), calls.clone()));

        let (id, first) = t
            .track("slow", "run", json!({"x": 1}), Some(Duration::from_millis(50)))
            .await;
        assert_eq!(first.code(), Some("TIMEOUT"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for expected_attempt in 1..=3 {
            let result = t.retry(&id).await;
            assert_eq!(result.code(), Some("TIMEOUT"));
            let record = t.get_request(&id).unwrap();
            assert_eq!(record.attempt, expected_attempt);
            assert_eq!(record.status, RequestStatus::Retrying);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let exhausted = t.retry(&id).await;
        assert_eq!(exhausted.error.as_deref(), Some("Maximum retries reached"));
        assert_eq!(exhausted.code(), Some("MAX_RETRIES_EXCEEDED"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(t.get_request(&id).unwrap().status, RequestStatus::Error);
    }

    #[tokio::test]
    async fn retry_reuses_payload_and_request_id() {
        let t = tracker();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        t.register_handler(
            "db",
            "query",
            Arc::new(tracked_fn(move |call: HandlerCall| {
                let seen = seen_in.clone();
                async move {
                    seen.lock().push((call.request_id, call.payload, call.attempt));
                    HandlerResult::ok()
                }
            })),
        );
        // Force a non-terminal record so retry re-invokes.
        let (id, _) = t.track("db", "query", json!({"q": 1}), None).await;
        t.requests.lock().get_mut(&id).unwrap().status = RequestStatus::Pending;
        let _ = t.retry(&id).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, id);
        assert_eq!(seen[1].0, id);
        assert_eq!(seen[1].1, json!({"q": 1}));
        assert_eq!(seen[1].2, 1);
    }

    #[tokio::test]
    async fn retry_of_terminal_request_does_not_invoke() {
        let t = tracker();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        t.register_handler(
            "db",
            "query",
            Arc::new(tracked_fn(move |_call| {
                let counter = counter.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    HandlerResult::ok()
                }
            })),
        );
        let (id, _) = t.track("db", "query", json!({}), None).await;
        let again = t.retry(&id).await;
        assert!(again.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.get_request(&id).unwrap().status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn retry_unknown_request() {
        let t = tracker();
        let result = t.retry("req_missing").await;
        assert!(!result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn late_outcome_of_superseded_attempt_is_discarded() {
        let t = Arc::new(tracker());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        // First attempt is slow and would succeed; later ones fail fast.
        t.register_handler(
            "svc",
            "op",
            Arc::new(tracked_fn(move |call: HandlerCall| {
                let counter = counter.clone();
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    if call.attempt == 0 {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        HandlerResult::ok()
                    } else {
                        HandlerResult::failure("second attempt failed")
                    }
                }
            })),
        );
        let (id, first) = t
            .track("svc", "op", json!({}), Some(Duration::from_millis(100)))
            .await;
        assert_eq!(first.code(), Some("TIMEOUT"));
        let second = t.retry(&id).await;
        assert_eq!(second.error.as_deref(), Some("second attempt failed"));

        // Let the detached first attempt finish.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let record = t.get_request(&id).unwrap();
        assert_eq!(record.status, RequestStatus::Error);
        assert_eq!(record.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_policy_cancels_token() {
        let t = RequestTracker::new(TrackerConfig {
            timeout_policy: TimeoutPolicy::Cancel,
            ..TrackerConfig::default()
        });
        let cancelled = Arc::new(AtomicU32::new(0));
        let flag = cancelled.clone();
        let token_slot: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
        let slot = token_slot.clone();
        t.register_handler(
            "slow",
            "run",
            Arc::new(tracked_fn(move |call: HandlerCall| {
                let slot = slot.clone();
                let flag = flag.clone();
                async move {
                    *slot.lock() = Some(call.cancel.clone());
                    call.cancel.cancelled().await;
                    let _ = flag.fetch_add(1, Ordering::SeqCst);
                    HandlerResult::failure("cancelled")
                }
            })),
        );
        let (_id, result) = t
            .track("slow", "run", json!({}), Some(Duration::from_millis(50)))
            .await;
        assert_eq!(result.code(), Some("TIMEOUT"));
        let token = token_slot.lock().clone().unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn clear_functions_remove_matching_statuses_idempotently() {
        let t = tracker();
        t.register_handler("ok", "a", constant(HandlerResult::ok()));
        t.register_handler("bad", "a", constant(HandlerResult::failure("x")));
        for _ in 0..3 {
            let _ = t.track("ok", "a", json!({}), None).await;
        }
        for _ in 0..2 {
            let _ = t.track("bad", "a", json!({}), None).await;
        }
        let _ = t.track("missing", "a", json!({}), None).await;

        assert_eq!(t.clear_completed(), 3);
        assert_eq!(t.clear_completed(), 0);
        assert!(t.list_completed().is_empty());
        assert_eq!(t.list_error().len(), 3);

        assert_eq!(t.clear_error(), 3);
        assert_eq!(t.clear_error(), 0);

        let _ = t.track("ok", "a", json!({}), None).await;
        assert_eq!(t.clear_all(), 1);
        assert_eq!(t.clear_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_completed_keeps_pending() {
        let t = tracker();
        let calls = Arc::new(AtomicU32::new(0));
        t.register_handler("slow", "run", sleeper(Duration::from_secs(10), calls));
        t.register_handler("ok", "a", constant(HandlerResult::ok()));
        let (pending_id, _) = t
            .track("slow", "run", json!({}), Some(Duration::from_millis(10)))
            .await;
        let _ = t.track("ok", "a", json!({}), None).await;
        assert_eq!(t.clear_completed(), 1);
        assert!(t.get_request(&pending_id).is_some());
        assert_eq!(t.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_finished_respects_age_and_keeps_open_requests() {
        let t = tracker();
        let calls = Arc::new(AtomicU32::new(0));
        t.register_handler("slow", "run", sleeper(Duration::from_secs(600), calls));
        t.register_handler("ok", "a", constant(HandlerResult::ok()));
        let (old_id, _) = t.track("ok", "a", json!({}), None).await;
        let (open_id, _) = t
            .track("slow", "run", json!({}), Some(Duration::from_millis(10)))
            .await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let (new_id, _) = t.track("missing", "a", json!({}), None).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(t.evict_finished(Duration::from_secs(45)), 1);
        assert!(t.get_request(&old_id).is_none());
        assert!(t.get_request(&new_id).is_some());
        assert!(t.get_request(&open_id).is_some());

        assert_eq!(t.evict_finished(Duration::ZERO), 1);
        assert!(t.get_request(&new_id).is_none());
        assert_eq!(t.pending_count(), 1);
        assert_eq!(t.evict_finished(Duration::ZERO), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_retry_is_not_handed_out_twice() {
        let t = tracker();
        let calls = Arc::new(AtomicU32::new(0));
        t.register_handler("slow", "run", sleeper(Duration::from_secs(600), calls));
        let (id, _) = t
            .track("slow", "run", json!({}), Some(Duration::from_millis(10)))
            .await;
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(t.claim_due_retries(), vec![id.clone()]);
        assert!(t.claim_due_retries().is_empty());
        assert_eq!(t.get_request(&id).unwrap().attempt, 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(t.claim_due_retries(), vec![id]);
    }

    #[tokio::test]
    async fn explicit_request_id_and_origin_are_kept() {
        let t = tracker();
        t.register_handler("db", "query", constant(HandlerResult::ok()));
        let (id, _) = t
            .track_request(TrackRequest {
                request_id: Some("req_custom".into()),
                component: "db".into(),
                action: "query".into(),
                payload: json!({}),
                origin: Some(Origin::client("s1", "c1")),
                timeout: None,
            })
            .await;
        assert_eq!(id, "req_custom");
        let record = t.get_request("req_custom").unwrap();
        assert_eq!(record.origin.unwrap().client_id, "c1");
        assert_eq!(record.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn request_ids_are_unique() {
        let t = tracker();
        t.register_handler("db", "query", constant(HandlerResult::ok()));
        let (a, _) = t.track("db", "query", json!({}), None).await;
        let (b, _) = t.track("db", "query", json!({}), None).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn get_handler_returns_registered() {
        let t = tracker();
        assert!(t.get_handler("db", "query").is_none());
        t.register_handler("db", "query", constant(HandlerResult::ok()));
        assert!(t.get_handler("db", "query").is_some());
        assert!(t.has_handler("db", "query"));
    }

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(&"static"), "Handler panicked: static");
        assert_eq!(panic_message(&String::from("owned")), "Handler panicked: owned");
        assert_eq!(panic_message(&5u8), "Handler panicked");
    }
}
