//! # switchboard-server
//!
//! Message routing between connected clients and named action handlers.
//!
//! - [`handlers`]: `(component, action)` handler registry and scope listings
//! - [`connections`]: per-client sessions, component links, offline queues
//! - [`tracker`]: request lifecycle with timeout, bounded retry and sweep
//! - [`dispatcher`]: inbound envelope routing and outcome reporting
//! - [`websocket`]: Axum WebSocket upgrade and per-socket sessions
//! - [`server`]: HTTP router, background tasks and graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod connections;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod janitor;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod tracker;
pub mod websocket;

pub use config::ServerConfig;
pub use connections::{ClientChannel, ConnectionRegistry, SendReport};
pub use dispatcher::{Dispatched, Dispatcher};
pub use errors::{HandlerError, ServerError};
pub use handlers::{ActionContext, ActionHandler, Component, HandlerRegistry, handler_fn};
pub use server::{AppState, SwitchboardServer};
pub use shutdown::ShutdownCoordinator;
pub use tracker::{Backoff, RequestStatus, RequestTracker, TimeoutPolicy, TrackerConfig};
