//! WebSocket gateway: upgrade handlers and per-socket sessions.

pub mod handler;
pub mod session;
