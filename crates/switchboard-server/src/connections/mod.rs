//! Live connection tracking and delivery.

pub mod channel;
pub mod registry;

pub use channel::{ClientChannel, SendError};
pub use registry::{ConnectionRegistry, QueuedMessage, SendReport};
