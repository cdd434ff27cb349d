//! # switchboard-settings
//!
//! Layered configuration for the switchboard server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SwitchboardSettings::default()`]
//! 2. **User file**: `~/.switchboard/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SWITCHBOARD_*` overrides (highest priority)
//!
//! There is no process-wide settings instance; the binary loads settings
//! once and passes the relevant sections to each component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{
    BackoffMode, ConnectionSettings, LoggingSettings, ServerSettings, SwitchboardSettings,
    TrackerSettings,
};
