//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwitchboardSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SWITCHBOARD_*` environment overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BackoffMode, SwitchboardSettings};

/// Default settings location (`~/.switchboard/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwitchboardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    let mut settings = read_file_over_defaults(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_over_defaults(path: &Path) -> Result<SwitchboardSettings> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SWITCHBOARD_*` environment variables.
pub fn apply_env_overrides(settings: &mut SwitchboardSettings) {
    apply_overrides(settings, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    });
}

/// Apply overrides read through `lookup`.
///
/// Invalid or out-of-range values are ignored with a warning.
pub fn apply_overrides(
    settings: &mut SwitchboardSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = Reader { lookup: &lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }

    // ── Tracker ─────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("SWITCHBOARD_REQUEST_TIMEOUT_MS", 1, 86_400_000) {
        settings.tracker.default_timeout_ms = v;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_MAX_ATTEMPTS", 1, 100) {
        settings.tracker.max_attempts = v as u32;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_SWEEP_INTERVAL_MS", 10, 600_000) {
        settings.tracker.sweep_interval_ms = v;
    }
    if let Some(v) = env.bool("SWITCHBOARD_CANCEL_ON_TIMEOUT") {
        settings.tracker.cancel_on_timeout = v;
    }
    if let Some(v) = env.string("SWITCHBOARD_BACKOFF") {
        match v.to_lowercase().as_str() {
            "fixed" => settings.tracker.backoff = BackoffMode::Fixed,
            "exponential" => settings.tracker.backoff = BackoffMode::Exponential,
            _ => warn!(key = "SWITCHBOARD_BACKOFF", value = %v, "invalid backoff mode, ignoring"),
        }
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_REQUEST_RETENTION_SECS", 0, 30 * 86_400) {
        settings.tracker.retention_secs = v;
    }

    // ── Connections ─────────────────────────────────────────────────
    if let Some(v) = env.u64_in("SWITCHBOARD_MAX_QUEUED", 0, 1_000_000) {
        settings.connections.max_queued_per_client = v as usize;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_PRUNE_INTERVAL_SECS", 1, 86_400) {
        settings.connections.prune_interval_secs = v;
    }
    if let Some(v) = env.u64_in("SWITCHBOARD_STALE_AFTER_SECS", 0, 30 * 86_400) {
        settings.connections.stale_after_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Reader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Reader<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_skips_null() {
        let merged = deep_merge(
            serde_json::json!({"a": 1}),
            serde_json::json!({"a": null, "b": 2}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(
            serde_json::json!({"xs": [1, 2, 3]}),
            serde_json::json!({"xs": [9]}),
        );
        assert_eq!(merged["xs"], serde_json::json!([9]));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = read_file_over_defaults(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 8765);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"tracker": {"defaultTimeoutMs": 500}, "connections": {"staleAfterSecs": 60}}"#,
        )
        .unwrap();
        let s = read_file_over_defaults(&path).unwrap();
        assert_eq!(s.tracker.default_timeout_ms, 500);
        assert_eq!(s.tracker.max_attempts, 3);
        assert_eq!(s.connections.stale_after_secs, 60);
        assert_eq!(s.connections.prune_interval_secs, 600);
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn invalid_file_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"tracker": {"maxAttempts": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("SWITCHBOARD_HOST", "0.0.0.0"),
                ("SWITCHBOARD_PORT", "9000"),
                ("SWITCHBOARD_MAX_ATTEMPTS", "5"),
                ("SWITCHBOARD_CANCEL_ON_TIMEOUT", "yes"),
                ("SWITCHBOARD_BACKOFF", "Exponential"),
                ("SWITCHBOARD_STALE_AFTER_SECS", "120"),
                ("SWITCHBOARD_REQUEST_RETENTION_SECS", "300"),
                ("SWITCHBOARD_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.tracker.max_attempts, 5);
        assert!(s.tracker.cancel_on_timeout);
        assert_eq!(s.tracker.backoff, BackoffMode::Exponential);
        assert_eq!(s.connections.stale_after_secs, 120);
        assert_eq!(s.tracker.retention_secs, 300);
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("SWITCHBOARD_PORT", "70000"),
                ("SWITCHBOARD_MAX_ATTEMPTS", "0"),
                ("SWITCHBOARD_CANCEL_ON_TIMEOUT", "maybe"),
                ("SWITCHBOARD_BACKOFF", "linear"),
                ("SWITCHBOARD_HOST", ""),
                ("SWITCHBOARD_REQUEST_RETENTION_SECS", "-5"),
            ]),
        );
        assert_eq!(s.server.port, 8765);
        assert_eq!(s.tracker.max_attempts, 3);
        assert!(!s.tracker.cancel_on_timeout);
        assert_eq!(s.tracker.backoff, BackoffMode::Fixed);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.tracker.retention_secs, 3_600);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_range() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range(" 10 ", 1, 100), Some(10));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("101", 1, 100), None);
        assert_eq!(parse_u64_range("-1", 0, 100), None);
        assert_eq!(parse_u64_range("abc", 0, 100), None);
    }
}
