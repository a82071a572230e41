//! Bridge configuration
//!
//! Every field has a default, so a settings file only needs the keys it
//! overrides. Files are merged lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. `~/.acp-bridge/settings.json` (user settings)
//! 3. `<project>/.acp-bridge/settings.json` (project settings)
//!
//! ```json
//! {
//!   "sessions": { "maxSessions": 4, "idleTimeoutSecs": 600 },
//!   "transport": { "batchDelayMs": 20 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{AgentError, Result};

/// Settings directory name, under the home directory and the project root
pub const SETTINGS_DIR: &str = ".acp-bridge";
const SETTINGS_FILE: &str = "settings.json";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub transport: TransportConfig,
    pub sessions: SessionConfig,
    pub permissions: PermissionConfig,
    pub resolver: ResolverConfig,
}

/// Outbound batching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    /// Flush once this many messages are queued
    pub batch_size: usize,
    /// Flush once the oldest queued message is this old
    pub batch_delay_ms: u64,
    /// Capacity of the outbound channel
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 50,
            outbound_queue: 1024,
        }
    }
}

impl TransportConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Session table limits and per-session buffers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
    /// History length that triggers trimming
    pub history_capacity: usize,
    /// History length kept after trimming
    pub history_retain: usize,
    pub update_buffer_capacity: usize,
    /// How long a superseding prompt waits for the previous one to stop
    pub cancel_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            idle_timeout_secs: 30 * 60,
            reap_interval_secs: 60,
            history_capacity: 200,
            history_retain: 100,
            update_buffer_capacity: 256,
            cancel_grace_ms: 5_000,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Permission decision cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionConfig {
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 10 * 60,
            cache_capacity: 1024,
        }
    }
}

impl PermissionConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// File reference resolver caches and search bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    pub content_cache_capacity: usize,
    pub content_cache_ttl_secs: u64,
    pub path_cache_capacity: usize,
    pub path_cache_ttl_secs: u64,
    pub ignore_cache_capacity: usize,
    pub ignore_cache_ttl_secs: u64,
    /// Upper bound on entries visited by one fallback search
    pub max_walk_entries: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            content_cache_capacity: 32,
            content_cache_ttl_secs: 30,
            path_cache_capacity: 512,
            path_cache_ttl_secs: 5 * 60,
            ignore_cache_capacity: 64,
            ignore_cache_ttl_secs: 5 * 60,
            max_walk_entries: 20_000,
        }
    }
}

impl ResolverConfig {
    pub fn content_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.content_cache_ttl_secs)
    }

    pub fn path_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.path_cache_ttl_secs)
    }

    pub fn ignore_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.ignore_cache_ttl_secs)
    }
}

impl BridgeConfig {
    /// Load configuration from user and project settings files
    ///
    /// Missing files are skipped silently, malformed ones with a warning.
    pub fn load(project_dir: Option<&Path>) -> Self {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(SETTINGS_DIR).join(SETTINGS_FILE));
        }
        if let Some(dir) = project_dir {
            paths.push(dir.join(SETTINGS_DIR).join(SETTINGS_FILE));
        }
        Self::load_from_paths(&paths)
    }

    /// Merge the given settings files in order, later files winning
    pub fn load_from_paths(paths: &[PathBuf]) -> Self {
        let mut merged = Value::Object(serde_json::Map::new());

        for path in paths {
            if !path.exists() {
                continue;
            }
            let overlay = match std::fs::read_to_string(path)
                .map_err(AgentError::from)
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(AgentError::from))
            {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read settings file");
                    continue;
                }
            };
            tracing::debug!(path = %path.display(), "Loaded settings file");
            merge_json(&mut merged, overlay);
        }

        match serde_json::from_value::<BridgeConfig>(merged) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid settings, using defaults");
                BridgeConfig::default()
            }
        }
    }

    /// Reject configurations the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        let s = &self.sessions;
        if s.max_sessions == 0 {
            return Err(AgentError::config_error("sessions.maxSessions must be > 0"));
        }
        if s.history_capacity == 0 || s.history_retain > s.history_capacity {
            return Err(AgentError::config_error(
                "sessions.historyRetain must not exceed a non-zero historyCapacity",
            ));
        }
        if s.update_buffer_capacity == 0 {
            return Err(AgentError::config_error(
                "sessions.updateBufferCapacity must be > 0",
            ));
        }
        if self.transport.batch_size == 0 || self.transport.outbound_queue == 0 {
            return Err(AgentError::config_error(
                "transport.batchSize and transport.outboundQueue must be > 0",
            ));
        }
        let r = &self.resolver;
        if r.content_cache_capacity == 0
            || r.path_cache_capacity == 0
            || r.ignore_cache_capacity == 0
        {
            return Err(AgentError::config_error(
                "resolver cache capacities must be > 0",
            ));
        }
        if self.permissions.cache_capacity == 0 {
            return Err(AgentError::config_error(
                "permissions.cacheCapacity must be > 0",
            ));
        }
        Ok(())
    }
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else replaces
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
