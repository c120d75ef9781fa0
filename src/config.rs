//! Queue and sync-monitor configuration.
//!
//! Both structs deserialize with per-field defaults, so hosts can load a
//! partial JSON object and get the documented defaults for the rest.

use serde::{Deserialize, Serialize};

use crate::{op::DEFAULT_MAX_RETRIES, persist::sqlite::DEFAULT_STORAGE_KEY};

/// Queue engine and processor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry ceiling for requests that do not set their own (default: 3).
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Upper bound on stored records; `None` means unbounded (default).
    ///
    /// When full, `add` evicts the oldest completed, then the oldest failed
    /// records. Pending and executing records are never evicted.
    #[serde(default)]
    pub max_records: Option<usize>,
    /// Per-operation executor timeout in milliseconds (default: none).
    #[serde(default)]
    pub execute_timeout_ms: Option<u64>,
    /// Namespaced key used by key-value stores (default: `offline_queue`).
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Capacity of the runtime event broadcast channel (default: 256).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            max_records: None,
            execute_timeout_ms: None,
            storage_key: default_storage_key(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Sync monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Drain automatically on every offline to online transition (default: true).
    #[serde(default = "default_auto_sync")]
    pub auto_sync_on_reconnect: bool,
    /// Periodic drain interval while online, in milliseconds (default: none).
    #[serde(default)]
    pub sync_interval_ms: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_sync_on_reconnect: default_auto_sync(),
            sync_interval_ms: None,
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_auto_sync() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: QueueConfig = serde_json::from_str(r#"{"max_records": 10}"#).unwrap();
        assert_eq!(cfg.max_records, Some(10));
        assert_eq!(cfg.default_max_retries, 3);
        assert_eq!(cfg.storage_key, "offline_queue");
        assert_eq!(cfg.event_capacity, 256);

        let mon: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(mon, MonitorConfig::default());
        assert!(mon.auto_sync_on_reconnect);
    }
}
