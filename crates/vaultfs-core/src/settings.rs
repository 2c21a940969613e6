//! Runtime settings service.
//!
//! An explicitly constructed key/value store shared as `Arc<Settings>`.
//! It is loaded once at startup, updated through [`Settings::set`], and
//! announces every change on a watch channel so long-lived components can
//! react without polling.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;

/// Read-mostly settings map with change notification.
#[derive(Debug)]
pub struct Settings {
    values: RwLock<HashMap<String, String>>,
    /// Bumped on every write; carries the key that changed.
    changes: watch::Sender<Option<String>>,
}

impl Settings {
    /// Create a settings service seeded with the given values.
    pub fn new(initial: HashMap<String, String>) -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            values: RwLock::new(initial),
            changes,
        }
    }

    /// Look up a raw setting value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Look up a setting, falling back to `default` when absent.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a boolean setting (`1`/`true`/`yes`/`on`).
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }

    /// Parse an unsigned integer setting.
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Parse a comma-separated list, trimming and lower-casing entries.
    pub fn get_list(&self, key: &str, default: &str) -> Vec<String> {
        self.get_or(key, default)
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Write a setting and publish the change.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        {
            let mut values = self
                .values
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            values.insert(key.clone(), value.into());
        }
        tracing::debug!(key = %key, "Setting updated");
        self.changes.send_replace(Some(key));
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.changes.subscribe()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}
