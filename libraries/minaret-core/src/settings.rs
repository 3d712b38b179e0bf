//! Persistence port for user settings
//!
//! Mixer gains, scheduler and ducking settings are stored as a flat key/value
//! record owned by an external collaborator. The playback core reads them once
//! at startup and writes changes back through this port; it never touches
//! ambient globals.

use crate::error::{PlaybackError, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Mutex;

/// Flat key/value settings store
pub trait SettingsStore: Send + Sync {
    /// Read a raw value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a raw value
    fn set(&self, key: &str, value: String) -> Result<()>;

    /// Persist pending writes (no-op for stores that write through)
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Read and parse a value, falling back to `default` when missing or malformed
pub fn read_or<T: FromStr>(store: &dyn SettingsStore, key: &str, default: T) -> T {
    store
        .get(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Write a displayable value
pub fn write<T: ToString>(store: &dyn SettingsStore, key: &str, value: &T) -> Result<()> {
    store.set(key, value.to_string())
}

/// In-memory store, used by tests and as the fallback when no file is configured
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with values
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Snapshot of every stored value
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| PlaybackError::settings("settings lock poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }
}
