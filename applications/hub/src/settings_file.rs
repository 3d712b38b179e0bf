//! TOML-backed settings store
//!
//! Persisted user settings (mixer gains, scheduler and ducking settings) are a
//! flat `key = "value"` table. Writes stay in memory until `flush`, which
//! rewrites the whole file.

use crate::error::{HubError, Result};
use minaret_core::{PlaybackError, SettingsStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug)]
pub struct TomlSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl TomlSettingsStore {
    /// Open the store at `path`; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            parse(&raw).map_err(|e| {
                HubError::Settings(format!("{}: {}", path.display(), e))
            })?
        } else {
            info!(path = %path.display(), "No settings file yet, using defaults");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// File this store writes to
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read a flat table; non-string scalars are kept in their TOML form
fn parse(raw: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    let table: toml::Table = raw.parse().map_err(|e: toml::de::Error| e.to_string())?;
    table
        .into_iter()
        .map(|(key, value)| match value {
            toml::Value::String(s) => Ok((key, s)),
            toml::Value::Integer(_) | toml::Value::Float(_) | toml::Value::Boolean(_) => {
                Ok((key, value.to_string()))
            }
            other => Err(format!("{key}: expected a scalar, found {}", other.type_str())),
        })
        .collect()
}

impl SettingsStore for TomlSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> minaret_core::Result<()> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn flush(&self) -> minaret_core::Result<()> {
        let table: toml::Table = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
            .collect();
        let contents = toml::to_string(&table).map_err(|e| PlaybackError::settings(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PlaybackError::settings(e.to_string()))?;
        }
        std::fs::write(&self.path, contents).map_err(|e| PlaybackError::settings(e.to_string()))?;
        debug!(path = %self.path.display(), "Settings written");
        Ok(())
    }
}
