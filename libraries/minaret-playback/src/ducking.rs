//! Live-broadcast ducking
//!
//! While the PA microphone is live the music channel is attenuated to
//! `duck_level` percent of its configured gain. The attenuation is an overlay
//! on the mixer: stored gains never change, so removing the overlay restores
//! the previous effective volume exactly. Ducking never pauses playback.

use crate::controller::TransportController;
use crate::events::HubEvent;
use minaret_core::settings::{read_or, write};
use minaret_core::{Result, SettingsStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Ducking settings, persisted under `ducking.*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuckingSettings {
    /// A disabled engine still tracks the signal but applies no overlay
    pub enabled: bool,
    /// Music level while ducked, percent of the configured gain
    pub duck_level: u8,
}

impl Default for DuckingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            duck_level: 20,
        }
    }
}

impl DuckingSettings {
    /// Read settings, keeping defaults for missing or malformed keys
    pub fn load(store: &dyn SettingsStore) -> Self {
        let d = Self::default();
        Self {
            enabled: read_or(store, "ducking.enabled", d.enabled),
            duck_level: read_or(store, "ducking.level", d.duck_level).min(100),
        }
    }

    /// Write settings back
    pub fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        write(store, "ducking.enabled", &self.enabled)?;
        write(store, "ducking.level", &self.duck_level)?;
        store.flush()
    }
}

#[derive(Debug, Default)]
struct DuckingState {
    settings: DuckingSettings,
    signal: bool,
    input_level: u8,
}

impl DuckingState {
    fn overlay(&self) -> Option<u8> {
        (self.signal && self.settings.enabled).then_some(self.settings.duck_level)
    }
}

/// Applies the duck overlay in response to the live-broadcast signal
pub struct DuckingEngine {
    controller: Arc<TransportController>,
    store: Option<Arc<dyn SettingsStore>>,
    state: Mutex<DuckingState>,
    /// Held from a state change until its overlay reaches the controller
    apply: tokio::sync::Mutex<()>,
}

impl DuckingEngine {
    /// Create an engine; settings are loaded from `store` when one is given
    pub fn new(
        controller: Arc<TransportController>,
        store: Option<Arc<dyn SettingsStore>>,
    ) -> Self {
        let settings = store
            .as_deref()
            .map_or_else(DuckingSettings::default, DuckingSettings::load);
        Self {
            controller,
            store,
            state: Mutex::new(DuckingState {
                settings,
                ..DuckingState::default()
            }),
            apply: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DuckingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live-broadcast signal changed
    pub async fn set_signal(&self, live: bool) {
        let _apply = self.apply.lock().await;
        let (overlay, input_level) = {
            let mut st = self.lock();
            if st.signal == live {
                return;
            }
            st.signal = live;
            (st.overlay(), st.input_level)
        };

        info!(live, ?overlay, "Live broadcast signal changed");
        self.controller.set_duck(overlay).await;
        self.controller.publish(HubEvent::DuckingChanged {
            active: overlay.is_some(),
            input_level,
        });
    }

    /// Advisory microphone level (0-100), forwarded to observers only
    pub fn set_input_level(&self, level: u8) {
        let (active, input_level) = {
            let mut st = self.lock();
            st.input_level = level.min(100);
            (st.overlay().is_some(), st.input_level)
        };
        self.controller.publish(HubEvent::DuckingChanged {
            active,
            input_level,
        });
    }

    /// Replace and persist settings, re-applying the overlay if ducked
    pub async fn update_settings(&self, settings: DuckingSettings) -> Result<()> {
        let settings = DuckingSettings {
            duck_level: settings.duck_level.min(100),
            ..settings
        };
        let _apply = self.apply.lock().await;
        if let Some(store) = &self.store {
            settings.save(store.as_ref())?;
        }

        let (overlay, input_level) = {
            let mut st = self.lock();
            st.settings = settings;
            (st.overlay(), st.input_level)
        };
        self.controller.set_duck(overlay).await;
        self.controller.publish(HubEvent::DuckingChanged {
            active: overlay.is_some(),
            input_level,
        });
        Ok(())
    }

    /// Current settings
    pub fn settings(&self) -> DuckingSettings {
        self.lock().settings
    }

    /// Whether the music channel is currently ducked
    pub fn is_active(&self) -> bool {
        self.lock().overlay().is_some()
    }

    /// Last reported live signal
    pub fn signal(&self) -> bool {
        self.lock().signal
    }
}

impl std::fmt::Debug for DuckingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckingEngine")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}
