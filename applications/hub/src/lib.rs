//! Minaret Hub Library
//!
//! Configuration, persisted settings, the prayer schedule file and the wiring
//! that turns the playback core into a running hub.
//!
//! This library exposes the core components for testing purposes.

pub mod config;
pub mod error;
pub mod hub;
pub mod live_input;
pub mod schedule;
pub mod settings_file;

// Re-export commonly used types for convenience
pub use config::HubConfig;
pub use error::{HubError, Result};
pub use hub::{Hub, Providers};
pub use live_input::LiveInput;
pub use schedule::{AudioClip, AudioFiles, PrayerTime, ScheduleFile, UpcomingPrayer};
pub use settings_file::TomlSettingsStore;
