/// Hub configuration
use crate::error::{HubError, Result};
use minaret_playback::{AdapterOptions, PlaybackConfig, PollerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "minaret.toml";

/// Environment variable prefix; nested keys use `__` (`MINARET_PLAYBACK__VOLUME`)
pub const ENV_PREFIX: &str = "MINARET";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub backends: BackendSettings,

    #[serde(default)]
    pub scheduler: SchedulerTiming,

    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackSettings {
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_volume")]
    pub volume: u8,

    #[serde(default = "default_restart_threshold_ms")]
    pub restart_threshold_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_jitter_ms")]
    pub poll_jitter_ms: u64,

    #[serde(default = "default_volume_debounce_ms")]
    pub volume_debounce_ms: u64,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerTiming {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathSettings {
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,

    #[serde(default = "default_schedule_file")]
    pub schedule_file: PathBuf,

    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
}

impl HubConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; otherwise `minaret.toml` in the working
    /// directory is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`HubConfig::load`], reading variables from `env` instead of the
    /// process environment when given
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut settings = config::Config::builder();

        settings = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(HubError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                settings.add_source(config::File::from(path))
            }
            None => settings
                .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        settings = settings.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.playback.volume > 100 {
            return Err(HubError::Config(format!(
                "playback.volume must be 0-100, got {}",
                self.playback.volume
            )));
        }

        if self.playback.history_size == 0 {
            return Err(HubError::Config(
                "playback.history_size must be at least 1".to_string(),
            ));
        }

        if !(300..=500).contains(&self.backends.volume_debounce_ms) {
            return Err(HubError::Config(format!(
                "backends.volume_debounce_ms must be 300-500, got {}",
                self.backends.volume_debounce_ms
            )));
        }

        if self.backends.poll_interval_ms == 0 || self.scheduler.tick_ms == 0 {
            return Err(HubError::Config(
                "poll and tick intervals must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Controller configuration
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            history_size: self.playback.history_size,
            volume: self.playback.volume,
            restart_threshold_ms: self.playback.restart_threshold_ms,
            ..PlaybackConfig::default()
        }
    }

    /// Backend adapter options
    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            volume_debounce: Duration::from_millis(self.backends.volume_debounce_ms),
            ready_timeout: Duration::from_millis(self.backends.ready_timeout_ms),
            max_rate_limit_retries: self.backends.rate_limit_retries,
            ..AdapterOptions::default()
        }
    }

    /// Remote backend polling
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.backends.poll_interval_ms),
            jitter: Duration::from_millis(self.backends.poll_jitter_ms),
        }
    }

    /// Scheduler tick
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_ms)
    }
}

// Default values
fn default_history_size() -> usize {
    50
}

fn default_volume() -> u8 {
    80
}

fn default_restart_threshold_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_jitter_ms() -> u64 {
    200
}

fn default_volume_debounce_ms() -> u64 {
    400
}

fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_rate_limit_retries() -> u32 {
    3
}

fn default_tick_ms() -> u64 {
    500
}

fn default_settings_file() -> PathBuf {
    PathBuf::from("./data/settings.toml")
}

fn default_schedule_file() -> PathBuf {
    PathBuf::from("./data/schedule.json")
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("./data/audio")
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            volume: default_volume(),
            restart_threshold_ms: default_restart_threshold_ms(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_jitter_ms: default_poll_jitter_ms(),
            volume_debounce_ms: default_volume_debounce_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
            schedule_file: default_schedule_file(),
            audio_dir: default_audio_dir(),
        }
    }
}
