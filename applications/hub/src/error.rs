/// Hub error types
use minaret_core::PlaybackError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings file error: {0}")]
    Settings(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Live input error: {0}")]
    LiveInput(String),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for HubError {
    fn from(err: config::ConfigError) -> Self {
        HubError::Config(err.to_string())
    }
}
