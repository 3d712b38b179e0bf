/// Core error types for Minaret
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using `PlaybackError`
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Core error type for playback orchestration
///
/// Backend adapters and the transport controller never panic on failure;
/// every operation resolves to one of these variants for the caller to inspect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Device, SDK session or player element is not ready
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The track's native reference could not be resolved
    #[error("Track unplayable: {0}")]
    TrackUnplayable(String),

    /// Remote provider throttled the request
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited {
        /// Provider-supplied back-off hint
        retry_after_ms: Option<u64>,
    },

    /// Remote credential is invalid or expired
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Remote account tier does not allow playback control
    #[error("Premium account required")]
    PremiumRequired,

    /// Command issued before the adapter finished loading
    #[error("Backend not ready: {0}")]
    NotReady(String),

    /// Queue is empty
    #[error("Queue is empty")]
    QueueEmpty,

    /// No track is currently loaded
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Playback channel is held by a higher-priority actor
    #[error("Playback channel held by {0}")]
    ChannelHeld(String),

    /// Persisted settings could not be read or written
    #[error("Settings error: {0}")]
    Settings(String),
}

impl PlaybackError {
    /// Create a backend unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a track unplayable error
    pub fn unplayable(msg: impl Into<String>) -> Self {
        Self::TrackUnplayable(msg.into())
    }

    /// Create a not ready error
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a settings error
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Data-only classification used in events and UI notices
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::TrackUnplayable(_) => ErrorKind::TrackUnplayable,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AuthRequired(_) => ErrorKind::AuthRequired,
            Self::PremiumRequired => ErrorKind::PremiumRequired,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::QueueEmpty
            | Self::NoTrackLoaded
            | Self::InvalidInput(_)
            | Self::ChannelHeld(_)
            | Self::Settings(_) => ErrorKind::Other,
        }
    }
}

/// Error classification surfaced to the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device/session not ready, user may retry
    BackendUnavailable,
    /// Bad track reference
    TrackUnplayable,
    /// Remote throttling
    RateLimited,
    /// Credential invalid or expired
    AuthRequired,
    /// Account tier too low
    PremiumRequired,
    /// Command dropped before load completed
    NotReady,
    /// Everything else
    Other,
}

impl ErrorKind {
    /// Whether the UI should show a persistent reconnect prompt
    /// instead of a transient notice
    pub fn needs_reconnect(self) -> bool {
        matches!(self, Self::AuthRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(
            PlaybackError::unavailable("no device").kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            PlaybackError::RateLimited {
                retry_after_ms: Some(500)
            }
            .kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(PlaybackError::QueueEmpty.kind(), ErrorKind::Other);
    }

    #[test]
    fn only_auth_needs_reconnect() {
        assert!(ErrorKind::AuthRequired.needs_reconnect());
        assert!(!ErrorKind::RateLimited.needs_reconnect());
        assert!(!ErrorKind::BackendUnavailable.needs_reconnect());
    }

    #[test]
    fn display_messages() {
        let err = PlaybackError::unplayable("spotify:track:missing");
        assert_eq!(err.to_string(), "Track unplayable: spotify:track:missing");
    }
}
