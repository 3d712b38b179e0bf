//! Native transport port
//!
//! One implementation per provider SDK. Implementations only translate
//! commands; sequencing, retries, debouncing and staleness checks live in
//! [`BackendAdapter`](super::BackendAdapter).

use super::adapter::BackendAdapter;
use async_trait::async_trait;
use minaret_core::{PlaybackError, Result, Track};
use std::sync::Weak;

/// Status as reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStatus {
    /// Whether the provider reports audio playing
    pub is_playing: bool,

    /// Provider position
    pub position_ms: u64,

    /// Provider duration (0 when unknown)
    pub duration_ms: u64,
}

/// Commands a provider SDK must accept
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve and cue a track without starting it
    async fn load(&self, track: &Track) -> Result<()>;

    /// Start or resume the loaded track
    async fn play(&self) -> Result<()>;

    /// Pause the loaded track
    async fn pause(&self) -> Result<()>;

    /// Seek within the loaded track
    async fn seek(&self, position_ms: u64) -> Result<()>;

    /// Set provider volume (0-100)
    async fn set_volume(&self, volume: u8) -> Result<()>;

    /// Query provider status (used for polling remote backends)
    async fn status(&self) -> Result<TransportStatus>;

    /// Hand the transport a sink for push notifications
    ///
    /// Locally rendered players report end-of-track, position and errors
    /// through this. Remote providers can ignore it and rely on polling.
    fn attach(&self, _notifier: TransportNotifier) {}
}

/// Push-notification sink given to a transport
///
/// Holds only a weak reference: a transport outliving its adapter reports
/// into the void.
#[derive(Debug, Clone)]
pub struct TransportNotifier {
    adapter: Weak<BackendAdapter>,
}

impl TransportNotifier {
    pub(super) fn new(adapter: Weak<BackendAdapter>) -> Self {
        Self { adapter }
    }

    /// Position tick for the loaded track
    pub fn position(&self, position_ms: u64) {
        if let Some(adapter) = self.adapter.upgrade() {
            adapter.report_position(position_ms);
        }
    }

    /// The track with `track_id` played to its end
    pub fn ended(&self, track_id: &str) {
        if let Some(adapter) = self.adapter.upgrade() {
            adapter.report_ended(track_id);
        }
    }

    /// Asynchronous player failure
    pub fn error(&self, err: PlaybackError) {
        if let Some(adapter) = self.adapter.upgrade() {
            adapter.report_error(err);
        }
    }
}
