//! Core types for playback orchestration

use minaret_core::{BackendKind, QueueId, Track};
use serde::{Deserialize, Serialize};

/// A track placed in the queue
///
/// The same track may be enqueued twice; each placement gets its own
/// `queue_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique per enqueue operation
    pub queue_id: QueueId,

    /// The track itself
    pub track: Track,
}

impl QueueEntry {
    /// Wrap a track with a freshly generated queue id
    pub fn new(track: Track) -> Self {
        Self {
            queue_id: QueueId::generate(),
            track,
        }
    }

    /// Wrap a track with a caller-chosen queue id
    pub fn with_id(queue_id: QueueId, track: Track) -> Self {
        Self { queue_id, track }
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop when queue ends
    #[default]
    Off,

    /// Loop entire queue
    All,

    /// Loop current track only
    One,
}

impl RepeatMode {
    /// Next mode in the off → all → one → off cycle
    pub fn cycle(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }
}

/// Transport status of the music channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// Nothing loaded, or the queue ran out
    #[default]
    Idle,

    /// Source switch in progress
    Loading,

    /// Currently playing
    Playing,

    /// Paused mid-track
    Paused,
}

/// Observable playback state
///
/// Only the transport controller mutates this; everyone else receives
/// clones through events and snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Backend currently owning the music channel
    pub active_source: Option<BackendKind>,

    /// Track currently loaded for the music channel
    pub current_track: Option<Track>,

    /// Queue entry of the current track (None for out-of-band plays)
    pub current_queue_id: Option<QueueId>,

    /// Transport status
    pub status: PlaybackStatus,

    /// Mirrors `status == Playing`
    pub is_playing: bool,

    /// Last known position
    pub position_ms: u64,

    /// Duration of the current track (0 when unknown)
    pub duration_ms: u64,

    /// Master mute
    pub is_muted: bool,

    /// Master volume (0-100)
    pub volume: u8,
}

impl PlaybackState {
    /// Create state with an initial master volume
    pub fn with_volume(volume: u8) -> Self {
        Self {
            volume: volume.min(100),
            ..Self::default()
        }
    }

    /// Update status and keep `is_playing` in sync
    pub fn set_status(&mut self, status: PlaybackStatus) {
        self.status = status;
        self.is_playing = status == PlaybackStatus::Playing;
    }

    /// Whether the current track was started outside the queue
    pub fn is_out_of_band(&self) -> bool {
        self.current_track.is_some() && self.current_queue_id.is_none()
    }
}

/// Configuration for the transport controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Maximum history size (default: 50)
    pub history_size: usize,

    /// Initial master volume (0-100, default: 80)
    pub volume: u8,

    /// Initial shuffle flag (default: off)
    pub shuffle: bool,

    /// Initial repeat mode (default: Off)
    pub repeat: RepeatMode,

    /// "Previous" restarts the current track past this position (default: 3000)
    pub restart_threshold_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            volume: 80,
            shuffle: false,
            repeat: RepeatMode::Off,
            restart_threshold_ms: 3000,
        }
    }
}
