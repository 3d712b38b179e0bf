//! Hub events
//!
//! Observers (UI, logging) subscribe to a broadcast of these. Every state
//! change the transport controller, scheduler or ducking engine makes is
//! published here; nothing else mutates shared playback state.

use crate::mixer::MixerSnapshot;
use crate::queue::QueueSnapshot;
use crate::scheduler::{EntryOutcome, EntryPhase};
use crate::types::PlaybackState;
use minaret_core::{BackendKind, ErrorKind, PlaybackError};
use serde::{Deserialize, Serialize};

/// Events emitted by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// Playback state changed
    PlaybackChanged {
        /// Full playback state after the change
        state: PlaybackState,
    },

    /// Position update from the active backend
    PositionUpdate {
        /// Current playback position
        position_ms: u64,
        /// Total track duration
        duration_ms: u64,
    },

    /// Queue contents, pointer or modes changed
    QueueChanged {
        /// Queue after the change
        queue: QueueSnapshot,
    },

    /// Gains or overlays changed
    MixerChanged {
        /// Mixer after the change
        mixer: MixerSnapshot,
    },

    /// A backend or command failed
    Error {
        /// Backend involved, if any
        source: Option<BackendKind>,
        /// Classification
        kind: ErrorKind,
        /// Human-readable message
        message: String,
    },

    /// Credentials for a remote backend need renewing
    ReconnectRequired {
        /// Backend whose credential failed
        source: BackendKind,
    },

    /// A scheduled interruption changed phase
    InterruptionChanged {
        /// Schedule entry id
        entry_id: String,
        /// Prayer label
        label: String,
        /// New phase
        phase: EntryPhase,
        /// Outcome, once resolved
        outcome: Option<EntryOutcome>,
    },

    /// Ducking signal or input level changed
    DuckingChanged {
        /// Whether the music channel is ducked
        active: bool,
        /// Last reported input level (0-100)
        input_level: u8,
    },
}

impl HubEvent {
    /// Build an error event from a failed command
    pub fn error(source: Option<BackendKind>, err: &PlaybackError) -> Self {
        HubEvent::Error {
            source,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Consistent view of everything the controller owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSnapshot {
    /// Playback state
    pub playback: PlaybackState,
    /// Queue
    pub queue: QueueSnapshot,
    /// Mixer
    pub mixer: MixerSnapshot,
    /// Actor currently holding the playback channel
    pub held_by: Option<crate::arbitration::Actor>,
}
