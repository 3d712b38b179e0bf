//! Backend adapters
//!
//! Exactly four adapters exist, one per [`BackendKind`]. Each wraps a
//! provider [`Transport`] behind the same command surface and reports
//! asynchronous happenings (position, end of track, errors, changes made on
//! the provider's own UI) as [`BackendEvent`]s on a shared channel.

mod adapter;
mod debounce;
mod poller;
mod simulated;
mod transport;

pub use adapter::{AdapterOptions, AdapterPhase, BackendAdapter, CommandOutcome};
pub use debounce::VolumeDebouncer;
pub use poller::{Poller, PollerConfig};
pub use simulated::{OpKind, SimulatedTransport, TransportCall, TransportOp};
pub use transport::{Transport, TransportNotifier, TransportStatus};

use minaret_core::{BackendKind, PlaybackError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What happened on a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEventKind {
    /// Position update
    PositionTick {
        /// Position
        position_ms: u64,
        /// Duration (0 when unknown)
        duration_ms: u64,
    },

    /// The loaded track played to its end
    Ended {
        /// Track that ended
        track_id: String,
    },

    /// Asynchronous failure
    Error(PlaybackError),

    /// Playback was paused or resumed outside the hub (provider app, device)
    ExternalStateChange {
        /// New provider-side playing flag
        playing: bool,
    },
}

/// Event reported by one backend adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    /// Reporting backend
    pub source: BackendKind,
    /// What happened
    pub kind: BackendEventKind,
}

/// Provider transports, one per backend
#[derive(Clone)]
pub struct BackendTransports {
    /// Local file player
    pub local: Arc<dyn Transport>,
    /// Spotify
    pub spotify: Arc<dyn Transport>,
    /// YouTube
    pub youtube: Arc<dyn Transport>,
    /// SoundCloud
    pub soundcloud: Arc<dyn Transport>,
}

impl BackendTransports {
    /// Transport for one backend
    pub fn for_kind(&self, kind: BackendKind) -> Arc<dyn Transport> {
        match kind {
            BackendKind::Local => Arc::clone(&self.local),
            BackendKind::Spotify => Arc::clone(&self.spotify),
            BackendKind::YouTube => Arc::clone(&self.youtube),
            BackendKind::SoundCloud => Arc::clone(&self.soundcloud),
        }
    }
}

/// The four adapters
#[derive(Debug, Clone)]
pub struct BackendSet {
    adapters: [Arc<BackendAdapter>; 4],
}

impl BackendSet {
    /// Build all four adapters, returning the shared event stream
    pub fn new(
        transports: &BackendTransports,
        options: &AdapterOptions,
    ) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapters = BackendKind::ALL.map(|kind| {
            BackendAdapter::new(kind, transports.for_kind(kind), options.clone(), tx.clone())
        });
        (Self { adapters }, rx)
    }

    /// Adapter for one backend
    pub fn get(&self, kind: BackendKind) -> &Arc<BackendAdapter> {
        &self.adapters[kind.index()]
    }

    /// All adapters in [`BackendKind::ALL`] order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendAdapter>> {
        self.adapters.iter()
    }

    /// Start status polling for every remote backend
    pub fn spawn_pollers(&self, config: &PollerConfig) -> Vec<Poller> {
        self.iter()
            .filter(|adapter| adapter.kind().is_remote())
            .map(|adapter| Poller::spawn(Arc::clone(adapter), config.clone()))
            .collect()
    }
}
