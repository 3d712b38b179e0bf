//! Minaret Playback - Orchestration Core
//!
//! Owns the single "now playing" state of the hub while physical playback is
//! delegated to whichever of four backends is active.
//!
//! This crate provides:
//! - Backend adapters (local file, Spotify, YouTube, SoundCloud) with
//!   last-intent-wins command generations, readiness waits, rate-limit
//!   back-off, volume debouncing and polling for remote providers
//! - Queue manager (ordered entries, play-next, history, shuffle, repeat)
//! - Unified transport controller (source switching, arbitration between
//!   user, ducking and scheduler)
//! - Interruption scheduler (fade-out, interrupt audio, post-action)
//! - Ducking engine (live-broadcast attenuation overlay)
//! - Channel mixer (music, interrupt and PA gains)
//!
//! # Architecture
//!
//! `minaret-playback` has no platform dependencies:
//! - Provider SDKs sit behind the [`Transport`] trait
//! - Persistence sits behind [`minaret_core::SettingsStore`]
//! - Wall-clock time comes from [`minaret_core::Clock`]
//!
//! Observers subscribe to [`HubEvent`]s through
//! [`TransportController::subscribe`].
//!
//! # Example: Queue traversal
//!
//! ```rust
//! use minaret_core::{BackendKind, Track};
//! use minaret_playback::{Advance, QueueManager, RepeatMode};
//!
//! let mut queue = QueueManager::new(50);
//! queue.enqueue(Track::local("a", "A", "", "/audio/a.mp3", 1_000));
//! queue.enqueue(Track::remote(BackendKind::Spotify, "b", "B", "", "spotify:track:b", 1_000));
//! queue.set_repeat(RepeatMode::Off);
//!
//! assert_eq!(queue.start().map(|e| e.track.id), Some("a".to_string()));
//! assert!(matches!(queue.advance(), Advance::Play(entry) if entry.track.id == "b"));
//! assert!(matches!(queue.advance(), Advance::Finished));
//! ```
//!
//! # Example: Effective volume
//!
//! ```rust
//! use minaret_playback::{Channel, ChannelGains, Mixer};
//!
//! let mut gains = ChannelGains::default();
//! gains.set(Channel::Music, 50);
//! let mut mixer = Mixer::new(gains);
//!
//! assert_eq!(mixer.effective_volume(80, false, Channel::Music), 40);
//! mixer.set_duck(Some(20));
//! assert_eq!(mixer.effective_volume(80, false, Channel::Music), 8);
//! mixer.set_duck(None);
//! assert_eq!(mixer.effective_volume(80, false, Channel::Music), 40);
//! ```

pub mod arbitration;
pub mod backend;
mod controller;
mod ducking;
pub mod events;
pub mod fade;
mod history;
pub mod mixer;
mod queue;
pub mod scheduler;
mod shuffle;
pub mod types;

// Public exports
pub use arbitration::{Actor, HoldToken, Intent};
pub use backend::{
    AdapterOptions, BackendAdapter, BackendEvent, BackendEventKind, BackendSet, BackendTransports,
    CommandOutcome, Poller, PollerConfig, SimulatedTransport, Transport, TransportStatus,
};
pub use controller::{InterruptOutcome, ResumePoint, TransportController};
pub use ducking::{DuckingEngine, DuckingSettings};
pub use events::{HubEvent, HubSnapshot};
pub use fade::FadeCurve;
pub use history::History;
pub use mixer::{Channel, ChannelGains, Mixer, MixerSnapshot};
pub use queue::{Advance, Previous, QueueManager, QueueSnapshot, Removal};
pub use scheduler::{
    EntryOutcome, EntryPhase, FadeMode, InterruptionScheduler, PayloadLibrary, PostAction,
    PrayerTrigger, ScheduleEntry, SchedulerSettings,
};
pub use types::{PlaybackConfig, PlaybackState, PlaybackStatus, QueueEntry, RepeatMode};
