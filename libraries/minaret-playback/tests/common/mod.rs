//! Common test utilities and fixtures
#![allow(dead_code)]

use minaret_core::{BackendKind, ManualClock, MemorySettingsStore, SettingsStore, Track};
use minaret_playback::{
    AdapterOptions, BackendSet, BackendTransports, InterruptionScheduler, PayloadLibrary,
    PlaybackConfig, SimulatedTransport, TransportController,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Epoch used by the manual clock in scheduler tests (2024-01-01T00:00:00Z)
pub const EPOCH_MS: i64 = 1_704_067_200_000;

/// Controller wired to four simulated providers
pub struct Harness {
    pub controller: Arc<TransportController>,
    pub local: Arc<SimulatedTransport>,
    pub spotify: Arc<SimulatedTransport>,
    pub youtube: Arc<SimulatedTransport>,
    pub soundcloud: Arc<SimulatedTransport>,
    pub store: Arc<MemorySettingsStore>,
    event_loop: JoinHandle<()>,
}

impl Harness {
    /// Must be called inside a tokio runtime
    pub fn new() -> Self {
        Self::with_store(MemorySettingsStore::new())
    }

    pub fn with_store(store: MemorySettingsStore) -> Self {
        Self::build(store, AdapterOptions::default())
    }

    pub fn with_options(options: AdapterOptions) -> Self {
        Self::build(MemorySettingsStore::new(), options)
    }

    fn build(store: MemorySettingsStore, options: AdapterOptions) -> Self {
        let local = SimulatedTransport::new(BackendKind::Local);
        let spotify = SimulatedTransport::new(BackendKind::Spotify);
        let youtube = SimulatedTransport::new(BackendKind::YouTube);
        let soundcloud = SimulatedTransport::new(BackendKind::SoundCloud);

        let transports = BackendTransports {
            local: local.clone(),
            spotify: spotify.clone(),
            youtube: youtube.clone(),
            soundcloud: soundcloud.clone(),
        };
        let (backends, events) = BackendSet::new(&transports, &options);

        let store = Arc::new(store);
        let settings: Arc<dyn SettingsStore> = store.clone();
        let controller = TransportController::new(backends, PlaybackConfig::default(), Some(settings));
        let event_loop = controller.spawn_event_loop(events);

        Self {
            controller,
            local,
            spotify,
            youtube,
            soundcloud,
            store,
            event_loop,
        }
    }

    /// Simulated provider for one backend
    pub fn sim(&self, kind: BackendKind) -> &Arc<SimulatedTransport> {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Spotify => &self.spotify,
            BackendKind::YouTube => &self.youtube,
            BackendKind::SoundCloud => &self.soundcloud,
        }
    }

    /// Providers currently producing audio
    pub fn playing(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.sim(*kind).is_playing())
            .collect()
    }

    /// Scheduler over this controller, driven by a manual clock
    pub fn scheduler(&self, library: PayloadLibrary) -> (Arc<InterruptionScheduler>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(EPOCH_MS));
        let settings: Arc<dyn SettingsStore> = self.store.clone();
        let scheduler = InterruptionScheduler::new(
            Arc::clone(&self.controller),
            clock.clone(),
            library,
            Some(settings),
        );
        (scheduler, clock)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Let spawned tasks (event loop, end timers) run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time, then let tasks react
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

pub fn local_track(id: &str, duration_ms: u64) -> Track {
    Track::local(id, format!("Local {}", id), "Reciter", format!("/audio/{}.mp3", id), duration_ms)
}

pub fn spotify_track(id: &str, duration_ms: u64) -> Track {
    Track::remote(
        BackendKind::Spotify,
        id,
        format!("Spotify {}", id),
        "Artist",
        format!("spotify:track:{}", id),
        duration_ms,
    )
}

pub fn youtube_track(id: &str, duration_ms: u64) -> Track {
    Track::remote(BackendKind::YouTube, id, format!("Video {}", id), "Channel", id, duration_ms)
}

pub fn soundcloud_track(id: &str, duration_ms: u64) -> Track {
    Track::remote(
        BackendKind::SoundCloud,
        id,
        format!("SoundCloud {}", id),
        "Uploader",
        format!("soundcloud:tracks:{}", id),
        duration_ms,
    )
}

/// Library with one local adhan as the default payload
pub fn adhan_library(duration_ms: u64) -> PayloadLibrary {
    PayloadLibrary {
        default: Some(local_track("adhan", duration_ms)),
        ..PayloadLibrary::default()
    }
}
