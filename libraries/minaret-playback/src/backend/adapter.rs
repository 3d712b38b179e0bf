//! Uniform command surface over one provider transport
//!
//! Every adapter, whatever the provider, guarantees:
//! - commands issued before a load completes wait for it (bounded by
//!   `ready_timeout`) and fail with `NotReady` rather than being dropped
//!   silently
//! - last intent wins: each command family carries a generation counter, and
//!   a response arriving after a newer command of the same family reports
//!   `Superseded` without touching state
//! - remote providers get debounced volume writes; local players apply
//!   volume immediately
//! - reports about a track that is no longer loaded are discarded

use super::debounce::VolumeDebouncer;
use super::transport::{Transport, TransportNotifier, TransportStatus};
use super::{BackendEvent, BackendEventKind};
use minaret_core::{BackendKind, PlaybackError, Result, Track};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Provider position within this distance of the end counts as "ended"
const END_TOLERANCE_MS: u64 = 1_500;

/// Adapter tuning
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Coalescing window for remote volume writes
    pub volume_debounce: Duration,

    /// How long commands wait for an in-flight load
    pub ready_timeout: Duration,

    /// Back-off when a rate-limited response carries no hint
    pub rate_limit_backoff: Duration,

    /// Retries for rate-limited commands
    pub max_rate_limit_retries: u32,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            volume_debounce: Duration::from_millis(400),
            ready_timeout: Duration::from_secs(5),
            rate_limit_backoff: Duration::from_secs(1),
            max_rate_limit_retries: 3,
        }
    }
}

/// Adapter-local transport phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterPhase {
    /// Nothing loaded
    Idle,
    /// Load in flight
    Loading,
    /// Loaded, not started (or played to the end)
    Ready,
    /// Playing
    Playing,
    /// Paused
    Paused,
}

/// Whether a command took effect or lost to a newer one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command's result was applied
    Applied,
    /// A newer command of the same family was issued meanwhile
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug)]
struct AdapterState {
    phase: AdapterPhase,
    track: Option<Track>,
    position_ms: u64,
    duration_ms: u64,
    desired_volume: Option<u8>,
}

/// One provider behind the uniform command surface
pub struct BackendAdapter {
    kind: BackendKind,
    transport: Arc<dyn Transport>,
    options: AdapterOptions,
    state: Mutex<AdapterState>,

    load_gen: AtomicU64,
    command_gen: AtomicU64,
    seek_gen: AtomicU64,

    readiness: watch::Sender<Readiness>,
    debouncer: Option<VolumeDebouncer>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl BackendAdapter {
    /// Wrap a transport and attach its push notifications
    pub fn new(
        kind: BackendKind,
        transport: Arc<dyn Transport>,
        options: AdapterOptions,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Arc<Self> {
        let (readiness, _) = watch::channel(Readiness::Unloaded);
        let debouncer = kind.is_remote().then(|| {
            VolumeDebouncer::new(
                kind,
                Arc::clone(&transport),
                options.volume_debounce,
                options.max_rate_limit_retries,
            )
        });

        let adapter = Arc::new(Self {
            kind,
            transport,
            options,
            state: Mutex::new(AdapterState {
                phase: AdapterPhase::Idle,
                track: None,
                position_ms: 0,
                duration_ms: 0,
                desired_volume: None,
            }),
            load_gen: AtomicU64::new(0),
            command_gen: AtomicU64::new(0),
            seek_gen: AtomicU64::new(0),
            readiness,
            debouncer,
            events,
        });
        adapter
            .transport
            .attach(TransportNotifier::new(Arc::downgrade(&adapter)));
        adapter
    }

    // ===== Introspection =====

    /// Backend this adapter drives
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Current phase
    pub fn phase(&self) -> AdapterPhase {
        self.lock().phase
    }

    /// Whether the provider is (or is about to be) producing audio
    pub fn is_active(&self) -> bool {
        matches!(self.phase(), AdapterPhase::Playing | AdapterPhase::Loading)
    }

    /// Whether the provider is playing
    pub fn is_playing(&self) -> bool {
        self.phase() == AdapterPhase::Playing
    }

    /// Track currently loaded (or loading)
    pub fn current_track(&self) -> Option<Track> {
        self.lock().track.clone()
    }

    /// Id of the track currently loaded (or loading)
    pub fn current_track_id(&self) -> Option<String> {
        self.lock().track.as_ref().map(|t| t.id.clone())
    }

    /// Last known position
    pub fn position_ms(&self) -> u64 {
        self.lock().position_ms
    }

    // ===== Commands =====

    /// Load a track belonging to this backend
    pub async fn load(&self, track: &Track) -> Result<CommandOutcome> {
        if track.source != self.kind {
            return Err(PlaybackError::invalid_input(format!(
                "{} track sent to {} backend",
                track.source, self.kind
            )));
        }
        if track.native_ref().is_none() {
            return Err(PlaybackError::unplayable(format!(
                "track {} has no {} reference",
                track.id, self.kind
            )));
        }

        let gen = self.load_gen.fetch_add(1, Ordering::SeqCst) + 1;
        self.command_gen.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.lock();
            state.phase = AdapterPhase::Loading;
            state.track = Some(track.clone());
            state.position_ms = 0;
            state.duration_ms = track.duration_ms;
        }
        self.readiness.send_replace(Readiness::Loading);
        debug!(source = %self.kind, track_id = %track.id, "Loading track");

        let result = self
            .with_retry(&self.load_gen, gen, || self.transport.load(track))
            .await;

        if self.load_gen.load(Ordering::SeqCst) != gen {
            debug!(source = %self.kind, track_id = %track.id, "Load superseded");
            return Ok(CommandOutcome::Superseded);
        }

        match result {
            Ok(()) => {
                let desired = {
                    let mut state = self.lock();
                    state.phase = AdapterPhase::Ready;
                    state.desired_volume
                };
                self.readiness.send_replace(Readiness::Ready);
                if let Some(volume) = desired {
                    if let Err(e) = self.send_volume(volume).await {
                        warn!(source = %self.kind, error = %e, "Failed to apply volume after load");
                    }
                }
                info!(source = %self.kind, track_id = %track.id, "Track loaded");
                Ok(CommandOutcome::Applied)
            }
            Err(e) => {
                {
                    let mut state = self.lock();
                    state.phase = AdapterPhase::Idle;
                    state.track = None;
                }
                self.readiness.send_replace(Readiness::Failed);
                warn!(source = %self.kind, track_id = %track.id, error = %e, "Load failed");
                Err(e)
            }
        }
    }

    /// Start or resume the loaded track
    pub async fn play(&self) -> Result<CommandOutcome> {
        self.wait_ready().await?;
        let gen = self.command_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .with_retry(&self.command_gen, gen, || self.transport.play())
            .await;
        if self.command_gen.load(Ordering::SeqCst) != gen {
            return Ok(CommandOutcome::Superseded);
        }
        result?;
        self.lock().phase = AdapterPhase::Playing;
        debug!(source = %self.kind, "Playing");
        Ok(CommandOutcome::Applied)
    }

    /// Pause the loaded track
    ///
    /// Pausing an idle adapter succeeds without touching the provider.
    pub async fn pause(&self) -> Result<CommandOutcome> {
        match self.phase() {
            AdapterPhase::Idle => return Ok(CommandOutcome::Applied),
            AdapterPhase::Loading => self.wait_ready().await?,
            _ => {}
        }
        let gen = self.command_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .with_retry(&self.command_gen, gen, || self.transport.pause())
            .await;
        if self.command_gen.load(Ordering::SeqCst) != gen {
            return Ok(CommandOutcome::Superseded);
        }
        result?;
        {
            let mut state = self.lock();
            if state.phase != AdapterPhase::Idle {
                state.phase = AdapterPhase::Paused;
            }
        }
        debug!(source = %self.kind, "Paused");
        Ok(CommandOutcome::Applied)
    }

    /// Silence this adapter on a source switch
    ///
    /// An in-flight load is abandoned; a playing track is paused.
    pub async fn stop(&self) -> Result<()> {
        match self.phase() {
            AdapterPhase::Loading => {
                self.load_gen.fetch_add(1, Ordering::SeqCst);
                self.command_gen.fetch_add(1, Ordering::SeqCst);
                {
                    let mut state = self.lock();
                    state.phase = AdapterPhase::Idle;
                    state.track = None;
                }
                self.readiness.send_replace(Readiness::Unloaded);
                debug!(source = %self.kind, "Abandoned in-flight load");
                Ok(())
            }
            AdapterPhase::Playing => self.pause().await.map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Seek within the loaded track
    pub async fn seek(&self, position_ms: u64) -> Result<CommandOutcome> {
        self.wait_ready().await?;
        let gen = self.seek_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .with_retry(&self.seek_gen, gen, || self.transport.seek(position_ms))
            .await;
        if self.seek_gen.load(Ordering::SeqCst) != gen {
            return Ok(CommandOutcome::Superseded);
        }
        result?;
        self.lock().position_ms = position_ms;
        Ok(CommandOutcome::Applied)
    }

    /// Set provider volume
    ///
    /// Before anything is loaded the value is only remembered and applied
    /// once the next load completes.
    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        let volume = volume.min(100);
        let loaded = {
            let mut state = self.lock();
            state.desired_volume = Some(volume);
            matches!(
                state.phase,
                AdapterPhase::Ready | AdapterPhase::Playing | AdapterPhase::Paused
            )
        };
        if !loaded {
            return Ok(());
        }
        self.send_volume(volume).await
    }

    /// Remember the volume to apply when the next load completes
    pub fn prime_volume(&self, volume: u8) {
        self.lock().desired_volume = Some(volume.min(100));
    }

    /// Ask the provider for its current position
    pub async fn query_position(&self) -> Option<u64> {
        if self.phase() == AdapterPhase::Idle {
            return None;
        }
        match self.transport.status().await {
            Ok(status) => {
                self.lock().position_ms = status.position_ms;
                Some(status.position_ms)
            }
            Err(e) => {
                debug!(source = %self.kind, error = %e, "Position query failed");
                None
            }
        }
    }

    /// Query the provider once and reconcile local state
    ///
    /// Transient failures are logged and leave state untouched.
    pub async fn poll_once(&self) {
        let loaded = matches!(
            self.phase(),
            AdapterPhase::Ready | AdapterPhase::Playing | AdapterPhase::Paused
        );
        if !loaded {
            return;
        }

        let gen = self.command_gen.load(Ordering::SeqCst);
        match self.transport.status().await {
            Ok(status) => {
                if self.command_gen.load(Ordering::SeqCst) == gen {
                    self.apply_status(&status);
                } else {
                    debug!(source = %self.kind, "Discarding poll raced by a command");
                }
            }
            Err(err @ PlaybackError::AuthRequired(_)) => {
                warn!(source = %self.kind, error = %err, "Status poll rejected credentials");
                self.emit(BackendEventKind::Error(err));
            }
            Err(e) => debug!(source = %self.kind, error = %e, "Status poll failed"),
        }
    }

    // ===== Push reports =====

    /// Position tick from the provider
    pub fn report_position(&self, position_ms: u64) {
        let duration_ms = {
            let mut state = self.lock();
            if !matches!(state.phase, AdapterPhase::Playing | AdapterPhase::Paused) {
                return;
            }
            state.position_ms = position_ms;
            state.duration_ms
        };
        self.emit(BackendEventKind::PositionTick {
            position_ms,
            duration_ms,
        });
    }

    /// The provider finished `track_id`
    pub fn report_ended(&self, track_id: &str) {
        {
            let mut state = self.lock();
            let current = state.track.as_ref().is_some_and(|t| t.id == track_id);
            let started = matches!(
                state.phase,
                AdapterPhase::Playing | AdapterPhase::Paused | AdapterPhase::Ready
            );
            if !(current && started) {
                debug!(source = %self.kind, track_id, "Dropping end report for stale track");
                return;
            }
            state.phase = AdapterPhase::Ready;
            state.position_ms = state.duration_ms;
        }
        info!(source = %self.kind, track_id, "Track ended");
        self.emit(BackendEventKind::Ended {
            track_id: track_id.to_string(),
        });
    }

    /// Asynchronous provider failure
    pub fn report_error(&self, err: PlaybackError) {
        if self.phase() == AdapterPhase::Idle {
            debug!(source = %self.kind, error = %err, "Dropping error report from idle backend");
            return;
        }
        warn!(source = %self.kind, error = %err, "Backend reported error");
        self.emit(BackendEventKind::Error(err));
    }

    // ===== Internals =====

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: BackendEventKind) {
        let event = BackendEvent {
            source: self.kind,
            kind,
        };
        if self.events.send(event).is_err() {
            debug!(source = %self.kind, "No backend event listener");
        }
    }

    async fn send_volume(&self, volume: u8) -> Result<()> {
        match &self.debouncer {
            Some(debouncer) => {
                debouncer.submit(volume);
                Ok(())
            }
            None => self.transport.set_volume(volume).await,
        }
    }

    async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.readiness.subscribe();
        let waited = tokio::time::timeout(self.options.ready_timeout, async {
            rx.wait_for(|r| *r != Readiness::Loading)
                .await
                .map(|r| *r == Readiness::Ready)
        })
        .await;

        match waited {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(PlaybackError::not_ready(format!(
                "{} has no track loaded",
                self.kind
            ))),
            Ok(Err(_)) => Err(PlaybackError::not_ready(format!("{} shut down", self.kind))),
            Err(_) => Err(PlaybackError::not_ready(format!(
                "{} load did not complete within {:?}",
                self.kind, self.options.ready_timeout
            ))),
        }
    }

    async fn with_retry<F, Fut>(&self, counter: &AtomicU64, gen: u64, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(PlaybackError::RateLimited { retry_after_ms })
                    if attempt < self.options.max_rate_limit_retries
                        && counter.load(Ordering::SeqCst) == gen =>
                {
                    attempt += 1;
                    let delay = retry_after_ms.map_or(
                        self.options.rate_limit_backoff * attempt,
                        Duration::from_millis,
                    );
                    warn!(source = %self.kind, attempt, ?delay, "Rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn apply_status(&self, status: &TransportStatus) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let Some(track_id) = state.track.as_ref().map(|t| t.id.clone()) else {
                return;
            };
            if state.phase == AdapterPhase::Loading {
                return;
            }

            let was_playing = state.phase == AdapterPhase::Playing;
            state.position_ms = status.position_ms;
            if status.duration_ms > 0 {
                state.duration_ms = status.duration_ms;
            }
            events.push(BackendEventKind::PositionTick {
                position_ms: status.position_ms,
                duration_ms: state.duration_ms,
            });

            if was_playing && !status.is_playing {
                let near_end = state.duration_ms > 0
                    && status.position_ms + END_TOLERANCE_MS >= state.duration_ms;
                if status.position_ms == 0 || near_end {
                    state.phase = AdapterPhase::Ready;
                    state.position_ms = state.duration_ms;
                    events.push(BackendEventKind::Ended { track_id });
                } else {
                    state.phase = AdapterPhase::Paused;
                    events.push(BackendEventKind::ExternalStateChange { playing: false });
                }
            } else if status.is_playing && state.phase == AdapterPhase::Paused {
                state.phase = AdapterPhase::Playing;
                events.push(BackendEventKind::ExternalStateChange { playing: true });
            }
        }

        for event in events {
            self.emit(event);
        }
    }
}

impl std::fmt::Debug for BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAdapter")
            .field("kind", &self.kind)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
