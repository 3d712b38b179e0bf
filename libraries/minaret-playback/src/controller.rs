//! Transport controller
//!
//! Single owner of the observable playback state. Every play, pause, seek,
//! next, previous and volume command goes through here, whatever backend is
//! active, and the controller guarantees:
//! - at most one backend produces music at a time (a source switch pauses
//!   the previous backend before the new one starts)
//! - last intent wins: overlapping source switches are tagged with a load
//!   generation and only the newest is allowed to start playback
//! - the queue advances automatically when the active backend reports the
//!   end of the current track
//! - the scheduler can hold the channel; user play/pause issued meanwhile is
//!   deferred and applied when the hold is released
//!
//! State sits behind a `std::sync::Mutex` that is never held across an
//! await point.

use crate::arbitration::{Actor, Arbiter, HoldToken, Intent};
use crate::backend::{
    AdapterPhase, BackendAdapter, BackendEvent, BackendEventKind, BackendSet, CommandOutcome,
};
use crate::events::{HubEvent, HubSnapshot};
use crate::mixer::{Channel, Mixer};
use crate::queue::{Advance, Previous, QueueManager, Removal};
use crate::types::{PlaybackConfig, PlaybackState, PlaybackStatus, RepeatMode};
use minaret_core::{BackendKind, PlaybackError, QueueId, Result, SettingsStore, Track};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Where music was when an interruption took over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Backend that owned the music channel
    pub source: Option<BackendKind>,
    /// Track that was loaded
    pub track: Option<Track>,
    /// Its queue entry (None for out-of-band plays)
    pub queue_id: Option<QueueId>,
    /// Position at suspension
    pub position_ms: u64,
    /// Whether music was playing (or starting)
    pub was_playing: bool,
}

/// How an interruption payload finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Every payload track played to its end
    Completed,
    /// The local backend failed
    Failed(PlaybackError),
    /// Stopped before the end
    Stopped,
}

struct InterruptSession {
    current: Track,
    remaining: VecDeque<Track>,
    done: Option<oneshot::Sender<InterruptOutcome>>,
}

struct ControllerState {
    playback: PlaybackState,
    queue: QueueManager,
    mixer: Mixer,
    arbiter: Arbiter,
    interrupt: Option<InterruptSession>,
}

impl ControllerState {
    /// Channel whose gain applies to `kind` right now
    fn channel_for(&self, kind: BackendKind) -> Channel {
        if self.interrupt.is_some() && kind == BackendKind::Local {
            Channel::Interrupt
        } else {
            Channel::Music
        }
    }

    fn volume_for(&self, channel: Channel) -> u8 {
        self.mixer
            .effective_volume(self.playback.volume, self.playback.is_muted, channel)
    }
}

/// Unified transport over the four backends
pub struct TransportController {
    backends: BackendSet,
    config: PlaybackConfig,
    state: Mutex<ControllerState>,
    load_gen: AtomicU64,
    events: broadcast::Sender<HubEvent>,
    store: Option<Arc<dyn SettingsStore>>,
}

impl TransportController {
    /// Create a controller
    ///
    /// Mixer gains are loaded from `store` when one is given.
    pub fn new(
        backends: BackendSet,
        config: PlaybackConfig,
        store: Option<Arc<dyn SettingsStore>>,
    ) -> Arc<Self> {
        let mut queue = QueueManager::new(config.history_size);
        queue.set_shuffle(config.shuffle);
        queue.set_repeat(config.repeat);

        let mixer = store
            .as_deref()
            .map_or_else(Mixer::default, Mixer::load);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            backends,
            state: Mutex::new(ControllerState {
                playback: PlaybackState::with_volume(config.volume),
                queue,
                mixer,
                arbiter: Arbiter::new(),
                interrupt: None,
            }),
            config,
            load_gen: AtomicU64::new(0),
            events,
            store,
        })
    }

    // ===== Observation =====

    /// Subscribe to hub events
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Publish an event on the hub bus
    pub fn publish(&self, event: HubEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Consistent view of playback, queue and mixer
    pub fn snapshot(&self) -> HubSnapshot {
        let mut st = self.lock();
        HubSnapshot {
            playback: st.playback.clone(),
            queue: st.queue.snapshot(),
            mixer: st.mixer.snapshot(st.playback.volume, st.playback.is_muted),
            held_by: st.arbiter.holder(),
        }
    }

    /// Current playback state
    pub fn playback(&self) -> PlaybackState {
        self.lock().playback.clone()
    }

    /// The four adapters
    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Controller configuration
    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Whether music is audibly playing (or starting)
    pub fn is_music_playing(&self) -> bool {
        matches!(
            self.lock().playback.status,
            PlaybackStatus::Playing | PlaybackStatus::Loading
        )
    }

    // ===== Backend events =====

    /// Drain adapter events until the channel closes
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<BackendEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_backend_event(event).await;
            }
            debug!("Backend event loop finished");
        })
    }

    /// React to one adapter event
    pub async fn handle_backend_event(&self, event: BackendEvent) {
        let source = event.source;
        let (interrupting, active, current_id, status) = {
            let st = self.lock();
            (
                st.interrupt.is_some() && source == BackendKind::Local,
                st.playback.active_source == Some(source),
                st.playback.current_track.as_ref().map(|t| t.id.clone()),
                st.playback.status,
            )
        };

        match event.kind {
            BackendEventKind::PositionTick {
                position_ms,
                duration_ms,
            } => {
                if interrupting || !active {
                    return;
                }
                {
                    let mut st = self.lock();
                    st.playback.position_ms = position_ms;
                    if duration_ms > 0 {
                        st.playback.duration_ms = duration_ms;
                    }
                }
                self.publish(HubEvent::PositionUpdate {
                    position_ms,
                    duration_ms,
                });
            }
            BackendEventKind::Ended { track_id } => {
                if interrupting {
                    self.on_interrupt_track_ended(&track_id).await;
                } else if active
                    && current_id.as_deref() == Some(track_id.as_str())
                    && status == PlaybackStatus::Playing
                {
                    self.on_music_ended().await;
                } else {
                    debug!(source = %source, track_id, "Ignoring end of inactive track");
                }
            }
            BackendEventKind::Error(err) => {
                if interrupting {
                    warn!(error = %err, "Interruption audio failed");
                    self.finish_interrupt(InterruptOutcome::Failed(err));
                } else {
                    self.report_error(Some(source), &err);
                }
            }
            BackendEventKind::ExternalStateChange { playing } => {
                if interrupting || !active {
                    return;
                }
                let mut st = self.lock();
                if st.arbiter.holder().is_some() {
                    return;
                }
                let next = if playing {
                    PlaybackStatus::Playing
                } else {
                    PlaybackStatus::Paused
                };
                if st.playback.status != next {
                    info!(source = %source, playing, "Playback changed outside the hub");
                    st.playback.set_status(next);
                    self.emit_playback(&st);
                }
            }
        }
    }

    // ===== User transport =====

    /// Resume the current track, or start the queue
    pub async fn play(&self) -> Result<()> {
        if self.defer_if_held(Intent::Play) {
            return Ok(());
        }
        self.apply_play().await
    }

    /// Play a track directly, outside the queue
    pub async fn play_track(&self, track: Track) -> Result<()> {
        if self.defer_if_held(Intent::PlayTrack(track.clone())) {
            return Ok(());
        }
        self.start_track(track, None, 0).await.map(|_| ())
    }

    /// Pause (idempotent)
    pub async fn pause(&self) -> Result<()> {
        if self.defer_if_held(Intent::Pause) {
            return Ok(());
        }
        self.apply_pause().await
    }

    /// Skip to the next queue entry
    pub async fn next(&self) -> Result<()> {
        self.ensure_not_held()?;
        self.advance_and_play(true).await
    }

    /// Restart the current track or step back in history
    pub async fn previous(&self) -> Result<()> {
        self.ensure_not_held()?;
        let position = self.current_position().await;
        let previous = {
            let mut st = self.lock();
            let previous = st
                .queue
                .previous(position, self.config.restart_threshold_ms);
            self.emit_queue(&mut st);
            previous
        };

        match previous {
            Previous::Empty => Err(PlaybackError::QueueEmpty),
            Previous::Restart(entry) => {
                let loaded = {
                    let st = self.lock();
                    st.playback.current_queue_id.as_ref() == Some(&entry.queue_id)
                        && matches!(
                            st.playback.status,
                            PlaybackStatus::Playing | PlaybackStatus::Paused
                        )
                };
                let adapter = self.backends.get(entry.track.source);
                if loaded && adapter.current_track_id().as_deref() == Some(entry.track.id.as_str())
                {
                    adapter.seek(0).await?;
                    let mut st = self.lock();
                    st.playback.position_ms = 0;
                    self.emit_playback(&st);
                    Ok(())
                } else {
                    self.start_track(entry.track, Some(entry.queue_id), 0)
                        .await
                        .map(|_| ())
                }
            }
            Previous::Moved(entry) => self
                .start_track(entry.track, Some(entry.queue_id), 0)
                .await
                .map(|_| ()),
        }
    }

    /// Seek within the current track
    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        self.ensure_not_held()?;
        let (kind, duration_ms) = {
            let st = self.lock();
            (st.playback.active_source, st.playback.duration_ms)
        };
        let kind = kind.ok_or(PlaybackError::NoTrackLoaded)?;
        let position_ms = if duration_ms > 0 {
            position_ms.min(duration_ms)
        } else {
            position_ms
        };

        if self.backends.get(kind).seek(position_ms).await? == CommandOutcome::Applied {
            let mut st = self.lock();
            st.playback.position_ms = position_ms;
            self.emit_playback(&st);
        }
        Ok(())
    }

    /// Jump to a queue entry and play it
    pub async fn skip_to(&self, queue_id: &QueueId) -> Result<()> {
        self.ensure_not_held()?;
        let entry = {
            let mut st = self.lock();
            let entry = st.queue.skip_to(queue_id);
            self.emit_queue(&mut st);
            entry
        };
        let entry = entry.ok_or_else(|| {
            PlaybackError::invalid_input(format!("no queue entry {}", queue_id))
        })?;
        self.start_track(entry.track, Some(entry.queue_id), 0)
            .await
            .map(|_| ())
    }

    // ===== Queue =====

    /// Append a track to the queue
    pub fn enqueue(&self, track: Track) -> QueueId {
        let mut st = self.lock();
        let id = st.queue.enqueue(track);
        self.emit_queue(&mut st);
        id
    }

    /// Insert a track to play right after the current one
    pub fn play_next(&self, track: Track) -> QueueId {
        let mut st = self.lock();
        let id = st.queue.play_next(track);
        self.emit_queue(&mut st);
        id
    }

    /// Remove a queue entry
    ///
    /// Removing the playing entry moves playback to its successor.
    pub async fn remove(&self, queue_id: &QueueId) -> Result<()> {
        let (removal, affects_playback, was_running) = {
            let mut st = self.lock();
            let removal = st.queue.remove(queue_id);
            self.emit_queue(&mut st);
            let is_current = st.playback.current_queue_id.as_ref() == Some(queue_id);
            let held = st.arbiter.holder().is_some();
            if is_current && held {
                debug!(%queue_id, "Playing entry removed while channel is held");
                st.arbiter.defer(Intent::Stop);
            }
            let affects = is_current && !held;
            let running = matches!(
                st.playback.status,
                PlaybackStatus::Playing | PlaybackStatus::Loading
            );
            (removal, affects, running)
        };

        match removal {
            Removal::NotFound => Err(PlaybackError::invalid_input(format!(
                "no queue entry {}",
                queue_id
            ))),
            Removal::Upcoming => Ok(()),
            _ if !affects_playback => Ok(()),
            Removal::CurrentReplaced(entry) if was_running => self
                .start_track(entry.track, Some(entry.queue_id), 0)
                .await
                .map(|_| ()),
            Removal::CurrentReplaced(entry) => {
                self.silence_active().await;
                let mut st = self.lock();
                st.playback.active_source = Some(entry.track.source);
                st.playback.duration_ms = entry.track.duration_ms;
                st.playback.current_track = Some(entry.track);
                st.playback.current_queue_id = Some(entry.queue_id);
                st.playback.position_ms = 0;
                st.playback.set_status(PlaybackStatus::Idle);
                self.emit_playback(&st);
                Ok(())
            }
            Removal::CurrentDropped | Removal::Emptied => {
                self.go_idle(true).await;
                Ok(())
            }
        }
    }

    /// Clear the queue (and history) and stop playback
    pub async fn clear(&self) {
        let affects_playback = {
            let mut st = self.lock();
            st.queue.clear();
            self.emit_queue(&mut st);
            if st.arbiter.holder().is_some() {
                debug!("Queue cleared while channel is held");
                st.arbiter.defer(Intent::Stop);
                false
            } else {
                st.playback.current_track.is_some()
            }
        };
        if affects_playback {
            self.go_idle(true).await;
        }
    }

    /// Drop every entry stored after the current one
    pub fn clear_upcoming(&self) {
        let mut st = self.lock();
        st.queue.clear_upcoming();
        self.emit_queue(&mut st);
    }

    /// Toggle shuffle; returns the new flag
    pub fn toggle_shuffle(&self) -> bool {
        let mut st = self.lock();
        let shuffle = st.queue.toggle_shuffle();
        self.emit_queue(&mut st);
        shuffle
    }

    /// Cycle repeat mode; returns the new mode
    pub fn cycle_repeat(&self) -> RepeatMode {
        let mut st = self.lock();
        let repeat = st.queue.cycle_repeat();
        self.emit_queue(&mut st);
        repeat
    }

    // ===== Volume =====

    /// Set master volume (clamped to 100)
    pub async fn set_volume(&self, volume: u8) {
        {
            let mut st = self.lock();
            st.playback.volume = volume.min(100);
            self.emit_playback(&st);
            self.emit_mixer(&st);
        }
        self.reapply_volume().await;
    }

    /// Toggle master mute; returns the new flag
    pub async fn toggle_mute(&self) -> bool {
        let muted = {
            let mut st = self.lock();
            st.playback.is_muted = !st.playback.is_muted;
            self.emit_playback(&st);
            self.emit_mixer(&st);
            st.playback.is_muted
        };
        self.reapply_volume().await;
        muted
    }

    /// Set and persist one channel's gain; returns the clamped value
    pub async fn set_channel_gain(&self, channel: Channel, gain: u8) -> Result<u8> {
        let (applied, gains) = {
            let mut st = self.lock();
            let applied = st.mixer.set_gain(channel, gain);
            self.emit_mixer(&st);
            (applied, st.mixer.gains())
        };
        self.reapply_volume().await;

        if let Some(store) = &self.store {
            gains.save(store.as_ref())?;
        }
        Ok(applied)
    }

    /// Apply or remove the ducking overlay on the music channel
    pub async fn set_duck(&self, level: Option<u8>) {
        {
            let mut st = self.lock();
            if st.mixer.duck_level() == level {
                return;
            }
            st.mixer.set_duck(level);
            self.emit_mixer(&st);
        }
        self.reapply_volume().await;
    }

    // ===== Scheduler hold =====

    /// Take the playback channel
    pub fn acquire_hold(&self, actor: Actor) -> Option<HoldToken> {
        let token = self.lock().arbiter.acquire(actor);
        if token.is_some() {
            info!(%actor, "Playback channel held");
        }
        token
    }

    /// Give the channel back and apply the user intent deferred meanwhile
    pub async fn release_hold(&self, token: HoldToken) -> Result<()> {
        let actor = token.actor();
        let pending = {
            let mut st = self.lock();
            if !st.arbiter.holds(&token) {
                return Ok(());
            }
            st.mixer.set_fade_level(100);
            self.emit_mixer(&st);
            st.arbiter.release(token)
        };
        info!(%actor, ?pending, "Playback channel released");
        self.reapply_volume().await;

        match pending {
            Some(Intent::Play) => self.apply_play().await,
            Some(Intent::PlayTrack(track)) => self.start_track(track, None, 0).await.map(|_| ()),
            Some(Intent::Pause) => self.apply_pause().await,
            Some(Intent::Stop) => {
                self.go_idle(true).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Set the music fade overlay
    pub async fn set_fade_level(&self, token: &HoldToken, level: u8) {
        {
            let mut st = self.lock();
            if !st.arbiter.holds(token) {
                return;
            }
            st.mixer.set_fade_level(level);
            self.emit_mixer(&st);
        }
        self.reapply_volume().await;
    }

    /// Pause whatever is producing music and record where it was
    ///
    /// Also abandons an in-flight source switch.
    pub async fn suspend_for_interrupt(&self, token: &HoldToken) -> ResumePoint {
        self.load_gen.fetch_add(1, Ordering::SeqCst);

        let (source, track, queue_id, status, mut position_ms) = {
            let st = self.lock();
            if !st.arbiter.holds(token) {
                warn!("Suspend requested without holding the channel");
            }
            (
                st.playback.active_source,
                st.playback.current_track.clone(),
                st.playback.current_queue_id.clone(),
                st.playback.status,
                st.playback.position_ms,
            )
        };
        let was_playing = matches!(status, PlaybackStatus::Playing | PlaybackStatus::Loading);

        if let Some(kind) = source {
            if status == PlaybackStatus::Playing {
                if let Some(position) = self.backends.get(kind).query_position().await {
                    position_ms = position;
                }
            }
        }
        self.silence_active().await;

        {
            let mut st = self.lock();
            if was_playing {
                st.playback.set_status(PlaybackStatus::Paused);
            }
            st.playback.position_ms = position_ms;
            self.emit_playback(&st);
        }

        info!(?source, position_ms, was_playing, "Music suspended for interruption");
        ResumePoint {
            source,
            track,
            queue_id,
            position_ms,
            was_playing,
        }
    }

    /// Play interruption audio on the local backend
    ///
    /// The receiver resolves when every track played to its end, the local
    /// backend failed, or [`stop_interrupt`](Self::stop_interrupt) was called.
    pub async fn play_interrupt(
        &self,
        token: &HoldToken,
        tracks: Vec<Track>,
    ) -> Result<oneshot::Receiver<InterruptOutcome>> {
        let mut tracks: VecDeque<Track> = tracks.into();
        if let Some(track) = tracks.iter().find(|t| t.source != BackendKind::Local) {
            return Err(PlaybackError::invalid_input(format!(
                "interruption audio must be local, got {} track {}",
                track.source, track.id
            )));
        }
        let first = tracks
            .pop_front()
            .ok_or_else(|| PlaybackError::invalid_input("empty interruption payload"))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.lock();
            if !st.arbiter.holds(token) {
                return Err(PlaybackError::ChannelHeld(
                    st.arbiter
                        .holder()
                        .map_or_else(|| "nobody".to_string(), |a| a.to_string()),
                ));
            }
            st.interrupt = Some(InterruptSession {
                current: first.clone(),
                remaining: tracks,
                done: Some(tx),
            });
        }

        if let Err(e) = self.start_interrupt_track(&first).await {
            self.lock().interrupt = None;
            return Err(e);
        }
        Ok(rx)
    }

    /// Cut interruption audio short
    pub async fn stop_interrupt(&self, token: &HoldToken) {
        let active = {
            let st = self.lock();
            st.arbiter.holds(token) && st.interrupt.is_some()
        };
        if !active {
            return;
        }
        if let Err(e) = self.backends.get(BackendKind::Local).stop().await {
            warn!(error = %e, "Failed to stop interruption audio");
        }
        self.finish_interrupt(InterruptOutcome::Stopped);
    }

    /// Put music back where [`suspend_for_interrupt`](Self::suspend_for_interrupt) found it
    ///
    /// Skipped when the user asked for a pause or a different track while
    /// the channel was held, or when the queue entry it points at is gone.
    pub async fn resume_from(&self, token: &HoldToken, point: &ResumePoint) -> Result<()> {
        let overridden = {
            let st = self.lock();
            if !st.arbiter.holds(token) {
                return Ok(());
            }
            let entry_gone = point
                .queue_id
                .as_ref()
                .is_some_and(|id| st.queue.index_of(id).is_none());
            entry_gone
                || matches!(
                    st.arbiter.pending(),
                    Some(Intent::Pause | Intent::PlayTrack(_) | Intent::Stop)
                )
        };
        if overridden {
            debug!("Deferred user intent replaces resume");
            return Ok(());
        }
        if !point.was_playing {
            return Ok(());
        }
        let Some(track) = point.track.clone() else {
            return Ok(());
        };

        let adapter = Arc::clone(self.backends.get(track.source));
        if adapter.current_track_id().as_deref() == Some(track.id.as_str())
            && adapter.phase() == AdapterPhase::Paused
        {
            let volume = self.lock().volume_for(Channel::Music);
            if let Err(e) = adapter.set_volume(volume).await {
                warn!(error = %e, "Failed to set volume before resume");
            }
            if adapter.play().await? == CommandOutcome::Applied {
                let mut st = self.lock();
                st.playback.set_status(PlaybackStatus::Playing);
                self.emit_playback(&st);
            }
            info!(source = %track.source, track_id = %track.id, "Music resumed");
            Ok(())
        } else {
            info!(source = %track.source, track_id = %track.id, position_ms = point.position_ms, "Reloading music after interruption");
            self.start_track(track, point.queue_id.clone(), point.position_ms)
                .await
                .map(|_| ())
        }
    }

    /// Play a track out of band while holding the channel
    pub async fn play_alternate(&self, token: &HoldToken, track: Track) -> Result<()> {
        if !self.lock().arbiter.holds(token) {
            return Ok(());
        }
        self.start_track(track, None, 0).await.map(|_| ())
    }

    // ===== Internals =====

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_playback(&self, st: &ControllerState) {
        self.publish(HubEvent::PlaybackChanged {
            state: st.playback.clone(),
        });
    }

    fn emit_queue(&self, st: &mut ControllerState) {
        let queue = st.queue.snapshot();
        self.publish(HubEvent::QueueChanged { queue });
    }

    fn emit_mixer(&self, st: &ControllerState) {
        self.publish(HubEvent::MixerChanged {
            mixer: st.mixer.snapshot(st.playback.volume, st.playback.is_muted),
        });
    }

    fn report_error(&self, source: Option<BackendKind>, err: &PlaybackError) {
        warn!(?source, error = %err, "Playback error");
        self.publish(HubEvent::error(source, err));
        if let (Some(source), true) = (source, err.kind().needs_reconnect()) {
            self.publish(HubEvent::ReconnectRequired { source });
        }
    }

    fn ensure_not_held(&self) -> Result<()> {
        let st = self.lock();
        if st.arbiter.blocks(Actor::User) {
            let holder = st
                .arbiter
                .holder()
                .map_or_else(String::new, |a| a.to_string());
            return Err(PlaybackError::ChannelHeld(holder));
        }
        Ok(())
    }

    /// Returns true when the intent was deferred
    fn defer_if_held(&self, intent: Intent) -> bool {
        let mut st = self.lock();
        if st.arbiter.blocks(Actor::User) {
            debug!(?intent, "Deferring user intent while channel is held");
            st.arbiter.defer(intent);
            true
        } else {
            false
        }
    }

    fn is_current_load(&self, gen: u64) -> bool {
        self.load_gen.load(Ordering::SeqCst) == gen
    }

    async fn current_position(&self) -> u64 {
        let (source, position) = {
            let st = self.lock();
            (st.playback.active_source, st.playback.position_ms)
        };
        match source {
            Some(kind) => self
                .backends
                .get(kind)
                .query_position()
                .await
                .unwrap_or(position),
            None => position,
        }
    }

    /// Push effective volumes to the adapters that matter right now
    async fn reapply_volume(&self) {
        let targets: Vec<(Arc<BackendAdapter>, u8)> = {
            let st = self.lock();
            self.backends
                .iter()
                .filter(|adapter| {
                    let kind = adapter.kind();
                    st.playback.active_source == Some(kind)
                        || (st.interrupt.is_some() && kind == BackendKind::Local)
                })
                .map(|adapter| {
                    let volume = st.volume_for(st.channel_for(adapter.kind()));
                    (Arc::clone(adapter), volume)
                })
                .collect()
        };

        for (adapter, volume) in targets {
            if let Err(e) = adapter.set_volume(volume).await {
                warn!(source = %adapter.kind(), volume, error = %e, "Failed to apply volume");
            }
        }
    }

    /// Pause every adapter that is producing (or about to produce) audio
    async fn silence_active(&self) {
        for adapter in self.backends.iter() {
            if adapter.is_active() {
                if let Err(e) = adapter.stop().await {
                    warn!(source = %adapter.kind(), error = %e, "Failed to silence backend");
                }
            }
        }
    }

    /// Source switch: silence others, load, optionally seek, play
    async fn start_track(
        &self,
        track: Track,
        queue_id: Option<QueueId>,
        start_at_ms: u64,
    ) -> Result<CommandOutcome> {
        let gen = self.load_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let kind = track.source;

        for adapter in self.backends.iter() {
            if adapter.kind() != kind && adapter.is_active() {
                if let Err(e) = adapter.stop().await {
                    warn!(source = %adapter.kind(), error = %e, "Failed to stop previous backend");
                }
            }
        }

        let volume = {
            let mut st = self.lock();
            st.playback.active_source = Some(kind);
            st.playback.current_track = Some(track.clone());
            st.playback.current_queue_id = queue_id;
            st.playback.position_ms = start_at_ms;
            st.playback.duration_ms = track.duration_ms;
            st.playback.set_status(PlaybackStatus::Loading);
            self.emit_playback(&st);
            st.volume_for(Channel::Music)
        };

        let adapter = self.backends.get(kind);
        adapter.prime_volume(volume);

        match adapter.load(&track).await {
            Ok(CommandOutcome::Applied) => {}
            Ok(CommandOutcome::Superseded) => return Ok(CommandOutcome::Superseded),
            Err(e) => {
                self.fail_load(gen, kind, &e);
                return Err(e);
            }
        }
        if !self.is_current_load(gen) {
            debug!(source = %kind, track_id = %track.id, "Source switch superseded after load");
            return Ok(CommandOutcome::Superseded);
        }

        if start_at_ms > 0 {
            if let Err(e) = adapter.seek(start_at_ms).await {
                warn!(source = %kind, error = %e, "Failed to restore position");
            }
        }

        match adapter.play().await {
            Ok(CommandOutcome::Applied) => {}
            Ok(CommandOutcome::Superseded) => return Ok(CommandOutcome::Superseded),
            Err(e) => {
                self.fail_load(gen, kind, &e);
                return Err(e);
            }
        }

        if !self.is_current_load(gen) {
            let still_ours = self.lock().playback.active_source == Some(kind);
            if !still_ours {
                if let Err(e) = adapter.stop().await {
                    warn!(source = %kind, error = %e, "Failed to stop superseded backend");
                }
            }
            return Ok(CommandOutcome::Superseded);
        }

        {
            let mut st = self.lock();
            st.playback.set_status(PlaybackStatus::Playing);
            self.emit_playback(&st);
        }
        info!(source = %kind, track_id = %track.id, title = %track.title, "Now playing");
        Ok(CommandOutcome::Applied)
    }

    fn fail_load(&self, gen: u64, kind: BackendKind, err: &PlaybackError) {
        if self.is_current_load(gen) {
            let mut st = self.lock();
            st.playback.set_status(PlaybackStatus::Idle);
            self.emit_playback(&st);
        }
        self.report_error(Some(kind), err);
    }

    async fn apply_play(&self) -> Result<()> {
        let (status, current, queue_id, position_ms) = {
            let st = self.lock();
            (
                st.playback.status,
                st.playback.current_track.clone(),
                st.playback.current_queue_id.clone(),
                st.playback.position_ms,
            )
        };

        match (status, current) {
            (PlaybackStatus::Playing | PlaybackStatus::Loading, _) => Ok(()),
            (PlaybackStatus::Paused, Some(track)) => {
                let adapter = Arc::clone(self.backends.get(track.source));
                if adapter.current_track_id().as_deref() == Some(track.id.as_str())
                    && adapter.phase() == AdapterPhase::Paused
                {
                    let volume = self.lock().volume_for(Channel::Music);
                    if let Err(e) = adapter.set_volume(volume).await {
                        warn!(error = %e, "Failed to set volume before resume");
                    }
                    match adapter.play().await {
                        Ok(CommandOutcome::Applied) => {
                            let mut st = self.lock();
                            st.playback.set_status(PlaybackStatus::Playing);
                            self.emit_playback(&st);
                            Ok(())
                        }
                        Ok(CommandOutcome::Superseded) => Ok(()),
                        Err(e) => {
                            self.report_error(Some(track.source), &e);
                            Err(e)
                        }
                    }
                } else {
                    self.start_track(track, queue_id, position_ms)
                        .await
                        .map(|_| ())
                }
            }
            (_, Some(track)) if queue_id.is_none() => {
                self.start_track(track, None, 0).await.map(|_| ())
            }
            _ => {
                let entry = {
                    let mut st = self.lock();
                    let entry = st.queue.start();
                    self.emit_queue(&mut st);
                    entry
                };
                let entry = entry.ok_or(PlaybackError::QueueEmpty)?;
                self.start_track(entry.track, Some(entry.queue_id), 0)
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn apply_pause(&self) -> Result<()> {
        let (status, source) = {
            let st = self.lock();
            (st.playback.status, st.playback.active_source)
        };

        match (status, source) {
            (PlaybackStatus::Loading, Some(kind)) => {
                self.load_gen.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = self.backends.get(kind).stop().await {
                    warn!(source = %kind, error = %e, "Failed to abandon load");
                }
                let mut st = self.lock();
                st.playback.set_status(PlaybackStatus::Paused);
                self.emit_playback(&st);
                Ok(())
            }
            (PlaybackStatus::Playing, Some(kind)) => {
                let adapter = self.backends.get(kind);
                match adapter.pause().await {
                    Ok(CommandOutcome::Applied) => {
                        let position = adapter.position_ms();
                        let mut st = self.lock();
                        st.playback.set_status(PlaybackStatus::Paused);
                        st.playback.position_ms = st.playback.position_ms.max(position);
                        self.emit_playback(&st);
                        Ok(())
                    }
                    Ok(CommandOutcome::Superseded) => Ok(()),
                    Err(e) => {
                        self.report_error(Some(kind), &e);
                        Err(e)
                    }
                }
            }
            _ => Ok(()),
        }
    }

    /// Stop music and mark the transport idle
    async fn go_idle(&self, clear_track: bool) {
        self.load_gen.fetch_add(1, Ordering::SeqCst);
        self.silence_active().await;

        let mut st = self.lock();
        if clear_track {
            st.playback.current_track = None;
            st.playback.current_queue_id = None;
            st.playback.active_source = None;
            st.playback.duration_ms = 0;
        }
        st.playback.position_ms = 0;
        st.playback.set_status(PlaybackStatus::Idle);
        self.emit_playback(&st);
    }

    async fn advance_and_play(&self, explicit: bool) -> Result<()> {
        let advance = {
            let mut st = self.lock();
            let advance = st.queue.advance();
            self.emit_queue(&mut st);
            advance
        };

        let entry = match advance {
            Advance::Play(entry) | Advance::Replay(entry) => entry,
            Advance::Finished => {
                info!("Queue finished");
                self.go_idle(false).await;
                return Ok(());
            }
            Advance::Empty => {
                self.go_idle(true).await;
                return if explicit {
                    Err(PlaybackError::QueueEmpty)
                } else {
                    Ok(())
                };
            }
        };

        let skipped = entry.queue_id.clone();
        match self
            .start_track(entry.track, Some(entry.queue_id), 0)
            .await
        {
            Err(PlaybackError::TrackUnplayable(reason)) => {
                warn!(%reason, "Skipping unplayable track");
                let retry = {
                    let mut st = self.lock();
                    let advance = st.queue.advance();
                    self.emit_queue(&mut st);
                    advance
                };
                match retry {
                    Advance::Play(next) | Advance::Replay(next) if next.queue_id != skipped => {
                        if let Err(e) = self
                            .start_track(next.track, Some(next.queue_id), 0)
                            .await
                        {
                            self.go_idle(false).await;
                            return Err(e);
                        }
                        Ok(())
                    }
                    _ => {
                        self.go_idle(false).await;
                        Ok(())
                    }
                }
            }
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }

    async fn on_music_ended(&self) {
        if self.lock().arbiter.holder().is_some() {
            debug!("Track ended while channel is held; not advancing");
            return;
        }
        if let Err(e) = self.advance_and_play(false).await {
            warn!(error = %e, "Autoplay failed");
        }
    }

    async fn start_interrupt_track(&self, track: &Track) -> Result<()> {
        let volume = self.lock().volume_for(Channel::Interrupt);
        let adapter = self.backends.get(BackendKind::Local);
        adapter.prime_volume(volume);

        if adapter.load(track).await? == CommandOutcome::Superseded {
            return Err(PlaybackError::not_ready("interruption load superseded"));
        }
        if adapter.play().await? == CommandOutcome::Superseded {
            return Err(PlaybackError::not_ready("interruption play superseded"));
        }
        info!(track_id = %track.id, title = %track.title, volume, "Interruption audio playing");
        Ok(())
    }

    async fn on_interrupt_track_ended(&self, track_id: &str) {
        let next = {
            let mut st = self.lock();
            let Some(session) = st.interrupt.as_mut() else {
                return;
            };
            if session.current.id != track_id {
                debug!(track_id, "Ignoring end of stale interruption track");
                return;
            }
            let next = session.remaining.pop_front();
            if let Some(track) = &next {
                session.current = track.clone();
            }
            next
        };

        match next {
            Some(track) => {
                if let Err(e) = self.start_interrupt_track(&track).await {
                    warn!(error = %e, "Failed to start next interruption track");
                    self.finish_interrupt(InterruptOutcome::Failed(e));
                }
            }
            None => self.finish_interrupt(InterruptOutcome::Completed),
        }
    }

    fn finish_interrupt(&self, outcome: InterruptOutcome) {
        let session = self.lock().interrupt.take();
        if let Some(mut session) = session {
            info!(?outcome, "Interruption audio finished");
            if let Some(done) = session.done.take() {
                // The scheduler may have given up waiting
                let _ = done.send(outcome);
            }
        }
    }
}

impl std::fmt::Debug for TransportController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportController")
            .field("backends", &self.backends)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
