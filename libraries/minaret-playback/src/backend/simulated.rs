//! In-process transport that simulates a provider's clock
//!
//! Used by the hub's dry-run mode (no provider credentials needed) and by
//! tests. Every command is recorded with its time offset so call sequences
//! can be asserted. Locally rendered kinds push end-of-track through the
//! attached notifier; remote kinds report it through `status()` the way a
//! streaming API does (stopped at position 0).

use super::transport::{Transport, TransportNotifier, TransportStatus};
use async_trait::async_trait;
use minaret_core::{BackendKind, PlaybackError, Result, Track};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Command family, for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `load`
    Load,
    /// `play`
    Play,
    /// `pause`
    Pause,
    /// `seek`
    Seek,
    /// `set_volume`
    SetVolume,
    /// `status`
    Status,
}

/// A recorded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    /// Load of a track id
    Load(String),
    /// Play
    Play,
    /// Pause
    Pause,
    /// Seek to a position
    Seek(u64),
    /// Volume write
    SetVolume(u8),
}

/// A recorded command with its time offset from transport creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCall {
    /// Offset from creation
    pub at: Duration,
    /// The command
    pub op: TransportOp,
}

#[derive(Debug)]
struct SimState {
    epoch: Instant,
    loaded: Option<Track>,
    load_seq: u64,
    playing: bool,
    position_ms: u64,
    anchor: Option<Instant>,
    volume: u8,
    generation: u64,
    calls: Vec<TransportCall>,
    failures: HashMap<OpKind, VecDeque<PlaybackError>>,
    unplayable: HashSet<String>,
    load_delay: Duration,
    end_timer: Option<JoinHandle<()>>,
}

impl SimState {
    fn position_now(&self) -> u64 {
        let elapsed = match (self.playing, self.anchor) {
            (true, Some(anchor)) => anchor.elapsed().as_millis() as u64,
            _ => 0,
        };
        let position = self.position_ms + elapsed;
        match self.loaded.as_ref().map(|t| t.duration_ms) {
            Some(duration) if duration > 0 => position.min(duration),
            _ => position,
        }
    }

    fn freeze(&mut self) {
        self.position_ms = self.position_now();
        self.anchor = self.playing.then(Instant::now);
        self.generation += 1;
        if let Some(timer) = self.end_timer.take() {
            timer.abort();
        }
    }

    fn record(&mut self, op: TransportOp) {
        let at = self.epoch.elapsed();
        self.calls.push(TransportCall { at, op });
    }

    fn injected(&mut self, kind: OpKind) -> Option<PlaybackError> {
        self.failures.get_mut(&kind).and_then(VecDeque::pop_front)
    }
}

/// Simulated provider
#[derive(Debug)]
pub struct SimulatedTransport {
    kind: BackendKind,
    state: Arc<Mutex<SimState>>,
    notifier: Arc<Mutex<Option<TransportNotifier>>>,
}

impl SimulatedTransport {
    /// Create a simulated provider for `kind`
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Arc::new(Mutex::new(SimState {
                epoch: Instant::now(),
                loaded: None,
                load_seq: 0,
                playing: false,
                position_ms: 0,
                anchor: None,
                volume: 100,
                generation: 0,
                calls: Vec::new(),
                failures: HashMap::new(),
                unplayable: HashSet::new(),
                load_delay: Duration::ZERO,
                end_timer: None,
            })),
            notifier: Arc::new(Mutex::new(None)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Inspection =====

    /// Every recorded command
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Recorded commands without timestamps
    pub fn ops(&self) -> Vec<TransportOp> {
        self.lock().calls.iter().map(|c| c.op.clone()).collect()
    }

    /// Values of every recorded volume write
    pub fn volume_writes(&self) -> Vec<u8> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c.op {
                TransportOp::SetVolume(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded commands
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Whether the simulated provider is producing audio
    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    /// Id of the loaded track
    pub fn loaded_track_id(&self) -> Option<String> {
        self.lock().loaded.as_ref().map(|t| t.id.clone())
    }

    /// Current simulated position
    pub fn position_ms(&self) -> u64 {
        self.lock().position_now()
    }

    /// Last volume written
    pub fn volume(&self) -> u8 {
        self.lock().volume
    }

    // ===== Fault injection =====

    /// Make the next command of `kind` fail with `err`
    pub fn fail_next(&self, kind: OpKind, err: PlaybackError) {
        self.lock().failures.entry(kind).or_default().push_back(err);
    }

    /// Make loads of this native reference fail as unplayable
    pub fn mark_unplayable(&self, native_ref: impl Into<String>) {
        self.lock().unplayable.insert(native_ref.into());
    }

    /// Delay every load by `delay`
    pub fn set_load_delay(&self, delay: Duration) {
        self.lock().load_delay = delay;
    }

    /// Play the loaded track to its end right now
    pub fn finish(&self) {
        let ended = {
            let mut state = self.lock();
            if !state.playing {
                return;
            }
            state.freeze();
            state.playing = false;
            state.anchor = None;
            if self.kind.is_remote() {
                state.position_ms = 0;
                None
            } else {
                state.position_ms = state.loaded.as_ref().map_or(0, |t| t.duration_ms);
                state.loaded.as_ref().map(|t| t.id.clone())
            }
        };
        if let Some(track_id) = ended {
            self.notify_ended(&track_id);
        }
    }

    /// Pause from the provider side (another app or device)
    pub fn external_pause(&self) {
        let mut state = self.lock();
        state.freeze();
        state.playing = false;
        state.anchor = None;
    }

    fn notify_ended(&self, track_id: &str) {
        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(notifier) = notifier {
            notifier.ended(track_id);
        }
    }

    /// Arm the end-of-track timer for locally rendered kinds
    fn arm_end_timer(&self, state: &mut SimState) {
        if self.kind.is_remote() {
            return;
        }
        let Some(track) = state.loaded.clone() else {
            return;
        };
        if track.duration_ms == 0 {
            return;
        }

        let remaining = Duration::from_millis(track.duration_ms.saturating_sub(state.position_ms));
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let notifier = Arc::clone(&self.notifier);
        state.end_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if state.generation != generation || !state.playing {
                    return;
                }
                state.playing = false;
                state.anchor = None;
                state.position_ms = track.duration_ms;
                state.end_timer = None;
            }
            let notifier = notifier
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(notifier) = notifier {
                notifier.ended(&track.id);
            }
        }));
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn load(&self, track: &Track) -> Result<()> {
        let (seq, delay) = {
            let mut state = self.lock();
            state.record(TransportOp::Load(track.id.clone()));
            if let Some(err) = state.injected(OpKind::Load) {
                return Err(err);
            }
            if track
                .native_ref()
                .is_some_and(|r| state.unplayable.contains(r))
            {
                return Err(PlaybackError::unplayable(format!(
                    "{} cannot resolve {}",
                    self.kind, track.id
                )));
            }
            state.load_seq += 1;
            (state.load_seq, state.load_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.load_seq != seq {
            debug!(source = %self.kind, track_id = %track.id, "Simulated load overtaken");
            return Ok(());
        }
        state.freeze();
        state.loaded = Some(track.clone());
        state.playing = false;
        state.anchor = None;
        state.position_ms = 0;
        info!(source = %self.kind, track_id = %track.id, title = %track.title, "Simulated load");
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut state = self.lock();
        state.record(TransportOp::Play);
        if let Some(err) = state.injected(OpKind::Play) {
            return Err(err);
        }
        if state.loaded.is_none() {
            return Err(PlaybackError::not_ready(format!("{} has nothing loaded", self.kind)));
        }
        state.freeze();
        state.playing = true;
        state.anchor = Some(Instant::now());
        self.arm_end_timer(&mut state);
        info!(source = %self.kind, position_ms = state.position_ms, "Simulated play");
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut state = self.lock();
        state.record(TransportOp::Pause);
        if let Some(err) = state.injected(OpKind::Pause) {
            return Err(err);
        }
        state.freeze();
        state.playing = false;
        state.anchor = None;
        info!(source = %self.kind, position_ms = state.position_ms, "Simulated pause");
        Ok(())
    }

    async fn seek(&self, position_ms: u64) -> Result<()> {
        let mut state = self.lock();
        state.record(TransportOp::Seek(position_ms));
        if let Some(err) = state.injected(OpKind::Seek) {
            return Err(err);
        }
        state.freeze();
        state.position_ms = position_ms;
        if state.playing {
            self.arm_end_timer(&mut state);
        }
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> Result<()> {
        let mut state = self.lock();
        state.record(TransportOp::SetVolume(volume));
        if let Some(err) = state.injected(OpKind::SetVolume) {
            return Err(err);
        }
        state.volume = volume;
        debug!(source = %self.kind, volume, "Simulated volume");
        Ok(())
    }

    async fn status(&self) -> Result<TransportStatus> {
        let mut state = self.lock();
        if let Some(err) = state.injected(OpKind::Status) {
            return Err(err);
        }
        let duration_ms = state.loaded.as_ref().map_or(0, |t| t.duration_ms);
        let mut position_ms = state.position_now();
        if state.playing && duration_ms > 0 && position_ms >= duration_ms {
            // Streaming APIs report a finished track as stopped at zero
            state.freeze();
            state.playing = false;
            state.anchor = None;
            state.position_ms = 0;
            position_ms = 0;
        }
        Ok(TransportStatus {
            is_playing: state.playing,
            position_ms,
            duration_ms,
        })
    }

    fn attach(&self, notifier: TransportNotifier) {
        *self.notifier.lock().unwrap_or_else(PoisonError::into_inner) = Some(notifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn position_advances_while_playing() {
        let transport = SimulatedTransport::new(BackendKind::Spotify);
        let track = Track::remote(BackendKind::Spotify, "1", "A", "B", "spotify:track:1", 10_000);
        transport.load(&track).await.unwrap();
        transport.play().await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.position_ms(), 4_000);

        transport.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(transport.position_ms(), 4_000);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_end_reports_stopped_at_zero() {
        let transport = SimulatedTransport::new(BackendKind::SoundCloud);
        let track = Track::remote(BackendKind::SoundCloud, "1", "A", "B", "sc:1", 2_000);
        transport.load(&track).await.unwrap();
        transport.play().await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = transport.status().await.unwrap();
        assert!(!status.is_playing);
        assert_eq!(status.position_ms, 0);
    }

    #[tokio::test]
    async fn injected_failure_is_returned_once() {
        let transport = SimulatedTransport::new(BackendKind::Local);
        transport.fail_next(OpKind::Play, PlaybackError::unavailable("no device"));
        let track = Track::local("1", "A", "B", "/a.mp3", 1_000);
        transport.load(&track).await.unwrap();

        assert!(transport.play().await.is_err());
        assert!(transport.play().await.is_ok());
        assert_eq!(
            transport.ops(),
            vec![
                TransportOp::Load("1".into()),
                TransportOp::Play,
                TransportOp::Play
            ]
        );
    }

    #[tokio::test]
    async fn unplayable_reference_fails_load() {
        let transport = SimulatedTransport::new(BackendKind::YouTube);
        transport.mark_unplayable("gone");
        let track = Track::remote(BackendKind::YouTube, "1", "A", "B", "gone", 1_000);
        let err = transport.load(&track).await.unwrap_err();
        assert!(matches!(err, PlaybackError::TrackUnplayable(_)));
    }
}
