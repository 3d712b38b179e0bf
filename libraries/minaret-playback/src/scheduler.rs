//! Interruption scheduler
//!
//! Watches a list of prayer triggers and, when one falls due, runs a fixed
//! protocol against the transport controller while holding the playback
//! channel:
//!
//! 1. fade the music out (or cut it immediately)
//! 2. suspend the music, remembering track and position
//! 3. play the announcement and main payload on the local backend
//! 4. wait the post-action delay
//! 5. resume, stay silent, or play alternate content
//!
//! Entries move `Pending -> Firing -> Resolving -> Done` and never fire twice.
//! Interruptions never overlap: an entry that falls due while another is
//! running waits for it to finish.

use crate::arbitration::{Actor, HoldToken};
use crate::controller::{InterruptOutcome, ResumePoint, TransportController};
use crate::events::HubEvent;
use crate::fade::{plan_ramp, FadeCurve};
use minaret_core::settings::{read_or, write};
use minaret_core::{Clock, PlaybackError, Result, SettingsStore, Track};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extra wait beyond the payload length before the interrupt is abandoned
const SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Wait bound when the payload length is unknown
const UNKNOWN_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// How music leaves the channel when an entry fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeMode {
    /// Stepped ramp over `fade_out_sec`
    #[default]
    Fade,
    /// Stop without ramping
    Immediate,
}

impl fmt::Display for FadeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FadeMode::Fade => "fade",
            FadeMode::Immediate => "immediate",
        })
    }
}

impl FromStr for FadeMode {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fade" => Ok(Self::Fade),
            "immediate" => Ok(Self::Immediate),
            other => Err(PlaybackError::invalid_input(format!("fade mode {other}"))),
        }
    }
}

/// What happens once the interruption audio is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    /// Resume the interrupted track where it stopped
    #[default]
    Resume,
    /// Stay paused
    Silence,
    /// Play the library's alternate track
    PlayAlternate,
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PostAction::Resume => "resume",
            PostAction::Silence => "silence",
            PostAction::PlayAlternate => "play_alternate",
        })
    }
}

impl FromStr for PostAction {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "resume" => Ok(Self::Resume),
            "silence" => Ok(Self::Silence),
            "play_alternate" => Ok(Self::PlayAlternate),
            other => Err(PlaybackError::invalid_input(format!("post action {other}"))),
        }
    }
}

/// Scheduler settings, persisted under `scheduler.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Master switch; due entries are skipped while off
    pub enabled: bool,
    /// Fire this many seconds before the trigger time
    pub lead_time_sec: u64,
    pub fade_mode: FadeMode,
    pub fade_out_sec: u64,
    /// Fade-in after a resume
    pub fade_in_sec: u64,
    pub fade_curve: FadeCurve,
    pub post_action: PostAction,
    /// Wait between the end of the interruption audio and the post-action
    pub post_action_delay_sec: u64,
    /// Play the per-label announcement before the main payload
    pub announcement_enabled: bool,
    /// Entries observed later than this past their fire time are skipped
    pub stale_after_sec: u64,
    /// Ramp step interval
    pub step_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lead_time_sec: 0,
            fade_mode: FadeMode::Fade,
            fade_out_sec: 5,
            fade_in_sec: 5,
            fade_curve: FadeCurve::Linear,
            post_action: PostAction::Resume,
            post_action_delay_sec: 30,
            announcement_enabled: false,
            stale_after_sec: 120,
            step_ms: 250,
        }
    }
}

impl SchedulerSettings {
    /// Read settings, keeping defaults for missing or malformed keys
    pub fn load(store: &dyn SettingsStore) -> Self {
        let d = Self::default();
        let fade_curve = store
            .get("scheduler.fade_curve")
            .and_then(|raw| FadeCurve::from_str(raw.trim()))
            .unwrap_or(d.fade_curve);
        Self {
            enabled: read_or(store, "scheduler.enabled", d.enabled),
            lead_time_sec: read_or(store, "scheduler.lead_time_sec", d.lead_time_sec),
            fade_mode: read_or(store, "scheduler.fade_mode", d.fade_mode),
            fade_out_sec: read_or(store, "scheduler.fade_out_sec", d.fade_out_sec),
            fade_in_sec: read_or(store, "scheduler.fade_in_sec", d.fade_in_sec),
            fade_curve,
            post_action: read_or(store, "scheduler.post_action", d.post_action),
            post_action_delay_sec: read_or(
                store,
                "scheduler.post_action_delay_sec",
                d.post_action_delay_sec,
            ),
            announcement_enabled: read_or(
                store,
                "scheduler.announcement_enabled",
                d.announcement_enabled,
            ),
            stale_after_sec: read_or(store, "scheduler.stale_after_sec", d.stale_after_sec),
            step_ms: read_or(store, "scheduler.step_ms", d.step_ms),
        }
    }

    /// Write every field back
    pub fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        write(store, "scheduler.enabled", &self.enabled)?;
        write(store, "scheduler.lead_time_sec", &self.lead_time_sec)?;
        write(store, "scheduler.fade_mode", &self.fade_mode)?;
        write(store, "scheduler.fade_out_sec", &self.fade_out_sec)?;
        write(store, "scheduler.fade_in_sec", &self.fade_in_sec)?;
        store.set("scheduler.fade_curve", self.fade_curve.as_str().to_string())?;
        write(store, "scheduler.post_action", &self.post_action)?;
        write(
            store,
            "scheduler.post_action_delay_sec",
            &self.post_action_delay_sec,
        )?;
        write(
            store,
            "scheduler.announcement_enabled",
            &self.announcement_enabled,
        )?;
        write(store, "scheduler.stale_after_sec", &self.stale_after_sec)?;
        write(store, "scheduler.step_ms", &self.step_ms)?;
        store.flush()
    }

    fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms.max(1))
    }
}

/// Interruption audio, looked up by prayer label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLibrary {
    /// Used when a label has no audio of its own
    pub default: Option<Track>,
    /// Main audio per label
    #[serde(default)]
    pub by_label: HashMap<String, Track>,
    /// Announcement played before the main audio
    #[serde(default)]
    pub announcements: HashMap<String, Track>,
    /// Played by the `PlayAlternate` post-action
    pub alternate: Option<Track>,
}

impl PayloadLibrary {
    /// Main audio for `label`
    pub fn main_for(&self, label: &str) -> Option<&Track> {
        self.by_label
            .get(&label.to_lowercase())
            .or(self.default.as_ref())
    }

    /// Announcement for `label`
    pub fn announcement_for(&self, label: &str) -> Option<&Track> {
        self.announcements.get(&label.to_lowercase())
    }

    /// Register main audio for a label
    pub fn set_label(&mut self, label: &str, track: Track) {
        self.by_label.insert(label.to_lowercase(), track);
    }

    /// Register an announcement for a label
    pub fn set_announcement(&mut self, label: &str, track: Track) {
        self.announcements.insert(label.to_lowercase(), track);
    }
}

/// One externally supplied trigger time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrayerTrigger {
    /// Trigger time, Unix epoch milliseconds
    pub at_epoch_ms: i64,
    /// Prayer name
    pub label: String,
    /// Audio for this trigger only
    #[serde(default)]
    pub payload: Option<Track>,
}

impl PrayerTrigger {
    /// Trigger using the library's audio
    pub fn new(at_epoch_ms: i64, label: impl Into<String>) -> Self {
        Self {
            at_epoch_ms,
            label: label.into(),
            payload: None,
        }
    }

    fn entry_id(&self) -> String {
        format!("{}@{}", self.label.to_lowercase(), self.at_epoch_ms)
    }
}

/// Lifecycle of a schedule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPhase {
    /// Waiting for its fire time
    Pending,
    /// Fading out and playing the interruption audio
    Firing,
    /// Waiting out the post-action delay
    Resolving,
    /// Finished; never fires again
    Done,
}

/// How an entry ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// Payload played to the end
    Completed,
    /// Observed too late to play
    Missed,
    /// A step failed; the post-action still ran
    Failed(String),
    /// Stopped through [`InterruptionScheduler::stop_current`]
    Cancelled,
    /// No audio configured for the label
    NoPayload,
    /// Fell due while the scheduler was disabled
    Disabled,
}

/// A trigger the scheduler is tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// `label@epoch_ms`
    pub id: String,
    /// Prayer time, Unix epoch milliseconds
    pub trigger_at_epoch_ms: i64,
    /// Prayer name
    pub label: String,
    /// Per-trigger audio override
    pub payload: Option<Track>,
    /// Lifecycle phase
    pub phase: EntryPhase,
    /// Set once done
    pub outcome: Option<EntryOutcome>,
}

impl ScheduleEntry {
    fn from_trigger(trigger: PrayerTrigger) -> Self {
        Self {
            id: trigger.entry_id(),
            trigger_at_epoch_ms: trigger.at_epoch_ms,
            label: trigger.label,
            payload: trigger.payload,
            phase: EntryPhase::Pending,
            outcome: None,
        }
    }

    /// When the entry fires, given a lead time
    pub fn fire_at_epoch_ms(&self, lead_time_sec: u64) -> i64 {
        self.trigger_at_epoch_ms - (lead_time_sec as i64) * 1000
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    settings: SchedulerSettings,
    library: PayloadLibrary,
    entries: Vec<ScheduleEntry>,
    due: VecDeque<String>,
    active: Option<String>,
    cancel: Option<CancellationToken>,
}

impl SchedulerState {
    fn entry_mut(&mut self, id: &str) -> Option<&mut ScheduleEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}

/// Time-driven interruption protocol runner
pub struct InterruptionScheduler {
    controller: Arc<TransportController>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn SettingsStore>>,
    state: Mutex<SchedulerState>,
}

impl InterruptionScheduler {
    /// Create a scheduler
    ///
    /// Settings are loaded from `store` when one is given.
    pub fn new(
        controller: Arc<TransportController>,
        clock: Arc<dyn Clock>,
        library: PayloadLibrary,
        store: Option<Arc<dyn SettingsStore>>,
    ) -> Arc<Self> {
        let settings = store
            .as_deref()
            .map_or_else(SchedulerSettings::default, SchedulerSettings::load);
        Arc::new(Self {
            controller,
            clock,
            store,
            state: Mutex::new(SchedulerState {
                settings,
                library,
                ..SchedulerState::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current settings
    pub fn settings(&self) -> SchedulerSettings {
        self.lock().settings.clone()
    }

    /// Replace and persist settings
    pub fn update_settings(&self, settings: SchedulerSettings) -> Result<()> {
        if let Some(store) = &self.store {
            settings.save(store.as_ref())?;
        }
        info!(?settings, "Scheduler settings updated");
        self.lock().settings = settings;
        Ok(())
    }

    /// Replace the payload library
    pub fn set_library(&self, library: PayloadLibrary) {
        self.lock().library = library;
    }

    /// Tracked entries, ordered by trigger time
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.lock().entries.clone()
    }

    /// Id of the entry being run
    pub fn active_entry(&self) -> Option<String> {
        self.lock().active.clone()
    }

    /// Recompute the schedule from a fresh trigger list
    ///
    /// Entries already done or running keep their state; pending entries
    /// missing from the new list are dropped.
    pub fn set_triggers(&self, triggers: Vec<PrayerTrigger>) {
        let mut st = self.lock();
        let mut previous: HashMap<String, ScheduleEntry> = st
            .entries
            .drain(..)
            .map(|entry| (entry.id.clone(), entry))
            .collect();

        let mut entries: Vec<ScheduleEntry> = triggers
            .into_iter()
            .map(|trigger| {
                let fresh = ScheduleEntry::from_trigger(trigger);
                match previous.remove(&fresh.id) {
                    Some(old) if old.phase != EntryPhase::Pending => old,
                    _ => fresh,
                }
            })
            .collect();

        // Keep finished and running entries that fell out of the list
        let active = st.active.clone();
        entries.extend(previous.into_values().filter(|entry| {
            entry.phase == EntryPhase::Done || active.as_deref() == Some(entry.id.as_str())
        }));
        entries.sort_by(|a, b| {
            a.trigger_at_epoch_ms
                .cmp(&b.trigger_at_epoch_ms)
                .then_with(|| a.id.cmp(&b.id))
        });

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        st.due.retain(|id| ids.contains(&id.as_str()));
        debug!(count = entries.len(), "Schedule recomputed");
        st.entries = entries;
    }

    /// Check pending entries against the clock
    ///
    /// Returns the ids that became due on this tick.
    pub fn tick(&self) -> Vec<String> {
        let now = self.clock.now_epoch_ms();
        let mut resolved = Vec::new();
        let mut became_due = Vec::new();

        {
            let mut guard = self.lock();
            let st = &mut *guard;
            let settings = st.settings.clone();
            let stale_ms = (settings.stale_after_sec as i64) * 1000;
            let mut due_now = Vec::new();

            for entry in &mut st.entries {
                // Queued entries wait for the running one, however long it takes
                if entry.phase != EntryPhase::Pending || st.due.contains(&entry.id) {
                    continue;
                }
                let fire_at = entry.fire_at_epoch_ms(settings.lead_time_sec);
                if now < fire_at {
                    continue;
                }
                let outcome = if now - fire_at > stale_ms {
                    Some(EntryOutcome::Missed)
                } else if !settings.enabled {
                    Some(EntryOutcome::Disabled)
                } else {
                    None
                };
                match outcome {
                    Some(outcome) => {
                        warn!(entry_id = %entry.id, ?outcome, "Schedule entry skipped");
                        entry.phase = EntryPhase::Done;
                        entry.outcome = Some(outcome);
                        resolved.push(entry.clone());
                    }
                    None => due_now.push(entry.id.clone()),
                }
            }

            for id in due_now {
                st.due.push_back(id.clone());
                became_due.push(id);
            }
        }

        for entry in resolved {
            self.emit(&entry);
        }
        became_due
    }

    /// Tick, then run the next due entry to completion
    pub async fn run_due(&self) -> Option<EntryOutcome> {
        self.tick();
        let id = self.take_next_due()?;
        self.run_entry(&id).await
    }

    /// Fire an interruption for `label` right away
    pub async fn trigger_now(&self, label: &str) -> Result<EntryOutcome> {
        let now = self.clock.now_epoch_ms();
        let entry = ScheduleEntry::from_trigger(PrayerTrigger::new(now, label));
        let id = format!("{}#manual", entry.id);
        {
            let mut st = self.lock();
            if let Some(active) = &st.active {
                return Err(PlaybackError::invalid_input(format!(
                    "interruption {active} is already running"
                )));
            }
            st.entries.push(ScheduleEntry { id: id.clone(), ..entry });
        }
        info!(label, "Manual interruption triggered");
        self.run_entry(&id)
            .await
            .ok_or_else(|| PlaybackError::invalid_input("interruption could not start"))
    }

    /// Cancel the running interruption
    ///
    /// Stops the fade ramp or interrupt audio and moves on to the post-action.
    /// Returns false when nothing is running.
    pub fn stop_current(&self) -> bool {
        let st = self.lock();
        match &st.cancel {
            Some(cancel) => {
                info!(entry_id = ?st.active, "Stopping current interruption");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Tick every `tick` until `shutdown` fires
    pub async fn run(self: Arc<Self>, tick: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current: Option<tokio::task::JoinHandle<Option<EntryOutcome>>> = None;

        info!(tick_ms = tick.as_millis() as u64, "Interruption scheduler started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    self.stop_current();
                    if let Some(handle) = current.take() {
                        let _ = handle.await;
                    }
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.tick();
            if current.as_ref().is_some_and(tokio::task::JoinHandle::is_finished) {
                current = None;
            }
            if current.is_none() {
                if let Some(id) = self.take_next_due() {
                    let this = Arc::clone(&self);
                    current = Some(tokio::spawn(async move { this.run_entry(&id).await }));
                }
            }
        }
        info!("Interruption scheduler stopped");
    }

    fn take_next_due(&self) -> Option<String> {
        let mut st = self.lock();
        if st.active.is_some() {
            return None;
        }
        st.due.pop_front()
    }

    fn emit(&self, entry: &ScheduleEntry) {
        self.controller.publish(HubEvent::InterruptionChanged {
            entry_id: entry.id.clone(),
            label: entry.label.clone(),
            phase: entry.phase,
            outcome: entry.outcome.clone(),
        });
    }

    fn set_phase(&self, id: &str, phase: EntryPhase, outcome: Option<EntryOutcome>) {
        let entry = {
            let mut st = self.lock();
            let Some(entry) = st.entry_mut(id) else {
                return;
            };
            entry.phase = phase;
            if outcome.is_some() {
                entry.outcome = outcome;
            }
            entry.clone()
        };
        info!(entry_id = %entry.id, label = %entry.label, ?phase, outcome = ?entry.outcome, "Interruption phase");
        self.emit(&entry);
    }

    /// Run one entry through the whole protocol
    async fn run_entry(&self, id: &str) -> Option<EntryOutcome> {
        let cancel = CancellationToken::new();
        let (entry, settings, library) = {
            let mut st = self.lock();
            if st.active.is_some() {
                return None;
            }
            let entry = st.entries.iter().find(|e| e.id == id).cloned()?;
            if entry.phase != EntryPhase::Pending {
                return None;
            }
            st.active = Some(id.to_string());
            st.cancel = Some(cancel.clone());
            (entry, st.settings.clone(), st.library.clone())
        };

        let outcome = self.execute(&entry, &settings, &library, &cancel).await;

        {
            let mut st = self.lock();
            st.active = None;
            st.cancel = None;
        }
        self.set_phase(id, EntryPhase::Done, Some(outcome.clone()));
        Some(outcome)
    }

    async fn execute(
        &self,
        entry: &ScheduleEntry,
        settings: &SchedulerSettings,
        library: &PayloadLibrary,
        cancel: &CancellationToken,
    ) -> EntryOutcome {
        let Some(main) = entry
            .payload
            .clone()
            .or_else(|| library.main_for(&entry.label).cloned())
        else {
            warn!(label = %entry.label, "No interruption audio configured");
            return EntryOutcome::NoPayload;
        };
        let mut payload = Vec::with_capacity(2);
        if settings.announcement_enabled {
            if let Some(announcement) = library.announcement_for(&entry.label) {
                payload.push(announcement.clone());
            }
        }
        payload.push(main);

        let Some(token) = self.controller.acquire_hold(Actor::Scheduler) else {
            return EntryOutcome::Failed("playback channel unavailable".to_string());
        };
        self.set_phase(&entry.id, EntryPhase::Firing, None);

        let (mut outcome, point) = self
            .interrupt(&token, &payload, settings, cancel)
            .await;

        self.set_phase(&entry.id, EntryPhase::Resolving, None);
        if outcome == EntryOutcome::Completed {
            let delay = Duration::from_secs(settings.post_action_delay_sec);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => outcome = EntryOutcome::Cancelled,
            }
        }

        if let Err(e) = self
            .post_action(&token, point.as_ref(), settings, library)
            .await
        {
            warn!(error = %e, "Post-action failed");
            if outcome == EntryOutcome::Completed {
                outcome = EntryOutcome::Failed(e.to_string());
            }
        }

        if let Err(e) = self.controller.release_hold(token).await {
            warn!(error = %e, "Deferred user command failed after interruption");
        }
        outcome
    }

    /// Fade out, suspend, play the payload
    async fn interrupt(
        &self,
        token: &HoldToken,
        payload: &[Track],
        settings: &SchedulerSettings,
        cancel: &CancellationToken,
    ) -> (EntryOutcome, Option<ResumePoint>) {
        if settings.fade_mode == FadeMode::Fade && self.controller.is_music_playing() {
            let duration = Duration::from_secs(settings.fade_out_sec);
            let completed = self
                .ramp(token, 100, 0, duration, settings, Some(cancel))
                .await;
            if !completed {
                return (EntryOutcome::Cancelled, None);
            }
        }

        let point = self.controller.suspend_for_interrupt(token).await;
        if cancel.is_cancelled() {
            return (EntryOutcome::Cancelled, Some(point));
        }

        let done = match self
            .controller
            .play_interrupt(token, payload.to_vec())
            .await
        {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "Interruption audio failed to start");
                return (EntryOutcome::Failed(e.to_string()), Some(point));
            }
        };

        let timeout = safety_timeout(payload);
        let outcome = tokio::select! {
            result = done => match result {
                Ok(InterruptOutcome::Completed) => EntryOutcome::Completed,
                Ok(InterruptOutcome::Failed(e)) => EntryOutcome::Failed(e.to_string()),
                Ok(InterruptOutcome::Stopped) | Err(_) => EntryOutcome::Cancelled,
            },
            () = cancel.cancelled() => {
                self.controller.stop_interrupt(token).await;
                EntryOutcome::Cancelled
            }
            () = tokio::time::sleep(timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Interruption audio did not finish in time");
                self.controller.stop_interrupt(token).await;
                EntryOutcome::Failed("interruption audio timed out".to_string())
            }
        };
        (outcome, Some(point))
    }

    async fn post_action(
        &self,
        token: &HoldToken,
        point: Option<&ResumePoint>,
        settings: &SchedulerSettings,
        library: &PayloadLibrary,
    ) -> Result<()> {
        info!(action = %settings.post_action, "Applying post-action");
        match settings.post_action {
            PostAction::Resume => {
                let Some(point) = point.filter(|p| p.was_playing) else {
                    self.controller.set_fade_level(token, 100).await;
                    return Ok(());
                };
                let fade_in = settings.fade_mode == FadeMode::Fade && settings.fade_in_sec > 0;
                self.controller
                    .set_fade_level(token, if fade_in { 0 } else { 100 })
                    .await;
                self.controller.resume_from(token, point).await?;
                if fade_in {
                    let duration = Duration::from_secs(settings.fade_in_sec);
                    self.ramp(token, 0, 100, duration, settings, None).await;
                }
                Ok(())
            }
            PostAction::Silence => Ok(()),
            PostAction::PlayAlternate => {
                self.controller.set_fade_level(token, 100).await;
                match &library.alternate {
                    Some(track) => self.controller.play_alternate(token, track.clone()).await,
                    None => Err(PlaybackError::invalid_input("no alternate track configured")),
                }
            }
        }
    }

    /// Step the fade level; returns false when cancelled part way
    async fn ramp(
        &self,
        token: &HoldToken,
        from: u8,
        to: u8,
        duration: Duration,
        settings: &SchedulerSettings,
        cancel: Option<&CancellationToken>,
    ) -> bool {
        let steps = plan_ramp(from, to, duration, settings.step(), settings.fade_curve);
        let start = Instant::now();
        debug!(from, to, steps = steps.len(), "Fade ramp");

        for step in steps {
            let wait = tokio::time::sleep_until(start + step.at);
            match cancel {
                Some(cancel) => {
                    tokio::select! {
                        () = wait => {}
                        () = cancel.cancelled() => return false,
                    }
                }
                None => wait.await,
            }
            self.controller.set_fade_level(token, step.level).await;
        }
        true
    }
}

impl fmt::Debug for InterruptionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("InterruptionScheduler")
            .field("entries", &st.entries.len())
            .field("active", &st.active)
            .finish_non_exhaustive()
    }
}

fn safety_timeout(payload: &[Track]) -> Duration {
    if payload.iter().any(|t| t.duration_ms == 0) {
        return UNKNOWN_PAYLOAD_TIMEOUT;
    }
    let total: u64 = payload.iter().map(|t| t.duration_ms).sum();
    Duration::from_millis(total) + SAFETY_MARGIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use minaret_core::MemorySettingsStore;

    #[test]
    fn settings_round_trip_through_store() {
        let store = MemorySettingsStore::new();
        let settings = SchedulerSettings {
            lead_time_sec: 60,
            fade_mode: FadeMode::Immediate,
            fade_curve: FadeCurve::SCurve,
            post_action: PostAction::PlayAlternate,
            announcement_enabled: true,
            ..SchedulerSettings::default()
        };
        settings.save(&store).unwrap();

        assert_eq!(SchedulerSettings::load(&store), settings);
    }

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        let store = MemorySettingsStore::with_values([
            ("scheduler.fade_mode", "sideways"),
            ("scheduler.fade_out_sec", "-3"),
            ("scheduler.post_action", "silence"),
        ]);
        let settings = SchedulerSettings::load(&store);

        assert_eq!(settings.fade_mode, FadeMode::Fade);
        assert_eq!(settings.fade_out_sec, 5);
        assert_eq!(settings.post_action, PostAction::Silence);
    }

    #[test]
    fn library_lookup_is_case_insensitive_with_default() {
        let mut library = PayloadLibrary {
            default: Some(Track::local("adhan", "Adhan", "", "/a/adhan.mp3", 1000)),
            ..PayloadLibrary::default()
        };
        library.set_label("Fajr", Track::local("fajr", "Fajr", "", "/a/fajr.mp3", 1000));

        assert_eq!(library.main_for("fajr").map(|t| t.id.as_str()), Some("fajr"));
        assert_eq!(library.main_for("Asr").map(|t| t.id.as_str()), Some("adhan"));
        assert!(library.announcement_for("fajr").is_none());
    }

    #[test]
    fn fire_time_honours_lead() {
        let entry = ScheduleEntry::from_trigger(PrayerTrigger::new(100_000, "Dhuhr"));
        assert_eq!(entry.id, "dhuhr@100000");
        assert_eq!(entry.fire_at_epoch_ms(30), 70_000);
    }

    #[test]
    fn safety_timeout_uses_payload_length() {
        let short = Track::local("a", "A", "", "/a.mp3", 60_000);
        let unknown = Track::local("b", "B", "", "/b.mp3", 0);

        assert_eq!(safety_timeout(&[short.clone()]), Duration::from_secs(90));
        assert_eq!(safety_timeout(&[short, unknown]), UNKNOWN_PAYLOAD_TIMEOUT);
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_string(&EntryOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json, r#"{"outcome":"failed","reason":"boom"}"#);
    }
}
