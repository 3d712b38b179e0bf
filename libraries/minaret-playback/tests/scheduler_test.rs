//! Integration tests for the interruption scheduler
//!
//! Every scenario runs the full protocol (fade, suspend, interrupt audio,
//! post-action delay, post-action) against simulated providers with tokio's
//! paused clock. Music plays on the YouTube backend because it takes volume
//! writes immediately, which keeps the recorded command stream exact.

mod common;

use common::{
    adhan_library, advance, local_track, spotify_track, youtube_track, Harness, EPOCH_MS,
};
use minaret_core::{BackendKind, PlaybackError, QueueId, SettingsStore};
use minaret_playback::backend::{TransportCall, TransportOp};
use minaret_playback::{
    Actor, EntryOutcome, EntryPhase, FadeMode, HubEvent, PayloadLibrary, PlaybackStatus,
    PostAction, PrayerTrigger, SchedulerSettings,
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ADHAN_MS: u64 = 60_000;

/// Harness with a long YouTube track playing for ten seconds
async fn music_playing() -> (Harness, Instant) {
    let origin = Instant::now();
    let h = Harness::new();
    h.controller
        .play_track(youtube_track("v", 600_000))
        .await
        .unwrap();
    advance(Duration::from_secs(10)).await;
    (h, origin)
}

/// Like [`music_playing`], but the track is playing from the queue
async fn queued_music_playing() -> (Harness, QueueId) {
    let h = Harness::new();
    let id = h.controller.enqueue(youtube_track("v", 600_000));
    h.controller.play().await.unwrap();
    advance(Duration::from_secs(10)).await;
    assert_eq!(h.controller.playback().current_queue_id, Some(id.clone()));
    (h, id)
}

fn position_of(calls: &[TransportCall], op: &TransportOp) -> Option<usize> {
    calls.iter().position(|c| c.op == *op)
}

fn volumes(calls: &[TransportCall]) -> Vec<u8> {
    calls
        .iter()
        .filter_map(|c| match c.op {
            TransportOp::SetVolume(v) => Some(v),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn fade_interrupt_delay_resume_trace() {
    let (h, origin) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Dhuhr")]);
    h.youtube.clear_calls();
    let fired = origin.elapsed();

    assert_eq!(scheduler.run_due().await, Some(EntryOutcome::Completed));

    let calls = h.youtube.calls();
    let pause = position_of(&calls, &TransportOp::Pause).expect("music paused");
    let play = position_of(&calls, &TransportOp::Play).expect("music resumed");
    assert!(pause < play);

    // Fade-out: strictly decreasing, ends at 0 by t=5s, then pause
    let fade_out = volumes(&calls[..pause]);
    assert_eq!(fade_out.len(), 20);
    assert!(fade_out.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(fade_out.last(), Some(&0));
    assert!(calls[..pause].iter().all(|c| c.at <= fired + Duration::from_secs(5)));
    assert_eq!(calls[pause].at, fired + Duration::from_secs(5));

    // Interrupt on the local backend
    let local = h.local.ops();
    assert!(local.contains(&TransportOp::Load("adhan".into())));
    assert!(local.contains(&TransportOp::Play));

    // interrupt end (5s + 60s) + 30s delay, resumed in place
    let resume_at = fired + Duration::from_secs(5 + 60 + 30);
    assert!(calls[play].at >= resume_at);
    assert!(calls[play].at < resume_at + Duration::from_secs(1));
    assert!(calls[pause..]
        .iter()
        .all(|c| !matches!(c.op, TransportOp::Load(_) | TransportOp::Seek(_))));

    // Fade-in: starts silent, climbs back to the full level
    let fade_in = volumes(&calls[play..]);
    assert!(volumes(&calls[pause..play]).iter().all(|&v| v == 0));
    assert!(fade_in.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fade_in.last(), Some(&80));

    // 10s before, 5s of fade-out, 5s of fade-in after resuming
    assert!((20_000..21_000).contains(&h.youtube.position_ms()));
    assert_eq!(h.playing(), vec![BackendKind::YouTube]);

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.playback.status, PlaybackStatus::Playing);
    assert_eq!(snapshot.held_by, None);
    assert_eq!(snapshot.mixer.fade_level, 100);

    let entry = &scheduler.entries()[0];
    assert_eq!(entry.phase, EntryPhase::Done);
    assert_eq!(entry.outcome, Some(EntryOutcome::Completed));
}

#[tokio::test(start_paused = true)]
async fn phases_are_published_in_order() {
    let (h, _) = music_playing().await;
    let mut events = h.controller.subscribe();
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Asr")]);

    scheduler.run_due().await;

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let HubEvent::InterruptionChanged { phase, label, .. } = event {
            assert_eq!(label, "Asr");
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![EntryPhase::Firing, EntryPhase::Resolving, EntryPhase::Done]
    );
}

#[tokio::test(start_paused = true)]
async fn immediate_mode_pauses_without_ramp() {
    let (h, origin) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler
        .update_settings(SchedulerSettings {
            fade_mode: FadeMode::Immediate,
            ..SchedulerSettings::default()
        })
        .unwrap();
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Maghrib")]);
    h.youtube.clear_calls();
    let fired = origin.elapsed();

    assert_eq!(scheduler.run_due().await, Some(EntryOutcome::Completed));

    let calls = h.youtube.calls();
    assert_eq!(calls[0].op, TransportOp::Pause);
    assert_eq!(calls[0].at, fired);
    assert_eq!(h.playing(), vec![BackendKind::YouTube]);
    assert_eq!(h.youtube.volume(), 80);
}

// ===== Priority =====

#[tokio::test(start_paused = true)]
async fn user_pause_during_fade_is_applied_after_resolution() {
    let (h, _) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Isha")]);

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(1)).await;

    assert_eq!(h.controller.snapshot().held_by, Some(Actor::Scheduler));
    h.controller.pause().await.unwrap();
    assert!(h.youtube.is_playing());
    assert!(matches!(
        h.controller.next().await,
        Err(PlaybackError::ChannelHeld(_))
    ));

    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Completed));

    assert!(h.playing().is_empty());
    assert_eq!(h.controller.playback().status, PlaybackStatus::Paused);
    let plays = h
        .youtube
        .ops()
        .into_iter()
        .filter(|op| *op == TransportOp::Play)
        .count();
    assert_eq!(plays, 1);
}

#[tokio::test(start_paused = true)]
async fn clearing_queue_during_interruption_cancels_resume() {
    let (h, _) = queued_music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Maghrib")]);

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(1)).await;
    assert_eq!(h.controller.snapshot().held_by, Some(Actor::Scheduler));

    h.controller.clear().await;
    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Completed));
    advance(Duration::from_secs(5)).await;

    assert!(h.playing().is_empty());
    let playback = h.controller.playback();
    assert_eq!(playback.status, PlaybackStatus::Idle);
    assert!(playback.current_track.is_none());
    assert_eq!(h.controller.snapshot().held_by, None);
}

#[tokio::test(start_paused = true)]
async fn clearing_during_interruption_also_stops_direct_playback() {
    let (h, _) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Asr")]);

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(1)).await;

    h.controller.clear().await;
    assert!(h.youtube.is_playing());
    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Completed));
    advance(Duration::from_secs(5)).await;

    assert!(h.playing().is_empty());
    let playback = h.controller.playback();
    assert_eq!(playback.status, PlaybackStatus::Idle);
    assert!(playback.current_track.is_none());
}

#[tokio::test(start_paused = true)]
async fn removing_playing_entry_during_interruption_cancels_resume() {
    let (h, id) = queued_music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Isha")]);

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(1)).await;

    h.controller.remove(&id).await.unwrap();
    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Completed));
    advance(Duration::from_secs(5)).await;

    assert!(h.playing().is_empty());
    assert_eq!(h.controller.playback().status, PlaybackStatus::Idle);
    let plays = h
        .youtube
        .ops()
        .into_iter()
        .filter(|op| *op == TransportOp::Play)
        .count();
    assert_eq!(plays, 1);
}

#[tokio::test(start_paused = true)]
async fn user_play_during_silence_waits_for_post_delay() {
    let (h, origin) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler
        .update_settings(SchedulerSettings {
            post_action: PostAction::Silence,
            ..SchedulerSettings::default()
        })
        .unwrap();
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Fajr")]);
    h.youtube.clear_calls();
    let fired = origin.elapsed();

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(70)).await;

    assert_eq!(scheduler.entries()[0].phase, EntryPhase::Resolving);
    h.controller.play().await.unwrap();
    assert!(h.playing().is_empty());

    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Completed));

    assert_eq!(h.playing(), vec![BackendKind::YouTube]);
    let calls = h.youtube.calls();
    let play = calls
        .iter()
        .find(|c| c.op == TransportOp::Play)
        .expect("deferred play applied");
    assert!(play.at >= fired + Duration::from_secs(95));
    assert_eq!(h.store.get("scheduler.post_action"), Some("silence".to_string()));
}

// ===== Post-actions and failures =====

#[tokio::test(start_paused = true)]
async fn alternate_content_replaces_music() {
    let (h, _) = music_playing().await;
    let library = PayloadLibrary {
        alternate: Some(spotify_track("quran", 900_000)),
        ..adhan_library(ADHAN_MS)
    };
    let (scheduler, _clock) = h.scheduler(library);
    scheduler
        .update_settings(SchedulerSettings {
            post_action: PostAction::PlayAlternate,
            ..SchedulerSettings::default()
        })
        .unwrap();
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Dhuhr")]);

    assert_eq!(scheduler.run_due().await, Some(EntryOutcome::Completed));

    assert_eq!(h.playing(), vec![BackendKind::Spotify]);
    let state = h.controller.playback();
    assert_eq!(state.current_track.map(|t| t.id), Some("quran".to_string()));
    assert_eq!(state.current_queue_id, None);
}

#[tokio::test(start_paused = true)]
async fn announcement_plays_before_main_audio() {
    let h = Harness::new();
    let mut library = adhan_library(ADHAN_MS);
    library.set_announcement("Fajr", local_track("announce", 5_000));
    let (scheduler, _clock) = h.scheduler(library);
    scheduler
        .update_settings(SchedulerSettings {
            announcement_enabled: true,
            ..SchedulerSettings::default()
        })
        .unwrap();
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "fajr")]);

    assert_eq!(scheduler.run_due().await, Some(EntryOutcome::Completed));

    let loads: Vec<TransportOp> = h
        .local
        .ops()
        .into_iter()
        .filter(|op| matches!(op, TransportOp::Load(_)))
        .collect();
    assert_eq!(
        loads,
        vec![
            TransportOp::Load("announce".into()),
            TransportOp::Load("adhan".into())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_interrupt_skips_straight_to_post_action() {
    let (h, origin) = music_playing().await;
    h.local.mark_unplayable("/audio/adhan.mp3");
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Asr")]);
    let fired = origin.elapsed();

    let outcome = scheduler.run_due().await;

    assert!(matches!(outcome, Some(EntryOutcome::Failed(_))));
    assert_eq!(h.playing(), vec![BackendKind::YouTube]);
    assert_eq!(h.controller.snapshot().held_by, None);
    // fade-out and fade-in only, no post-action delay
    assert!(origin.elapsed() < fired + Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn stop_current_cuts_interrupt_and_resumes() {
    let (h, _) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Isha")]);

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(20)).await;
    assert!(h.local.is_playing());

    assert!(scheduler.stop_current());
    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Cancelled));

    assert_eq!(h.playing(), vec![BackendKind::YouTube]);
    assert!(!scheduler.stop_current());
}

#[tokio::test(start_paused = true)]
async fn missing_payload_leaves_music_alone() {
    let (h, _) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(PayloadLibrary::default());
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Dhuhr")]);
    h.youtube.clear_calls();

    assert_eq!(scheduler.run_due().await, Some(EntryOutcome::NoPayload));

    assert!(h.youtube.ops().is_empty());
    assert_eq!(h.playing(), vec![BackendKind::YouTube]);
}

// ===== Timing =====

#[tokio::test(start_paused = true)]
async fn stale_entries_are_missed_not_played_late() {
    let h = Harness::new();
    let (scheduler, clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Fajr")]);
    clock.advance(10 * 60 * 1000);

    assert_eq!(scheduler.run_due().await, None);

    let entry = &scheduler.entries()[0];
    assert_eq!(entry.phase, EntryPhase::Done);
    assert_eq!(entry.outcome, Some(EntryOutcome::Missed));
    assert!(h.local.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn done_entries_never_fire_again() {
    let h = Harness::new();
    let (scheduler, clock) = h.scheduler(adhan_library(ADHAN_MS));
    let triggers = vec![PrayerTrigger::new(EPOCH_MS, "Maghrib")];
    scheduler.set_triggers(triggers.clone());
    assert_eq!(scheduler.run_due().await, Some(EntryOutcome::Completed));

    clock.set(EPOCH_MS - 60_000);
    scheduler.set_triggers(triggers);
    clock.set(EPOCH_MS + 1_000);

    assert!(scheduler.tick().is_empty());
    assert_eq!(scheduler.run_due().await, None);
    assert_eq!(scheduler.entries()[0].phase, EntryPhase::Done);
}

#[tokio::test(start_paused = true)]
async fn lead_time_fires_early() {
    let h = Harness::new();
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler
        .update_settings(SchedulerSettings {
            lead_time_sec: 60,
            ..SchedulerSettings::default()
        })
        .unwrap();
    scheduler.set_triggers(vec![
        PrayerTrigger::new(EPOCH_MS + 30_000, "Dhuhr"),
        PrayerTrigger::new(EPOCH_MS + 120_000, "Asr"),
    ]);

    let due = scheduler.tick();

    assert_eq!(due, vec![format!("dhuhr@{}", EPOCH_MS + 30_000)]);
}

#[tokio::test(start_paused = true)]
async fn disabled_scheduler_skips_due_entries() {
    let h = Harness::new();
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler
        .update_settings(SchedulerSettings {
            enabled: false,
            ..SchedulerSettings::default()
        })
        .unwrap();
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Isha")]);

    assert_eq!(scheduler.run_due().await, None);
    assert_eq!(
        scheduler.entries()[0].outcome,
        Some(EntryOutcome::Disabled)
    );
}

#[tokio::test(start_paused = true)]
async fn due_entries_queue_instead_of_overlapping() {
    let h = Harness::new();
    let mut events = h.controller.subscribe();
    let (scheduler, clock) = h.scheduler(adhan_library(ADHAN_MS));
    scheduler.set_triggers(vec![
        PrayerTrigger::new(EPOCH_MS, "Dhuhr"),
        PrayerTrigger::new(EPOCH_MS + 1_000, "Asr"),
    ]);
    clock.set(EPOCH_MS + 2_000);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        scheduler
            .clone()
            .run(Duration::from_millis(500), shutdown.clone()),
    );
    advance(Duration::from_secs(240)).await;
    shutdown.cancel();
    handle.await.unwrap();

    let entries = scheduler.entries();
    assert!(entries
        .iter()
        .all(|e| e.outcome == Some(EntryOutcome::Completed)));

    let mut timeline = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let HubEvent::InterruptionChanged { label, phase, .. } = event {
            timeline.push((label, phase));
        }
    }
    let dhuhr_done = timeline
        .iter()
        .position(|e| *e == ("Dhuhr".to_string(), EntryPhase::Done))
        .unwrap();
    let asr_firing = timeline
        .iter()
        .position(|e| *e == ("Asr".to_string(), EntryPhase::Firing))
        .unwrap();
    assert!(dhuhr_done < asr_firing);
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_runs_immediately() {
    let (h, _) = music_playing().await;
    let (scheduler, _clock) = h.scheduler(adhan_library(ADHAN_MS));

    assert_eq!(
        scheduler.trigger_now("Jumuah").await,
        Ok(EntryOutcome::Completed)
    );
    assert_eq!(h.playing(), vec![BackendKind::YouTube]);
    assert!(scheduler.entries()[0].id.ends_with("#manual"));
}
