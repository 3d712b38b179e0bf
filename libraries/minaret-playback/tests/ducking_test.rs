//! Ducking engine against a live controller

mod common;

use common::{adhan_library, advance, youtube_track, Harness, EPOCH_MS};
use minaret_core::{BackendKind, SettingsStore};
use minaret_playback::{
    Channel, DuckingEngine, DuckingSettings, EntryOutcome, HubEvent, PrayerTrigger,
};
use std::sync::Arc;
use std::time::Duration;

fn engine(h: &Harness) -> DuckingEngine {
    let store: Arc<dyn SettingsStore> = h.store.clone();
    DuckingEngine::new(Arc::clone(&h.controller), Some(store))
}

async fn youtube_at_gain(h: &Harness, gain: u8) {
    h.controller
        .play_track(youtube_track("khutbah", 1_800_000))
        .await
        .unwrap();
    h.controller
        .set_channel_gain(Channel::Music, gain)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn live_signal_ducks_and_restores_music() {
    let h = Harness::new();
    youtube_at_gain(&h, 70).await;
    assert_eq!(h.youtube.volume(), 56);
    let ducking = engine(&h);

    ducking.set_signal(true).await;
    assert_eq!(h.youtube.volume(), 11);
    assert!(ducking.is_active());
    assert!(h.youtube.is_playing());

    ducking.set_signal(false).await;
    assert_eq!(h.youtube.volume(), 56);
    assert_eq!(h.store.get("mixer.music"), Some("70".to_string()));
    assert_eq!(h.controller.snapshot().mixer.duck_level, None);
}

#[tokio::test(start_paused = true)]
async fn repeated_signal_is_ignored() {
    let h = Harness::new();
    youtube_at_gain(&h, 100).await;
    let ducking = engine(&h);

    ducking.set_signal(true).await;
    h.youtube.clear_calls();
    ducking.set_signal(true).await;

    assert!(h.youtube.ops().is_empty());
    assert_eq!(h.youtube.volume(), 16);
}

#[tokio::test(start_paused = true)]
async fn disabled_ducking_tracks_signal_without_overlay() {
    let h = Harness::new();
    youtube_at_gain(&h, 100).await;
    let ducking = engine(&h);
    ducking
        .update_settings(DuckingSettings {
            enabled: false,
            duck_level: 20,
        })
        .await
        .unwrap();

    ducking.set_signal(true).await;

    assert!(ducking.signal());
    assert!(!ducking.is_active());
    assert_eq!(h.youtube.volume(), 80);
    assert_eq!(h.store.get("ducking.enabled"), Some("false".to_string()));
}

#[tokio::test(start_paused = true)]
async fn level_change_while_ducked_applies_at_once() {
    let h = Harness::new();
    youtube_at_gain(&h, 100).await;
    let ducking = engine(&h);
    ducking.set_signal(true).await;

    ducking
        .update_settings(DuckingSettings {
            enabled: true,
            duck_level: 50,
        })
        .await
        .unwrap();

    assert_eq!(h.youtube.volume(), 40);
    let reloaded = engine(&h);
    assert_eq!(reloaded.settings().duck_level, 50);
}

#[tokio::test(start_paused = true)]
async fn input_level_is_published() {
    let h = Harness::new();
    let mut events = h.controller.subscribe();
    let ducking = engine(&h);

    ducking.set_input_level(250);

    let event = events.try_recv().unwrap();
    assert_eq!(
        event,
        HubEvent::DuckingChanged {
            active: false,
            input_level: 100
        }
    );
}

#[tokio::test(start_paused = true)]
async fn interruption_audio_is_not_ducked() {
    let h = Harness::new();
    let ducking = engine(&h);
    ducking.set_signal(true).await;
    let (scheduler, _clock) = h.scheduler(adhan_library(60_000));
    scheduler.set_triggers(vec![PrayerTrigger::new(EPOCH_MS, "Dhuhr")]);

    let runner = scheduler.clone();
    let run = tokio::spawn(async move { runner.run_due().await });
    advance(Duration::from_secs(10)).await;

    assert_eq!(h.playing(), vec![BackendKind::Local]);
    assert_eq!(h.local.volume(), 80);

    scheduler.stop_current();
    assert_eq!(run.await.unwrap(), Some(EntryOutcome::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_signal_changes_leave_mixer_consistent() {
    let h = Harness::new();
    let ducking = Arc::new(engine(&h));

    for round in 0..20 {
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let ducking = Arc::clone(&ducking);
                tokio::spawn(async move { ducking.set_signal((i + round) % 2 == 0).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let applied = h.controller.snapshot().mixer.duck_level;
        assert_eq!(applied.is_some(), ducking.is_active(), "round {round}");
    }
}
