//! TOML settings store

mod common;

use common::{temp_dir, write_file};
use minaret_core::SettingsStore;
use minaret_hub::{HubError, TomlSettingsStore};
use minaret_playback::{ChannelGains, FadeMode, PostAction, SchedulerSettings};

#[test]
fn missing_file_starts_empty() {
    let dir = temp_dir();
    let store = TomlSettingsStore::open(dir.path().join("settings.toml")).unwrap();

    assert_eq!(store.get("mixer.music"), None);
    assert!(!store.path().exists());
}

#[test]
fn flush_persists_across_reopen() {
    let dir = temp_dir();
    let path = dir.path().join("nested").join("settings.toml");

    let store = TomlSettingsStore::open(&path).unwrap();
    let settings = SchedulerSettings {
        fade_mode: FadeMode::Immediate,
        post_action: PostAction::Silence,
        lead_time_sec: 45,
        ..SchedulerSettings::default()
    };
    settings.save(&store).unwrap();

    let reopened = TomlSettingsStore::open(&path).unwrap();
    let loaded = SchedulerSettings::load(&reopened);

    assert_eq!(loaded, settings);
}

#[test]
fn hand_edited_file_is_read() {
    let dir = temp_dir();
    let path = write_file(
        dir.path(),
        "settings.toml",
        "\"mixer.music\" = 70\n\"mixer.pa\" = \"55\"\n",
    );

    let store = TomlSettingsStore::open(&path).unwrap();
    let gains = ChannelGains::load(&store);

    assert_eq!(store.get("mixer.music"), Some("70".to_string()));
    assert_eq!(gains, {
        let mut expected = ChannelGains::default();
        expected.set(minaret_playback::Channel::Music, 70);
        expected.set(minaret_playback::Channel::Pa, 55);
        expected
    });
}

#[test]
fn malformed_file_is_rejected() {
    let dir = temp_dir();
    let path = write_file(dir.path(), "settings.toml", "this is = = not toml");

    let result = TomlSettingsStore::open(&path);

    assert!(matches!(result, Err(HubError::Settings(_))));
}
