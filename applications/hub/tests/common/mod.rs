//! Common test utilities and fixtures
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Schedule with two prayers and a default adhan
pub const SCHEDULE_JSON: &str = r#"{
  "prayers": [
    { "label": "Dhuhr", "at": "2024-01-01T12:04:00+03:00" },
    { "label": "Fajr", "at": "2024-01-01T05:12:00+03:00",
      "audio": { "file": "adhan-fajr.mp3", "duration_sec": 210 } }
  ],
  "audio": {
    "default": { "file": "adhan.mp3", "duration_sec": 60 },
    "by_label": { "Asr": { "file": "adhan-asr.mp3", "duration_sec": 90 } },
    "announcements": { "jumuah": { "file": "jumuah-intro.mp3", "duration_sec": 10 } }
  }
}"#;

/// Write `contents` to `name` inside `dir`
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

/// Temporary directory for one test
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("create temp dir")
}
