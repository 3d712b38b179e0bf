//! Prayer schedule file
//!
//! Prayer times are computed elsewhere and dropped into a JSON file:
//!
//! ```json
//! {
//!   "prayers": [
//!     { "label": "Fajr", "at": "2024-01-01T05:12:00+03:00" },
//!     { "label": "Dhuhr", "at": "2024-01-01T12:04:00+03:00" }
//!   ],
//!   "audio": {
//!     "default": { "file": "adhan.mp3", "duration_sec": 180 },
//!     "by_label": { "fajr": { "file": "adhan-fajr.mp3", "duration_sec": 210 } },
//!     "announcements": {},
//!     "alternate": null
//!   }
//! }
//! ```

use crate::error::{HubError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use minaret_core::Track;
use minaret_playback::{PayloadLibrary, PrayerTrigger, SchedulerSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(default)]
    pub prayers: Vec<PrayerTime>,

    #[serde(default)]
    pub audio: AudioFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrayerTime {
    pub label: String,
    pub at: DateTime<FixedOffset>,

    /// Overrides the library for this one prayer
    #[serde(default)]
    pub audio: Option<AudioClip>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFiles {
    #[serde(default)]
    pub default: Option<AudioClip>,

    #[serde(default)]
    pub by_label: BTreeMap<String, AudioClip>,

    #[serde(default)]
    pub announcements: BTreeMap<String, AudioClip>,

    #[serde(default)]
    pub alternate: Option<AudioClip>,
}

/// A local audio file, relative to the audio directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    pub file: String,

    /// Unknown durations fall back to the scheduler's safety timeout
    #[serde(default)]
    pub duration_sec: Option<u64>,
}

impl AudioClip {
    fn to_track(&self, audio_dir: &Path) -> Track {
        let path = audio_dir.join(&self.file);
        let id = Path::new(&self.file)
            .file_stem()
            .map_or_else(|| self.file.clone(), |s| s.to_string_lossy().into_owned());
        Track::local(
            id.clone(),
            id,
            "",
            path.to_string_lossy().into_owned(),
            self.duration_sec.unwrap_or(0) * 1000,
        )
    }
}

impl ScheduleFile {
    /// Read and parse a schedule file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HubError::Schedule(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Parse schedule JSON
    pub fn parse(raw: &str) -> Result<Self> {
        let schedule: Self = serde_json::from_str(raw)?;
        if let Some(prayer) = schedule.prayers.iter().find(|p| p.label.trim().is_empty()) {
            return Err(HubError::Schedule(format!(
                "prayer at {} has an empty label",
                prayer.at
            )));
        }
        Ok(schedule)
    }

    /// Scheduler triggers, one per prayer
    pub fn triggers(&self, audio_dir: &Path) -> Vec<PrayerTrigger> {
        self.prayers
            .iter()
            .map(|prayer| {
                let mut trigger =
                    PrayerTrigger::new(prayer.at.timestamp_millis(), prayer.label.clone());
                trigger.payload = prayer.audio.as_ref().map(|clip| clip.to_track(audio_dir));
                trigger
            })
            .collect()
    }

    /// Payload library built from the audio section
    pub fn library(&self, audio_dir: &Path) -> PayloadLibrary {
        let mut library = PayloadLibrary {
            default: self.audio.default.as_ref().map(|c| c.to_track(audio_dir)),
            alternate: self.audio.alternate.as_ref().map(|c| c.to_track(audio_dir)),
            ..PayloadLibrary::default()
        };
        for (label, clip) in &self.audio.by_label {
            library.set_label(label, clip.to_track(audio_dir));
        }
        for (label, clip) in &self.audio.announcements {
            library.set_announcement(label, clip.to_track(audio_dir));
        }
        library
    }

    /// Prayers whose fire time (trigger minus lead time) is still ahead
    pub fn upcoming(&self, now: DateTime<Utc>, settings: &SchedulerSettings) -> Vec<UpcomingPrayer> {
        let lead_ms = (settings.lead_time_sec as i64) * 1000;
        let mut upcoming: Vec<UpcomingPrayer> = self
            .prayers
            .iter()
            .filter(|p| p.at.timestamp_millis() - lead_ms > now.timestamp_millis())
            .map(|p| UpcomingPrayer {
                label: p.label.clone(),
                at: p.at,
                fires_at_epoch_ms: p.at.timestamp_millis() - lead_ms,
            })
            .collect();
        upcoming.sort_by_key(|p| p.fires_at_epoch_ms);
        upcoming
    }
}

/// One line of the `schedule` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingPrayer {
    pub label: String,
    pub at: DateTime<FixedOffset>,
    pub fires_at_epoch_ms: i64,
}
