//! Channel mixer
//!
//! Three logical channels share one master volume. Each backend receives a
//! single 0-100 value computed as:
//!
//! ```text
//! base      = round(master * channel_gain / 100)
//! music     = base * duck_level% * fade_level%   (overlays, music only)
//! effective = 0 when muted
//! ```
//!
//! Overlays never touch the stored gains, so removing them restores the
//! exact pre-overlay value.

use minaret_core::settings::{read_or, write};
use minaret_core::{Result, SettingsStore};
use serde::{Deserialize, Serialize};

/// Logical audio channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Background music from any backend
    Music,

    /// Scheduled interruption audio (Azan, announcements)
    Interrupt,

    /// Live public-address input
    Pa,
}

impl Channel {
    /// All channels
    pub const ALL: [Channel; 3] = [Channel::Music, Channel::Interrupt, Channel::Pa];

    /// Settings key for this channel's gain
    pub fn settings_key(self) -> &'static str {
        match self {
            Self::Music => "mixer.music",
            Self::Interrupt => "mixer.interrupt",
            Self::Pa => "mixer.pa",
        }
    }
}

/// Per-channel gains (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGains {
    /// Music gain
    pub music: u8,
    /// Interrupt gain
    pub interrupt: u8,
    /// PA gain
    pub pa: u8,
}

impl Default for ChannelGains {
    fn default() -> Self {
        Self {
            music: 100,
            interrupt: 100,
            pa: 100,
        }
    }
}

impl ChannelGains {
    /// Gain of one channel
    pub fn get(&self, channel: Channel) -> u8 {
        match channel {
            Channel::Music => self.music,
            Channel::Interrupt => self.interrupt,
            Channel::Pa => self.pa,
        }
    }

    /// Set one channel's gain, clamped to 100
    pub fn set(&mut self, channel: Channel, gain: u8) {
        let gain = gain.min(100);
        match channel {
            Channel::Music => self.music = gain,
            Channel::Interrupt => self.interrupt = gain,
            Channel::Pa => self.pa = gain,
        }
    }

    /// Read persisted gains, defaulting missing or malformed keys to 100
    pub fn load(store: &dyn SettingsStore) -> Self {
        let mut gains = Self::default();
        for channel in Channel::ALL {
            let value: u8 = read_or(store, channel.settings_key(), 100);
            gains.set(channel, value);
        }
        gains
    }

    /// Persist all gains
    pub fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        for channel in Channel::ALL {
            write(store, channel.settings_key(), &self.get(channel))?;
        }
        store.flush()
    }
}

/// Scale a master volume by a channel gain
pub fn channel_volume(master: u8, gain: u8) -> u8 {
    let value = (f32::from(master.min(100)) * f32::from(gain.min(100)) / 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

/// Mixer state: stored gains plus transient overlays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mixer {
    gains: ChannelGains,

    /// Ducking overlay on the music channel (percent of base)
    duck_level: Option<u8>,

    /// Scheduler fade overlay on the music channel (100 = no fade)
    fade_level: u8,
}

impl Mixer {
    /// Create a mixer with the given gains and no overlays
    pub fn new(gains: ChannelGains) -> Self {
        Self {
            gains,
            duck_level: None,
            fade_level: 100,
        }
    }

    /// Create a mixer from persisted gains
    pub fn load(store: &dyn SettingsStore) -> Self {
        Self::new(ChannelGains::load(store))
    }

    /// Stored gains
    pub fn gains(&self) -> ChannelGains {
        self.gains
    }

    /// Set one channel's gain; returns the clamped value
    pub fn set_gain(&mut self, channel: Channel, gain: u8) -> u8 {
        self.gains.set(channel, gain);
        self.gains.get(channel)
    }

    /// Apply or remove the ducking overlay
    pub fn set_duck(&mut self, level: Option<u8>) {
        self.duck_level = level.map(|l| l.min(100));
    }

    /// Current ducking overlay
    pub fn duck_level(&self) -> Option<u8> {
        self.duck_level
    }

    /// Set the scheduler fade overlay
    pub fn set_fade_level(&mut self, level: u8) {
        self.fade_level = level.min(100);
    }

    /// Current fade overlay
    pub fn fade_level(&self) -> u8 {
        self.fade_level
    }

    /// Volume a backend on `channel` should receive
    pub fn effective_volume(&self, master: u8, muted: bool, channel: Channel) -> u8 {
        if muted {
            return 0;
        }
        let base = channel_volume(master, self.gains.get(channel));
        if channel != Channel::Music {
            return base;
        }

        let duck = f32::from(self.duck_level.unwrap_or(100)) / 100.0;
        let fade = f32::from(self.fade_level) / 100.0;
        (f32::from(base) * duck * fade).round().clamp(0.0, 100.0) as u8
    }

    /// Serializable view including effective values
    pub fn snapshot(&self, master: u8, muted: bool) -> MixerSnapshot {
        MixerSnapshot {
            gains: self.gains,
            duck_level: self.duck_level,
            fade_level: self.fade_level,
            effective_music: self.effective_volume(master, muted, Channel::Music),
            effective_interrupt: self.effective_volume(master, muted, Channel::Interrupt),
            effective_pa: self.effective_volume(master, muted, Channel::Pa),
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new(ChannelGains::default())
    }
}

/// Mixer view published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerSnapshot {
    /// Stored gains
    pub gains: ChannelGains,
    /// Ducking overlay, if active
    pub duck_level: Option<u8>,
    /// Scheduler fade overlay
    pub fade_level: u8,
    /// Effective music volume
    pub effective_music: u8,
    /// Effective interrupt volume
    pub effective_interrupt: u8,
    /// Effective PA volume
    pub effective_pa: u8,
}
