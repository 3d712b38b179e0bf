/// Track domain type
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Playback backend a track belongs to
///
/// Closed set: every dispatch on a backend goes through this enum, never
/// through free-form source strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local file player
    Local,
    /// Spotify Web Playback SDK / Connect API
    Spotify,
    /// Embedded YouTube player element
    YouTube,
    /// SoundCloud streaming API
    SoundCloud,
}

impl BackendKind {
    /// All four backends, in dispatch order
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Local,
        BackendKind::Spotify,
        BackendKind::YouTube,
        BackendKind::SoundCloud,
    ];

    /// Whether commands travel over a rate-limited network API
    ///
    /// Remote backends get debounced volume writes and polled status.
    /// Locally rendered backends apply volume immediately and push events.
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Spotify | Self::SoundCloud)
    }

    /// Position of this backend in [`BackendKind::ALL`]
    pub fn index(self) -> usize {
        match self {
            Self::Local => 0,
            Self::Spotify => 1,
            Self::YouTube => 2,
            Self::SoundCloud => 3,
        }
    }

    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Spotify => "spotify",
            Self::YouTube => "youtube",
            Self::SoundCloud => "soundcloud",
        }
    }

    /// Parse from string
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "spotify" => Some(Self::Spotify),
            "youtube" => Some(Self::YouTube),
            "soundcloud" => Some(Self::SoundCloud),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Playable track
///
/// Immutable once enqueued. The same title/artist on two backends are two
/// distinct tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Opaque track identifier
    pub id: String,

    /// Track title
    pub title: String,

    /// Artist name
    pub artist: String,

    /// Artwork URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,

    /// Track duration in milliseconds (0 when unknown)
    pub duration_ms: u64,

    /// Backend that plays this track
    pub source: BackendKind,

    /// Backend-native identifier (URI, video id, stream id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// File URL, only for local tracks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_url: Option<String>,
}

impl Track {
    /// Create a local file track
    pub fn local(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        url: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album_art: None,
            duration_ms,
            source: BackendKind::Local,
            external_id: None,
            local_url: Some(url.into()),
        }
    }

    /// Create a track played by a streaming or embedded backend
    pub fn remote(
        source: BackendKind,
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        external_id: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album_art: None,
            duration_ms,
            source,
            external_id: Some(external_id.into()),
            local_url: None,
        }
    }

    /// Reference the backend needs to resolve this track
    ///
    /// Local tracks resolve through `local_url`, every other backend through
    /// `external_id`.
    pub fn native_ref(&self) -> Option<&str> {
        match self.source {
            BackendKind::Local => self.local_url.as_deref(),
            _ => self.external_id.as_deref(),
        }
    }

    /// Get the track duration, if known
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_ms > 0).then(|| Duration::from_millis(self.duration_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_split() {
        assert!(!BackendKind::Local.is_remote());
        assert!(BackendKind::Spotify.is_remote());
        assert!(!BackendKind::YouTube.is_remote());
        assert!(BackendKind::SoundCloud.is_remote());
    }

    #[test]
    fn index_matches_all_order() {
        for (i, kind) in BackendKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn string_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(BackendKind::from_str("tidal"), None);
    }

    #[test]
    fn native_ref_by_source() {
        let local = Track::local("1", "Adhan", "Muezzin", "/audio/adhan.mp3", 1000);
        assert_eq!(local.native_ref(), Some("/audio/adhan.mp3"));

        let yt = Track::remote(BackendKind::YouTube, "2", "Talk", "Imam", "dQw4w9WgXcQ", 0);
        assert_eq!(yt.native_ref(), Some("dQw4w9WgXcQ"));
        assert_eq!(yt.duration(), None);
    }

    #[test]
    fn serde_lowercase_source() {
        let track = Track::local("1", "A", "B", "/a.mp3", 10);
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["source"], "local");
        assert!(json.get("external_id").is_none());
    }
}
