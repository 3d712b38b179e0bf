//! Minaret Core
//!
//! Platform-agnostic domain types, error taxonomy and persistence port for the
//! Minaret playback hub.
//!
//! This crate provides the foundational building blocks shared by the
//! playback core and the hub application.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Domain Types**: `Track`, `BackendKind`, `QueueId`
//! - **Error Handling**: Unified `PlaybackError`, `ErrorKind` and `Result` types
//! - **Ports**: `SettingsStore` (flat key/value persistence) and `Clock`
//!   (wall-clock time source)
//!
//! # Example
//!
//! ```rust
//! use minaret_core::{BackendKind, Track};
//!
//! let track = Track::local("adhan-fajr", "Fajr Adhan", "Muezzin", "/audio/fajr.mp3", 180_000);
//! assert_eq!(track.source, BackendKind::Local);
//! assert!(!track.source.is_remote());
//!
//! let stream = Track::remote(BackendKind::Spotify, "sp-1", "Nasheed", "Artist", "spotify:track:42", 200_000);
//! assert!(stream.source.is_remote());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, PlaybackError, Result};
pub use settings::{MemorySettingsStore, SettingsStore};
pub use types::{BackendKind, QueueId, Track};
