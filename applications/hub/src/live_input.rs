//! Live-broadcast input lines
//!
//! The PA desk (or a GPIO watcher in front of it) reports the microphone
//! state as one command per line:
//!
//! ```text
//! on          microphone went live
//! off         microphone released
//! level 42    advisory input meter, 0-100
//! ```

use crate::error::{HubError, Result};
use std::str::FromStr;

/// One report from the live-broadcast source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveInput {
    /// Live signal raised or cleared
    Signal(bool),
    /// Microphone input level
    Level(u8),
}

impl FromStr for LiveInput {
    type Err = HubError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let input = match command.as_str() {
            "on" | "live" => LiveInput::Signal(true),
            "off" | "idle" => LiveInput::Signal(false),
            "level" => {
                let raw = words
                    .next()
                    .ok_or_else(|| HubError::LiveInput("level needs a value".to_string()))?;
                let level: u8 = raw
                    .parse()
                    .map_err(|_| HubError::LiveInput(format!("bad level {raw:?}")))?;
                LiveInput::Level(level.min(100))
            }
            "" => return Err(HubError::LiveInput("empty line".to_string())),
            other => return Err(HubError::LiveInput(format!("unknown command {other:?}"))),
        };
        if let Some(extra) = words.next() {
            return Err(HubError::LiveInput(format!("unexpected {extra:?}")));
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("on".parse::<LiveInput>().unwrap(), LiveInput::Signal(true));
        assert_eq!(" OFF ".parse::<LiveInput>().unwrap(), LiveInput::Signal(false));
        assert_eq!("level 42".parse::<LiveInput>().unwrap(), LiveInput::Level(42));
        assert_eq!("level 180".parse::<LiveInput>().unwrap(), LiveInput::Level(100));
    }

    #[test]
    fn rejects_garbage() {
        for line in ["", "level", "level loud", "on now", "mute"] {
            assert!(
                matches!(line.parse::<LiveInput>(), Err(HubError::LiveInput(_))),
                "{line:?}"
            );
        }
    }
}
