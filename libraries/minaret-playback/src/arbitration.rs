//! Command arbitration between the user, the ducking engine and the scheduler
//!
//! While a higher-priority actor holds the playback channel, lower-priority
//! play/pause intents are not executed. The most recent one is remembered and
//! handed back when the hold is released (last intent wins).

use minaret_core::Track;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who issued a command, lowest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// Interactive user
    User,
    /// Ducking engine
    Ducking,
    /// Interruption scheduler
    Scheduler,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Actor::User => "user",
            Actor::Ducking => "ducking",
            Actor::Scheduler => "scheduler",
        };
        f.write_str(name)
    }
}

/// Proof of holding the playback channel
///
/// Not `Clone`: exactly one holder can release a hold.
#[derive(Debug, PartialEq, Eq)]
pub struct HoldToken {
    actor: Actor,
    id: u64,
}

impl HoldToken {
    /// Actor that owns the hold
    pub fn actor(&self) -> Actor {
        self.actor
    }
}

/// Transport intent deferred while the channel is held
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Resume the current track
    Play,
    /// Start a specific track
    PlayTrack(Track),
    /// Pause
    Pause,
    /// Go idle; the track that was playing left the queue
    Stop,
}

/// Hold bookkeeping
#[derive(Debug, Default)]
pub struct Arbiter {
    holder: Option<(Actor, u64)>,
    next_id: u64,
    pending: Option<Intent>,
}

impl Arbiter {
    /// Create an arbiter with nobody holding the channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the channel
    ///
    /// Succeeds when the channel is free or held by a lower-priority actor,
    /// in which case the old token becomes void.
    pub fn acquire(&mut self, actor: Actor) -> Option<HoldToken> {
        if let Some((holder, _)) = self.holder {
            if holder >= actor {
                return None;
            }
        }
        self.next_id += 1;
        self.holder = Some((actor, self.next_id));
        Some(HoldToken {
            actor,
            id: self.next_id,
        })
    }

    /// Release a hold, returning the intent deferred meanwhile
    ///
    /// A void token releases nothing.
    pub fn release(&mut self, token: HoldToken) -> Option<Intent> {
        if self.holds(&token) {
            self.holder = None;
            self.pending.take()
        } else {
            None
        }
    }

    /// Whether `token` is the live hold
    pub fn holds(&self, token: &HoldToken) -> bool {
        self.holder == Some((token.actor, token.id))
    }

    /// Whether a command from `actor` must be deferred
    pub fn blocks(&self, actor: Actor) -> bool {
        self.holder.is_some_and(|(holder, _)| holder > actor)
    }

    /// Current holder
    pub fn holder(&self) -> Option<Actor> {
        self.holder.map(|(actor, _)| actor)
    }

    /// Remember an intent, replacing any earlier one
    pub fn defer(&mut self, intent: Intent) {
        self.pending = Some(intent);
    }

    /// Intent waiting for release
    pub fn pending(&self) -> Option<&Intent> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        assert!(Actor::Scheduler > Actor::Ducking);
        assert!(Actor::Ducking > Actor::User);
    }

    #[test]
    fn scheduler_hold_blocks_user_and_ducking() {
        let mut arbiter = Arbiter::new();
        let token = arbiter.acquire(Actor::Scheduler).unwrap();

        assert!(arbiter.blocks(Actor::User));
        assert!(arbiter.blocks(Actor::Ducking));
        assert!(!arbiter.blocks(Actor::Scheduler));
        assert!(arbiter.acquire(Actor::Ducking).is_none());

        assert_eq!(arbiter.release(token), None);
        assert!(!arbiter.blocks(Actor::User));
    }

    #[test]
    fn last_deferred_intent_wins() {
        let mut arbiter = Arbiter::new();
        let token = arbiter.acquire(Actor::Scheduler).unwrap();

        arbiter.defer(Intent::Play);
        arbiter.defer(Intent::Pause);

        assert_eq!(arbiter.release(token), Some(Intent::Pause));
        assert_eq!(arbiter.pending(), None);
    }

    #[test]
    fn higher_priority_preempts_and_voids_old_token() {
        let mut arbiter = Arbiter::new();
        let ducking = arbiter.acquire(Actor::Ducking).unwrap();
        let scheduler = arbiter.acquire(Actor::Scheduler).unwrap();

        assert!(!arbiter.holds(&ducking));
        assert_eq!(arbiter.release(ducking), None);
        assert_eq!(arbiter.holder(), Some(Actor::Scheduler));

        arbiter.release(scheduler);
        assert_eq!(arbiter.holder(), None);
    }
}
