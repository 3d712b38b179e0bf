//! Play queue
//!
//! Entries are stored in insertion order and never reordered. Navigation
//! walks a traversal permutation over storage indices (identity, or a
//! shuffled order with the current entry first), with two detours:
//!
//! ```text
//! forced_next: entries that must play next ("play next", or the entry a
//!              "previous" stepped back from)
//! order:       traversal permutation, recomputed whenever the queue mutates
//! history:     finished entries, most recent last
//! ```
//!
//! Advancing never removes the finished entry from storage.

use crate::history::History;
use crate::shuffle::traversal_order;
use crate::types::{QueueEntry, RepeatMode};
use minaret_core::{QueueId, Track};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Result of moving to the next entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// A different entry became current
    Play(QueueEntry),

    /// Repeat-one: the current entry plays again
    Replay(QueueEntry),

    /// End of queue with repeat off; current entry stays in place
    Finished,

    /// Nothing to play
    Empty,
}

/// Result of stepping back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Previous {
    /// Restart the current entry from the beginning
    Restart(QueueEntry),

    /// A history entry became current
    Moved(QueueEntry),

    /// Nothing to play
    Empty,
}

/// Result of removing an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// No entry with that id
    NotFound,

    /// A non-current entry was removed
    Upcoming,

    /// The current entry was removed and its successor is now current
    CurrentReplaced(QueueEntry),

    /// The current entry was removed and nothing follows it
    CurrentDropped,

    /// The queue is now empty
    Emptied,
}

/// Serializable view of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Entries in storage order
    pub entries: Vec<QueueEntry>,

    /// Index of the current entry (None when empty)
    pub current_index: Option<usize>,

    /// Shuffle flag
    pub shuffle: bool,

    /// Repeat mode
    pub repeat: RepeatMode,

    /// Entries that will play after the current one, in order
    pub upcoming: Vec<QueueId>,

    /// Finished entries (oldest first)
    pub history: Vec<QueueEntry>,

    /// Repeat-off queue ran past its last entry
    pub finished: bool,
}

enum Successor {
    /// Index from the forced-next list (front element)
    Forced(usize),
    /// Position in the traversal order, and the storage index there
    Next(usize, usize),
    /// Past the end with repeat all
    Wrap,
    /// Past the end with repeat off
    End,
}

/// Ordered play queue with shuffle, repeat and history
#[derive(Debug, Clone)]
pub struct QueueManager {
    entries: Vec<QueueEntry>,
    current: usize,
    shuffle: bool,
    repeat: RepeatMode,

    /// Lazily computed traversal permutation
    order: Option<Vec<usize>>,

    /// Position in `order` traversal continues from (shuffle only)
    cursor: usize,

    forced_next: VecDeque<QueueId>,
    history: History,
    exhausted: bool,
    rng: StdRng,
}

impl QueueManager {
    /// Create an empty queue
    pub fn new(history_size: usize) -> Self {
        Self::with_rng(history_size, StdRng::from_entropy())
    }

    /// Create an empty queue with a deterministic shuffle seed
    pub fn with_seed(history_size: usize, seed: u64) -> Self {
        Self::with_rng(history_size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(history_size: usize, rng: StdRng) -> Self {
        Self {
            entries: Vec::new(),
            current: 0,
            shuffle: false,
            repeat: RepeatMode::Off,
            order: None,
            cursor: 0,
            forced_next: VecDeque::new(),
            history: History::new(history_size),
            exhausted: false,
            rng,
        }
    }

    // ===== Accessors =====

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in storage order
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Current entry
    pub fn current(&self) -> Option<&QueueEntry> {
        self.entries.get(self.current)
    }

    /// Index of the current entry
    pub fn current_index(&self) -> Option<usize> {
        (!self.entries.is_empty()).then_some(self.current)
    }

    /// Shuffle flag
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    /// Repeat mode
    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    /// Playback history
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Whether a repeat-off queue ran past its last entry
    pub fn is_finished(&self) -> bool {
        self.exhausted
    }

    /// Find an entry's storage index
    pub fn index_of(&self, queue_id: &QueueId) -> Option<usize> {
        self.entries.iter().position(|e| &e.queue_id == queue_id)
    }

    // ===== Mutation =====

    /// Append a track to the end of the queue
    pub fn enqueue(&mut self, track: Track) -> QueueId {
        let entry = QueueEntry::new(track);
        let queue_id = entry.queue_id.clone();

        if self.entries.is_empty() {
            self.current = 0;
            self.exhausted = false;
        }
        self.entries.push(entry);
        self.invalidate_order();
        queue_id
    }

    /// Insert a track right after the current entry
    ///
    /// The entry is also marked as forced-next so it plays next under
    /// shuffle too.
    pub fn play_next(&mut self, track: Track) -> QueueId {
        let entry = QueueEntry::new(track);
        let queue_id = entry.queue_id.clone();

        if self.entries.is_empty() {
            self.entries.push(entry);
            self.current = 0;
            self.exhausted = false;
        } else {
            self.entries.insert(self.current + 1, entry);
            self.forced_next.push_front(queue_id.clone());
        }
        self.invalidate_order();
        queue_id
    }

    /// Remove an entry by queue id
    pub fn remove(&mut self, queue_id: &QueueId) -> Removal {
        let Some(idx) = self.index_of(queue_id) else {
            return Removal::NotFound;
        };
        self.forced_next.retain(|id| id != queue_id);

        if idx != self.current {
            self.entries.remove(idx);
            if idx < self.current {
                self.current -= 1;
            }
            self.invalidate_order();
            return Removal::Upcoming;
        }

        let successor = if self.exhausted {
            Successor::End
        } else {
            self.successor()
        };

        self.entries.remove(idx);
        self.invalidate_order();

        if self.entries.is_empty() {
            self.current = 0;
            self.exhausted = false;
            return Removal::Emptied;
        }

        let shift = |i: usize| if i > idx { i - 1 } else { i };
        match successor {
            Successor::Forced(i) => {
                self.forced_next.pop_front();
                self.move_to(shift(i));
            }
            Successor::Next(_, i) => self.move_to(shift(i)),
            Successor::Wrap => self.rewind(),
            Successor::End => {
                self.current = idx.min(self.entries.len() - 1);
                self.exhausted = true;
                return Removal::CurrentDropped;
            }
        }
        Removal::CurrentReplaced(self.entries[self.current].clone())
    }

    /// Clear entire queue, including history
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = 0;
        self.forced_next.clear();
        self.history.clear();
        self.exhausted = false;
        self.invalidate_order();
    }

    /// Keep the current entry, drop everything stored after it
    pub fn clear_upcoming(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.truncate(self.current + 1);
        self.forced_next.clear();
        self.invalidate_order();
    }

    /// Toggle shuffle
    ///
    /// No-op on an empty queue. Returns the resulting flag.
    pub fn toggle_shuffle(&mut self) -> bool {
        if !self.entries.is_empty() {
            self.set_shuffle(!self.shuffle);
        }
        self.shuffle
    }

    /// Set shuffle flag directly
    pub fn set_shuffle(&mut self, shuffle: bool) {
        if self.shuffle != shuffle {
            self.shuffle = shuffle;
            self.invalidate_order();
        }
    }

    /// Cycle repeat mode (off → all → one → off)
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.cycle();
        self.repeat
    }

    /// Set repeat mode
    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    // ===== Navigation =====

    /// Entry to play when the transport starts from idle
    ///
    /// A finished repeat-off queue moves on to anything enqueued since,
    /// otherwise starts over.
    pub fn start(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            return None;
        }
        if self.exhausted {
            self.exhausted = false;
            match self.successor() {
                Successor::Forced(i) => {
                    self.forced_next.pop_front();
                    self.move_to(i);
                }
                Successor::Next(pos, i) => self.step_to(pos, i),
                Successor::Wrap | Successor::End => self.rewind(),
            }
        }
        self.current().cloned()
    }

    /// Move to the next entry in traversal order
    pub fn advance(&mut self) -> Advance {
        if self.entries.is_empty() {
            return Advance::Empty;
        }
        if self.exhausted {
            return self.start().map_or(Advance::Empty, Advance::Play);
        }
        if self.repeat == RepeatMode::One {
            return Advance::Replay(self.entries[self.current].clone());
        }

        let finished = self.entries[self.current].clone();
        match self.successor() {
            Successor::Forced(i) => {
                self.forced_next.pop_front();
                self.history.push(finished);
                self.move_to(i);
            }
            Successor::Next(pos, i) => {
                self.history.push(finished);
                self.step_to(pos, i);
            }
            Successor::Wrap => {
                self.history.push(finished);
                self.rewind();
            }
            Successor::End => {
                self.history.push(finished);
                self.exhausted = true;
                return Advance::Finished;
            }
        }
        Advance::Play(self.entries[self.current].clone())
    }

    /// Step back
    ///
    /// Past `restart_threshold_ms` into the track this restarts it. Otherwise
    /// the most recent history entry becomes current (re-inserted if it was
    /// removed meanwhile) and the entry we left plays next again.
    pub fn previous(&mut self, position_ms: u64, restart_threshold_ms: u64) -> Previous {
        if position_ms > restart_threshold_ms && !self.entries.is_empty() {
            self.exhausted = false;
            return Previous::Restart(self.entries[self.current].clone());
        }

        let Some(prev) = self.history.pop() else {
            if !self.entries.is_empty() {
                self.exhausted = false;
            }
            return self.current().cloned().map_or(Previous::Empty, Previous::Restart);
        };

        if self.entries.is_empty() {
            self.entries.push(prev.clone());
            self.current = 0;
            self.exhausted = false;
            self.invalidate_order();
            return Previous::Moved(prev);
        }

        let left = self.entries[self.current].queue_id.clone();
        match self.index_of(&prev.queue_id) {
            Some(i) if i == self.current => {
                self.exhausted = false;
                return Previous::Restart(prev);
            }
            Some(i) => self.current = i,
            None => {
                self.entries.insert(self.current, prev);
                self.invalidate_order();
            }
        }
        self.forced_next.push_front(left);
        self.exhausted = false;
        Previous::Moved(self.entries[self.current].clone())
    }

    /// Jump to a specific entry
    pub fn skip_to(&mut self, queue_id: &QueueId) -> Option<QueueEntry> {
        let idx = self.index_of(queue_id)?;
        if idx != self.current {
            self.history.push(self.entries[self.current].clone());
            self.forced_next.retain(|id| id != queue_id);
            if self.shuffle {
                let pos = self.ensure_order().iter().position(|&i| i == idx);
                if let Some(pos) = pos {
                    self.cursor = pos;
                }
            }
            self.move_to(idx);
        }
        self.exhausted = false;
        self.current().cloned()
    }

    /// Entries that will play after the current one
    pub fn upcoming(&mut self) -> Vec<QueueEntry> {
        if self.entries.is_empty() || self.exhausted {
            return Vec::new();
        }

        let mut indices: Vec<usize> = Vec::new();
        for i in self.forced_next.iter().filter_map(|id| self.index_of(id)) {
            if i != self.current && !indices.contains(&i) {
                indices.push(i);
            }
        }

        let anchor = self.anchor();
        let rest: Vec<usize> = self.ensure_order().iter().skip(anchor + 1).copied().collect();
        for i in rest {
            if !indices.contains(&i) {
                indices.push(i);
            }
        }
        indices.into_iter().map(|i| self.entries[i].clone()).collect()
    }

    /// Serializable view
    pub fn snapshot(&mut self) -> QueueSnapshot {
        let upcoming = self.upcoming().into_iter().map(|e| e.queue_id).collect();
        QueueSnapshot {
            entries: self.entries.clone(),
            current_index: self.current_index(),
            shuffle: self.shuffle,
            repeat: self.repeat,
            upcoming,
            history: self.history.to_vec(),
            finished: self.exhausted,
        }
    }

    // ===== Internals =====

    fn invalidate_order(&mut self) {
        self.order = None;
    }

    fn ensure_order(&mut self) -> &[usize] {
        if self.order.is_none() {
            let order = traversal_order(
                self.entries.len(),
                Some(self.current),
                self.shuffle,
                &mut self.rng,
            );
            self.cursor = order.iter().position(|&i| i == self.current).unwrap_or(0);
            self.order = Some(order);
        }
        self.order.as_deref().unwrap_or(&[])
    }

    /// Position in the traversal order that "next" continues from
    fn anchor(&mut self) -> usize {
        let current = self.current;
        let shuffle = self.shuffle;
        let order = self.ensure_order();
        if shuffle {
            self.cursor
        } else {
            order.iter().position(|&i| i == current).unwrap_or(current)
        }
    }

    fn successor(&mut self) -> Successor {
        self.ensure_order();
        while let Some(id) = self.forced_next.front() {
            match self.index_of(id) {
                Some(i) if i != self.current => return Successor::Forced(i),
                _ => {
                    self.forced_next.pop_front();
                }
            }
        }

        let anchor = self.anchor();
        let next = self.ensure_order().get(anchor + 1).copied();
        match next {
            Some(i) => Successor::Next(anchor + 1, i),
            None if self.repeat == RepeatMode::All => Successor::Wrap,
            None => Successor::End,
        }
    }

    fn move_to(&mut self, index: usize) {
        self.current = index;
        self.exhausted = false;

        // A forced entry ahead of the cursor must not play a second time
        // when shuffled traversal reaches it.
        if self.shuffle {
            let cursor = self.cursor;
            if let Some(order) = self.order.as_mut() {
                if let Some(pos) = order.iter().position(|&i| i == index) {
                    if pos > cursor {
                        order.remove(pos);
                    }
                }
            }
        }
    }

    fn step_to(&mut self, pos: usize, index: usize) {
        self.cursor = pos;
        self.current = index;
        self.exhausted = false;
    }

    /// Start a new pass over the queue (repeat all, or restart after finish)
    fn rewind(&mut self) {
        let order = traversal_order(self.entries.len(), None, self.shuffle, &mut self.rng);
        self.current = order.first().copied().unwrap_or(0);
        self.cursor = 0;
        self.order = Some(order);
        self.exhausted = false;
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(50)
    }
}
