//! Playback history tracking
//!
//! Maintains a bounded history of finished queue entries for "previous"
//! navigation

use crate::types::QueueEntry;
use std::collections::VecDeque;

/// Playback history with bounded size
///
/// Implements a ring buffer that automatically discards oldest entries.
#[derive(Debug, Clone)]
pub struct History {
    /// History buffer (most recent = back)
    entries: VecDeque<QueueEntry>,

    /// Maximum history size
    max_size: usize,
}

impl History {
    /// Create new history with specified maximum size
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Add an entry to history
    ///
    /// If history is full, the oldest entry is discarded
    pub fn push(&mut self, entry: QueueEntry) {
        if self.max_size == 0 {
            return;
        }
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Get most recent entry (without removing)
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.back()
    }

    /// Pop most recent entry from history
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_back()
    }

    /// All history entries (oldest first)
    pub fn to_vec(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Get number of entries in history
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if history is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
