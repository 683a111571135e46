//! Bounded undo/redo over whole-board snapshots.
//!
//! Entries are value snapshots taken after each applied operation, kept in
//! a deque behind a cursor. Undo and redo only move the cursor; a fresh
//! push truncates everything past it, so the timeline stays linear. When
//! the deque is full the oldest entry falls off and that state simply
//! stops being reachable.

use std::collections::VecDeque;

use board_types::{BoardState, Operation};
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 50;

/// One reachable point on the timeline. The baseline entry carries no
/// operation; every later entry records the op that produced its snapshot,
/// which is what the history panel lists.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub snapshot: BoardState,
    pub op: Option<Operation>,
    pub at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct HistoryEngine {
    entries: VecDeque<HistoryEntry>,
    /// Index of the entry currently shown on the board.
    cursor: usize,
    capacity: usize,
}

impl HistoryEngine {
    pub fn new(baseline: BoardState, now_ms: i64) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, baseline, now_ms)
    }

    /// Capacity counts entries including the baseline, floor of 2 so undo
    /// always has somewhere to go.
    pub fn with_capacity(capacity: usize, baseline: BoardState, now_ms: i64) -> Self {
        let capacity = capacity.max(2);
        let mut entries = VecDeque::with_capacity(capacity);
        entries.push_back(HistoryEntry {
            snapshot: baseline,
            op: None,
            at_ms: now_ms,
        });
        Self {
            entries,
            cursor: 0,
            capacity,
        }
    }

    /// Records the state reached by applying `op`. Drops any redo tail
    /// first, then evicts from the front once over capacity.
    pub fn push(&mut self, snapshot: BoardState, op: Operation, now_ms: i64) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(HistoryEntry {
            snapshot,
            op: Some(op),
            at_ms: now_ms,
        });
        self.cursor = self.entries.len() - 1;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.cursor -= 1;
        }
        trace!(cursor = self.cursor, depth = self.entries.len(), "history push");
    }

    /// Steps back one entry. `None` when already at the oldest reachable
    /// state; callers treat that as a no-op.
    pub fn undo(&mut self) -> Option<&BoardState> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(&self.entries[self.cursor].snapshot)
    }

    /// Steps forward again. `None` at the tip.
    pub fn redo(&mut self) -> Option<&BoardState> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(&self.entries[self.cursor].snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// Restarts the timeline from a new baseline. Used on formation load
    /// and when a resync adopts authoritative state; pre-desync snapshots
    /// must not be re-broadcastable afterwards.
    pub fn reset(&mut self, baseline: BoardState, now_ms: i64) {
        self.entries.clear();
        self.entries.push_back(HistoryEntry {
            snapshot: baseline,
            op: None,
            at_ms: now_ms,
        });
        self.cursor = 0;
    }

    pub fn current(&self) -> &BoardState {
        &self.entries[self.cursor].snapshot
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Timeline oldest-first, for the history panel.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}
