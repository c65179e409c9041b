// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session sliding-window dedup of client-assigned action ids (spec
//! §4.3: "2048-entry sliding window per session on both paths"). Backed by
//! an `IndexSet` so membership is O(1) and the oldest entry can be evicted
//! in insertion order without scanning.

use indexmap::IndexSet;

pub struct DedupeWindow {
    capacity: usize,
    seen: IndexSet<String>,
}

impl DedupeWindow {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, seen: IndexSet::with_capacity(capacity) }
    }

    /// Returns `true` if `action_id` was already seen within the window. As
    /// a side effect, records the id (evicting the oldest entry once the
    /// window is full) regardless of the outcome, so a fresh id is always
    /// tracked going forward.
    pub fn check_and_insert(&mut self, action_id: &str) -> bool {
        if self.seen.contains(action_id) {
            return true;
        }
        if self.seen.len() >= self.capacity {
            self.seen.shift_remove_index(0);
        }
        self.seen.insert(action_id.to_owned());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_duplicate_within_window() {
        let mut window = DedupeWindow::new(4);
        assert!(!window.check_and_insert("a1"));
        assert!(window.check_and_insert("a1"));
    }

    #[test]
    fn evicts_oldest_once_full() {
        let mut window = DedupeWindow::new(2);
        assert!(!window.check_and_insert("a1"));
        assert!(!window.check_and_insert("a2"));
        assert!(!window.check_and_insert("a3"));
        // a1 has aged out of the 2-entry window.
        assert!(!window.check_and_insert("a1"));
        // a2 and a3 are still tracked.
        assert!(window.check_and_insert("a3"));
    }
}
