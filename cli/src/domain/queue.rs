//! Stable integer-priority step queue.
//!
//! Entries are kept sorted by priority with binary-search insertion; within
//! a priority, insertion order is preserved. A payload-key index supports
//! delete and reprioritize without a full scan. Two distinct payloads with
//! the same key are not supported by the index (the last insert wins), which
//! is acceptable because step filenames are unique and deferred actions are
//! reprioritized only by explicit reference.

use std::collections::HashMap;

/// Queue payloads identify themselves by a string key.
pub trait QueuePayload {
    fn key(&self) -> String;
}

impl QueuePayload for String {
    fn key(&self) -> String {
        self.clone()
    }
}

#[derive(Debug, Default)]
pub struct StepQueue<P: QueuePayload> {
    entries: Vec<(i64, P)>,
    priorities: HashMap<String, i64>,
}

impl<P: QueuePayload> StepQueue<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            priorities: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every queued entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.priorities.clear();
    }

    /// Insert at `priority`, after any existing entries of equal priority.
    pub fn insert(&mut self, payload: P, priority: i64) {
        self.insert_bounded(payload, priority, None, None);
    }

    /// Insert with an optional search window, used by [`StepQueue::update`]
    /// to avoid re-searching the whole queue.
    pub fn insert_bounded(
        &mut self,
        payload: P,
        priority: i64,
        lower: Option<usize>,
        upper: Option<usize>,
    ) {
        let lower = lower.unwrap_or(0).min(self.entries.len());
        let upper = upper.unwrap_or(self.entries.len()).clamp(lower, self.entries.len());
        let offset = self.entries[lower..upper].partition_point(|(p, _)| *p <= priority);
        self.priorities.insert(payload.key(), priority);
        self.entries.insert(lower + offset, (priority, payload));
    }

    /// Remove and return the minimum-priority entry.
    pub fn pop(&mut self) -> Option<P> {
        if self.entries.is_empty() {
            return None;
        }
        let (priority, payload) = self.entries.remove(0);
        if self.priorities.get(&payload.key()) == Some(&priority) {
            self.priorities.remove(&payload.key());
        }
        Some(payload)
    }

    /// Remove the first entry whose payload key equals `key`; returns its
    /// former position.
    pub fn delete(&mut self, key: &str) -> Option<usize> {
        let position = match self.priorities.get(key) {
            Some(&priority) => {
                let start = self.entries.partition_point(|(p, _)| *p < priority);
                self.entries[start..]
                    .iter()
                    .take_while(|(p, _)| *p == priority)
                    .position(|(_, payload)| payload.key() == key)
                    .map(|offset| start + offset)
                    // The index is single-slot; a duplicate key may live at a
                    // priority the index no longer remembers.
                    .or_else(|| self.scan(key))
            }
            None => self.scan(key),
        }?;
        self.entries.remove(position);
        self.priorities.remove(key);
        Some(position)
    }

    fn scan(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(_, payload)| payload.key() == key)
    }

    /// Move the entry with `key` to `new_priority`, keeping its payload.
    /// The re-insert searches only the side of the old position the entry
    /// can move toward. No-op when `key` is not queued.
    pub fn update(&mut self, key: &str, new_priority: i64) -> bool {
        let Some(&old_priority) = self.priorities.get(key) else {
            return false;
        };
        let Some(position) = self.scan(key) else {
            return false;
        };
        let (_, payload) = self.entries.remove(position);
        if new_priority >= old_priority {
            self.insert_bounded(payload, new_priority, Some(position), None);
        } else {
            self.insert_bounded(payload, new_priority, None, Some(position));
        }
        true
    }

    /// Iterate entries in queue order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &P)> {
        self.entries.iter().map(|(p, payload)| (*p, payload))
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
