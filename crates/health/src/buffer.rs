// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity buffer that keeps events sorted by timestamp.
//!
//! An index-linked doubly-linked list over a slab: allocation happens once
//! at construction, `push` walks backward from the newest entry (inputs of
//! one daemon cycle are mostly ordered already, so the walk is short), and
//! `next` replays the entries oldest-first until `clear`.

use hale_core::Nanos;

struct Slot<T> {
    prev: Option<u32>,
    next: Option<u32>,
    ts: Nanos,
    value: T,
}

pub struct TimeSortingBuffer<T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    head: Option<u32>,
    tail: Option<u32>,
    cursor: Option<u32>,
    cursor_started: bool,
}

impl<T: Copy> TimeSortingBuffer<T> {
    pub fn new(capacity: u16) -> Self {
        Self {
            slots: Vec::with_capacity(capacity as usize),
            capacity: capacity as usize,
            head: None,
            tail: None,
            cursor: None,
            cursor_started: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert `value` keeping ascending timestamp order. Equal timestamps
    /// keep insertion order (the new entry goes after existing ones).
    /// Returns false when the buffer is full; callers treat that as data
    /// loss.
    pub fn push(&mut self, value: T, ts: Nanos) -> bool {
        if self.slots.len() == self.capacity {
            return false;
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { prev: None, next: None, ts, value });

        match self.tail {
            None => {
                self.head = Some(index);
                self.tail = Some(index);
            }
            Some(tail) => {
                // Search backward from the newest entry.
                let mut at = tail;
                loop {
                    if ts >= self.slots[at as usize].ts {
                        // Insert after `at`.
                        let after = self.slots[at as usize].next;
                        self.slots[index as usize].prev = Some(at);
                        self.slots[index as usize].next = after;
                        self.slots[at as usize].next = Some(index);
                        match after {
                            Some(after) => self.slots[after as usize].prev = Some(index),
                            None => self.tail = Some(index),
                        }
                        break;
                    }
                    match self.slots[at as usize].prev {
                        Some(prev) => at = prev,
                        None => {
                            // New oldest entry.
                            self.slots[index as usize].next = Some(at);
                            self.slots[at as usize].prev = Some(index);
                            self.head = Some(index);
                            break;
                        }
                    }
                }
            }
        }
        true
    }

    /// Next element in chronological order, oldest first. Returns `None`
    /// once the newest entry has been reported.
    pub fn next(&mut self) -> Option<(T, Nanos)> {
        let at = if self.cursor_started {
            self.slots[self.cursor? as usize].next?
        } else {
            let head = self.head?;
            self.cursor_started = true;
            head
        };
        self.cursor = Some(at);
        let slot = &self.slots[at as usize];
        Some((slot.value, slot.ts))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = None;
        self.tail = None;
        self.cursor = None;
        self.cursor_started = false;
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
