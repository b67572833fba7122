// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::VecDeque;

/// Bounded word FIFO between the bus side of a channel and its coprocessor port.
///
/// No operation blocks; callers check readiness before pushing or popping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingBuffer {
    words: VecDeque<u32>,
    capacity: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn occupancy(&self) -> u32 {
        self.words.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.words.len() >= self.capacity
    }

    /// Returns `false` and drops nothing if the buffer is full.
    pub fn push(&mut self, word: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.words.push_back(word);
        true
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.words.pop_front()
    }

    pub fn front(&self) -> Option<u32> {
        self.words.front().copied()
    }

    /// One push and one pop in the same tick. Occupancy is unchanged, and an
    /// empty buffer hands `word` straight through.
    pub fn push_and_pop(&mut self, word: u32) -> u32 {
        match self.words.pop_front() {
            Some(out) => {
                self.words.push_back(word);
                out
            }
            None => word,
        }
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo_order() {
        let mut buf = StagingBuffer::new(3);
        assert!(buf.push(1));
        assert!(buf.push(2));
        assert!(buf.push(3));
        assert!(!buf.push(4));
        assert!(buf.is_full());
        assert_eq!(buf.occupancy(), 3);
        assert_eq!(buf.pop(), Some(1));
        assert_eq!(buf.pop(), Some(2));
        assert_eq!(buf.pop(), Some(3));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn test_push_and_pop_on_full_buffer() {
        let mut buf = StagingBuffer::new(2);
        buf.push(10);
        buf.push(11);
        assert_eq!(buf.push_and_pop(12), 10);
        assert_eq!(buf.occupancy(), 2);
        assert_eq!(buf.pop(), Some(11));
        assert_eq!(buf.pop(), Some(12));
    }

    #[test]
    fn test_push_and_pop_passes_through_when_empty() {
        let mut buf = StagingBuffer::new(2);
        assert_eq!(buf.push_and_pop(5), 5);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejects_push() {
        let mut buf = StagingBuffer::new(0);
        assert!(buf.is_full());
        assert!(!buf.push(1));
    }
}
