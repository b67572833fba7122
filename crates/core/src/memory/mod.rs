// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::WORD_BYTES;
use std::sync::atomic::{AtomicU32, Ordering};

/// A flat word-addressed memory shared between software and bus masters.
///
/// Every word is an independent atomic so that software threads and the
/// controller may touch the same region concurrently.
#[derive(Debug)]
pub struct SharedMemory {
    words: Vec<AtomicU32>,
    base_addr: u64,
}

impl SharedMemory {
    /// `size` is in bytes and is rounded down to whole words.
    pub fn new(size: usize, base_addr: u64) -> Self {
        let count = size / WORD_BYTES as usize;
        Self {
            words: (0..count).map(|_| AtomicU32::new(0)).collect(),
            base_addr,
        }
    }

    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.words.len() as u64 * WORD_BYTES
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base_addr && addr < self.base_addr + self.size()
    }

    pub fn overlaps(&self, base: u64, size: u64) -> bool {
        base < self.base_addr + self.size() && self.base_addr < base + size
    }

    fn slot(&self, addr: u64) -> Option<&AtomicU32> {
        if !self.contains(addr) {
            return None;
        }
        self.words.get(((addr - self.base_addr) / WORD_BYTES) as usize)
    }

    pub fn read_word(&self, addr: u64) -> Option<u32> {
        self.slot(addr).map(|w| w.load(Ordering::SeqCst))
    }

    pub fn write_word(&self, addr: u64, value: u32) -> bool {
        match self.slot(addr) {
            Some(w) => {
                w.store(value, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Atomically replaces `current` with `new`. `None` if the address is unmapped,
    /// otherwise the result of the exchange (`Err` carries the observed value).
    pub fn compare_exchange(&self, addr: u64, current: u32, new: u32) -> Option<Result<u32, u32>> {
        self.slot(addr)
            .map(|w| w.compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst))
    }

    /// Copies `data` into memory at `start_addr`. Nothing is written unless the
    /// whole range fits.
    pub fn load_words(&self, start_addr: u64, data: &[u32]) -> bool {
        let end_addr = start_addr + data.len() as u64 * WORD_BYTES;
        let mem_end = self.base_addr + self.size();

        if start_addr >= self.base_addr && end_addr <= mem_end {
            for (i, word) in data.iter().enumerate() {
                self.write_word(start_addr + i as u64 * WORD_BYTES, *word);
            }
            return true;
        }
        false
    }
}
