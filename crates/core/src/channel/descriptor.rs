// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{BusTransport, SimResult, WORD_BYTES};
use serde::{Deserialize, Serialize};

/// Order of the four descriptor words in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorLayout {
    /// Separate status block: `{read_ptr, write_ptr, usage, lock}`.
    #[default]
    StatusBlock,
    /// Embedded in the client structure: `{usage, lock, read_ptr, write_ptr}`.
    Embedded,
}

impl DescriptorLayout {
    pub const WORDS: usize = 4;

    pub fn from_register(value: u32) -> Self {
        if value == 1 {
            Self::Embedded
        } else {
            Self::StatusBlock
        }
    }

    pub fn register_value(self) -> u32 {
        match self {
            Self::StatusBlock => 0,
            Self::Embedded => 1,
        }
    }

    pub fn usage_offset(self) -> usize {
        match self {
            Self::StatusBlock => 2,
            Self::Embedded => 0,
        }
    }

    pub fn lock_offset(self) -> usize {
        match self {
            Self::StatusBlock => 3,
            Self::Embedded => 1,
        }
    }

    pub fn read_ptr_offset(self) -> usize {
        match self {
            Self::StatusBlock => 0,
            Self::Embedded => 2,
        }
    }

    pub fn write_ptr_offset(self) -> usize {
        match self {
            Self::StatusBlock => 1,
            Self::Embedded => 3,
        }
    }

    pub fn decode(self, words: &[u32; Self::WORDS]) -> ChannelStatus {
        ChannelStatus {
            usage: words[self.usage_offset()],
            read_ptr: words[self.read_ptr_offset()],
            write_ptr: words[self.write_ptr_offset()],
            lock: words[self.lock_offset()],
        }
    }

    pub fn encode(self, status: &ChannelStatus) -> [u32; Self::WORDS] {
        let mut words = [0; Self::WORDS];
        words[self.usage_offset()] = status.usage;
        words[self.read_ptr_offset()] = status.read_ptr;
        words[self.write_ptr_offset()] = status.write_ptr;
        words[self.lock_offset()] = status.lock;
        words
    }
}

/// Where the descriptor lock word lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPlacement {
    /// The lock slot of the descriptor block itself.
    #[default]
    Bundled,
    /// An independent word; the descriptor's own lock slot is unused.
    Separate { address: u64 },
}

/// Everything needed to locate a channel descriptor in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub status_address: u64,
    pub fields: DescriptorLayout,
    pub lock: LockPlacement,
}

impl ChannelLayout {
    pub fn status_block(status_address: u64) -> Self {
        Self {
            status_address,
            fields: DescriptorLayout::StatusBlock,
            lock: LockPlacement::Bundled,
        }
    }

    pub fn embedded(status_address: u64) -> Self {
        Self {
            status_address,
            fields: DescriptorLayout::Embedded,
            lock: LockPlacement::Bundled,
        }
    }

    pub fn with_separate_lock(mut self, address: u64) -> Self {
        self.lock = LockPlacement::Separate { address };
        self
    }

    pub fn lock_address(&self) -> u64 {
        match self.lock {
            LockPlacement::Bundled => {
                self.status_address + self.fields.lock_offset() as u64 * WORD_BYTES
            }
            LockPlacement::Separate { address } => address,
        }
    }

    fn field_address(&self, offset: usize) -> u64 {
        self.status_address + offset as u64 * WORD_BYTES
    }

    /// Reads the whole descriptor block. The lock value reported is the one at
    /// [`Self::lock_address`], wherever that is.
    pub fn read_status(&self, bus: &dyn BusTransport) -> SimResult<ChannelStatus> {
        let mut words = [0u32; DescriptorLayout::WORDS];
        bus.read_block(self.status_address, &mut words)?;
        let mut status = self.fields.decode(&words);
        if let LockPlacement::Separate { address } = self.lock {
            status.lock = bus.read_word(address)?;
        }
        Ok(status)
    }

    /// Zeroes pointers, usage and the lock word.
    pub fn clear(&self, bus: &dyn BusTransport) -> SimResult<()> {
        bus.write_block(self.status_address, &[0; DescriptorLayout::WORDS])?;
        bus.write_word(self.lock_address(), 0)
    }

    /// Writes usage and pointers back, then frees the lock.
    ///
    /// The lock word is always the last word written. When it is the trailing
    /// word of the status block the whole descriptor goes out as one combined
    /// block write; otherwise the status words are written first and the lock
    /// second.
    pub fn commit(&self, bus: &dyn BusTransport, status: &ChannelStatus) -> SimResult<()> {
        let released = ChannelStatus { lock: 0, ..*status };
        let words = self.fields.encode(&released);
        let lock_offset = self.fields.lock_offset();

        if self.lock == LockPlacement::Bundled && lock_offset == DescriptorLayout::WORDS - 1 {
            return bus.write_block(self.status_address, &words);
        }

        for offset in 0..DescriptorLayout::WORDS {
            if self.lock == LockPlacement::Bundled && offset == lock_offset {
                continue;
            }
            bus.write_word(self.field_address(offset), words[offset])?;
        }
        self.release(bus)
    }

    /// Frees the lock without touching the status words.
    pub fn release(&self, bus: &dyn BusTransport) -> SimResult<()> {
        bus.write_word(self.lock_address(), 0)
    }
}

/// Snapshot of a descriptor as read from memory.
///
/// `usage` is authoritative for occupancy; the pointers only say where the
/// next read and write happen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub usage: u32,
    pub read_ptr: u32,
    pub write_ptr: u32,
    pub lock: u32,
}

impl ChannelStatus {
    /// Checks the descriptor invariants for a ring of `capacity` words.
    pub fn is_consistent(&self, capacity: u32) -> bool {
        if capacity == 0 {
            return false;
        }
        self.usage <= capacity
            && self.read_ptr < capacity
            && self.write_ptr < capacity
            && (self.write_ptr as u64 + capacity as u64 - self.read_ptr as u64) % capacity as u64
                == (self.usage % capacity) as u64
    }

    pub fn free_words(&self, capacity: u32) -> u32 {
        capacity.saturating_sub(self.usage)
    }

    /// Words writable at `write_ptr` before wrapping or running out of room.
    pub fn contiguous_free(&self, capacity: u32) -> u32 {
        (capacity - self.write_ptr).min(self.free_words(capacity))
    }

    /// Words readable at `read_ptr` before wrapping or running out of data.
    pub fn contiguous_used(&self, capacity: u32) -> u32 {
        (capacity - self.read_ptr).min(self.usage)
    }

    pub fn advance_write(&mut self, words: u32, capacity: u32) {
        self.write_ptr = wrap_ptr(self.write_ptr, words, capacity);
        self.usage += words;
    }

    pub fn advance_read(&mut self, words: u32, capacity: u32) {
        self.read_ptr = wrap_ptr(self.read_ptr, words, capacity);
        self.usage -= words;
    }
}

/// `(ptr + words) % capacity` without overflowing for rings close to `u32::MAX` words.
fn wrap_ptr(ptr: u32, words: u32, capacity: u32) -> u32 {
    ((ptr as u64 + words as u64) % capacity as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;

    fn bus() -> SystemBus {
        let mut bus = SystemBus::empty();
        bus.add_region("ram", 0x1000, 0x1000).unwrap();
        bus
    }

    #[test]
    fn test_status_block_offsets() {
        let layout = ChannelLayout::status_block(0x1100);
        assert_eq!(layout.lock_address(), 0x110C);
        let status = ChannelStatus {
            usage: 3,
            read_ptr: 1,
            write_ptr: 4,
            lock: 1,
        };
        assert_eq!(DescriptorLayout::StatusBlock.encode(&status), [1, 4, 3, 1]);
    }

    #[test]
    fn test_embedded_offsets() {
        let layout = ChannelLayout::embedded(0x1100);
        assert_eq!(layout.lock_address(), 0x1104);
        let status = ChannelStatus {
            usage: 3,
            read_ptr: 1,
            write_ptr: 4,
            lock: 1,
        };
        let words = DescriptorLayout::Embedded.encode(&status);
        assert_eq!(words, [3, 1, 1, 4]);
        assert_eq!(DescriptorLayout::Embedded.decode(&words), status);
    }

    #[test]
    fn test_commit_releases_bundled_lock() {
        let bus = bus();
        for layout in [
            ChannelLayout::status_block(0x1100),
            ChannelLayout::embedded(0x1100),
        ] {
            bus.write_word(layout.lock_address(), 1).unwrap();
            let status = ChannelStatus {
                usage: 2,
                read_ptr: 5,
                write_ptr: 7,
                lock: 1,
            };
            layout.commit(&bus, &status).unwrap();
            let read = layout.read_status(&bus).unwrap();
            assert_eq!(read, ChannelStatus { lock: 0, ..status });
        }
    }

    #[test]
    fn test_commit_separate_lock() {
        let bus = bus();
        let layout = ChannelLayout::status_block(0x1100).with_separate_lock(0x1200);
        assert_eq!(layout.lock_address(), 0x1200);
        bus.write_word(0x1200, 1).unwrap();
        let status = ChannelStatus {
            usage: 1,
            read_ptr: 0,
            write_ptr: 1,
            lock: 1,
        };
        layout.commit(&bus, &status).unwrap();
        assert_eq!(bus.read_word(0x1200).unwrap(), 0);
        assert_eq!(bus.read_word(0x1108).unwrap(), 1);
    }

    #[test]
    fn test_invariants() {
        let ok = ChannelStatus {
            usage: 3,
            read_ptr: 14,
            write_ptr: 1,
            lock: 0,
        };
        assert!(ok.is_consistent(16));

        let full = ChannelStatus {
            usage: 16,
            read_ptr: 5,
            write_ptr: 5,
            lock: 0,
        };
        assert!(full.is_consistent(16));

        let torn = ChannelStatus { usage: 2, ..ok };
        assert!(!torn.is_consistent(16));

        let out_of_range = ChannelStatus {
            usage: 0,
            read_ptr: 16,
            write_ptr: 16,
            lock: 0,
        };
        assert!(!out_of_range.is_consistent(16));
    }

    #[test]
    fn test_contiguous_runs_stop_at_wrap() {
        let status = ChannelStatus {
            usage: 6,
            read_ptr: 12,
            write_ptr: 2,
            lock: 0,
        };
        assert_eq!(status.contiguous_used(16), 4);
        assert_eq!(status.contiguous_free(16), 10);

        let mut s = status;
        s.advance_read(4, 16);
        assert_eq!(s.read_ptr, 0);
        assert_eq!(s.usage, 2);
        s.advance_write(14, 16);
        assert_eq!(s.write_ptr, 0);
        assert_eq!(s.usage, 16);
        assert!(s.is_consistent(16));
    }

    #[test]
    fn test_pointer_arithmetic_near_word_limit() {
        let cap = u32::MAX - 1;
        let mut s = ChannelStatus {
            usage: 2,
            read_ptr: cap - 1,
            write_ptr: 1,
            lock: 0,
        };
        assert!(s.is_consistent(cap));

        s.advance_write(cap - 3, cap);
        assert_eq!(s.write_ptr, cap - 2);
        assert_eq!(s.usage, cap - 1);
        assert!(s.is_consistent(cap));

        s.advance_read(3, cap);
        assert_eq!(s.read_ptr, 2);
        assert!(s.is_consistent(cap));
        assert!(!ChannelStatus { usage: 1, ..s }.is_consistent(cap));
    }
}
