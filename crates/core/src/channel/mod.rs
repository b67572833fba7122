// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod descriptor;
pub mod staging;

pub use descriptor::{ChannelLayout, ChannelStatus, DescriptorLayout, LockPlacement};
pub use staging::StagingBuffer;

use crate::{SimResult, SimulationError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Memory to accelerator: the controller pulls bursts out of the circular buffer.
    ToCoprocessor,
    /// Accelerator to memory: the controller pushes bursts into the circular buffer.
    FromCoprocessor,
}

impl Direction {
    /// Decodes a `CONFIG_FIFO_WAY` value. Anything but 1 selects the to-coprocessor side.
    pub fn from_register(value: u32) -> Self {
        if value == 1 {
            Self::FromCoprocessor
        } else {
            Self::ToCoprocessor
        }
    }

    pub fn register_value(self) -> u32 {
        match self {
            Self::ToCoprocessor => 0,
            Self::FromCoprocessor => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToCoprocessor => write!(f, "to_coproc"),
            Self::FromCoprocessor => write!(f, "from_coproc"),
        }
    }
}

/// Identifies one channel of a controller: `(direction, index within that direction)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub direction: Direction,
    pub index: u32,
}

impl ChannelId {
    pub fn to_coproc(index: u32) -> Self {
        Self {
            direction: Direction::ToCoprocessor,
            index,
        }
    }

    pub fn from_coproc(index: u32) -> Self {
        Self {
            direction: Direction::FromCoprocessor,
            index,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.direction, self.index)
    }
}

/// Controller-side configuration of one channel.
///
/// Software describes the same channel through [`crate::client::MwmrChannel`];
/// the two are programmed separately and nothing keeps them in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Ring size in words (`width * depth`).
    pub capacity_words: u32,
    /// Transfer granularity in words.
    pub burst_words: u32,
    pub base_address: u64,
    pub layout: ChannelLayout,
    pub direction: Direction,
    pub running: bool,
}

/// Ring size in words of `depth` bursts of `width` words.
pub fn ring_capacity(width: u32, depth: u32) -> SimResult<u32> {
    width.checked_mul(depth).ok_or_else(|| {
        SimulationError::InvalidConfig(format!(
            "ring of {} x {} words does not fit a 32-bit word count",
            depth, width
        ))
    })
}

impl ChannelConfig {
    pub fn new(
        direction: Direction,
        burst_words: u32,
        depth: u32,
        base_address: u64,
        layout: ChannelLayout,
    ) -> SimResult<Self> {
        Ok(Self {
            capacity_words: ring_capacity(burst_words, depth)?,
            ..Self::unconfigured(direction)
        }
        .with_geometry(burst_words, base_address, layout))
    }

    /// A stopped channel with no ring, as found after controller construction.
    pub fn unconfigured(direction: Direction) -> Self {
        Self {
            capacity_words: 0,
            burst_words: 0,
            base_address: 0,
            layout: ChannelLayout::status_block(0),
            direction,
            running: false,
        }
    }

    fn with_geometry(mut self, burst_words: u32, base_address: u64, layout: ChannelLayout) -> Self {
        self.burst_words = burst_words;
        self.base_address = base_address;
        self.layout = layout;
        self
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    /// Byte address of ring slot `ptr`.
    pub fn slot_address(&self, ptr: u32) -> u64 {
        self.base_address + ptr as u64 * crate::WORD_BYTES
    }

    /// A channel the controller can safely service.
    pub fn is_usable(&self) -> bool {
        self.burst_words > 0 && self.capacity_words >= self.burst_words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_register_encoding() {
        assert_eq!(Direction::from_register(1), Direction::FromCoprocessor);
        assert_eq!(Direction::from_register(0), Direction::ToCoprocessor);
        assert_eq!(Direction::from_register(7), Direction::ToCoprocessor);
        assert_eq!(Direction::FromCoprocessor.register_value(), 1);
    }

    #[test]
    fn test_channel_config_capacity() {
        let layout = ChannelLayout::status_block(0x100);
        let cfg = ChannelConfig::new(Direction::ToCoprocessor, 4, 4, 0x2000, layout).unwrap();
        assert_eq!(cfg.capacity_words, 16);
        assert!(!cfg.running);
        assert!(cfg.is_usable());
        assert_eq!(cfg.slot_address(3), 0x200C);
    }

    #[test]
    fn test_ring_capacity_overflow_rejected() {
        assert_eq!(ring_capacity(4, 1 << 28).unwrap(), 1 << 30);
        assert!(matches!(
            ring_capacity(4, 1 << 30),
            Err(SimulationError::InvalidConfig(_))
        ));
        let layout = ChannelLayout::status_block(0x100);
        assert!(ChannelConfig::new(Direction::FromCoprocessor, u32::MAX, 2, 0, layout).is_err());
    }

    #[test]
    fn test_channel_id_display() {
        assert_eq!(ChannelId::from_coproc(2).to_string(), "from_coproc[2]");
    }
}
