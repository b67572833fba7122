// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::WORD_BYTES;

/// Registers below this index are passed through to the coprocessor.
pub const MWMR_IOREG_MAX: u32 = 16;

/// Channel-configuration registers of the controller target port.
///
/// `CONFIG_FIFO_WAY` and `CONFIG_FIFO_NO` select the channel that the other
/// `CONFIG_*` registers and `FIFO_FILL_STATUS` refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Register {
    Reset = MWMR_IOREG_MAX,
    ConfigFifoWay,
    ConfigFifoNo,
    ConfigStatusAddr,
    ConfigDepth,
    ConfigBufferAddr,
    ConfigLockAddr,
    ConfigRunning,
    ConfigWidth,
    FifoFillStatus,
    ConfigLayout,
}

impl Register {
    pub const CONFIG_STATE_ADDR: Register = Register::ConfigStatusAddr;
    pub const CONFIG_BASE_ADDR: Register = Register::ConfigBufferAddr;

    pub fn from_index(index: u32) -> Option<Self> {
        let reg = match index {
            16 => Self::Reset,
            17 => Self::ConfigFifoWay,
            18 => Self::ConfigFifoNo,
            19 => Self::ConfigStatusAddr,
            20 => Self::ConfigDepth,
            21 => Self::ConfigBufferAddr,
            22 => Self::ConfigLockAddr,
            23 => Self::ConfigRunning,
            24 => Self::ConfigWidth,
            25 => Self::FifoFillStatus,
            26 => Self::ConfigLayout,
            _ => return None,
        };
        Some(reg)
    }

    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Byte offset within the controller's register window.
    pub const fn offset(self) -> u64 {
        self as u64 * WORD_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_indices_round_trip() {
        for index in MWMR_IOREG_MAX..=26 {
            let reg = Register::from_index(index).unwrap();
            assert_eq!(reg.index(), index);
        }
        assert_eq!(Register::from_index(MWMR_IOREG_MAX - 1), None);
        assert_eq!(Register::from_index(27), None);
    }

    #[test]
    fn test_aliases_and_offsets() {
        assert_eq!(Register::CONFIG_STATE_ADDR, Register::ConfigStatusAddr);
        assert_eq!(Register::CONFIG_BASE_ADDR.offset(), 21 * 4);
    }
}
