// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::memory::SharedMemory;
use crate::{BusTransport, SimResult, SimulationError, WORD_BYTES};
use mwmr_config::{parse_size, PlatformManifest};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct MemoryEntry {
    pub name: String,
    pub mem: SharedMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    addr: u64,
    value: u32,
}

/// Interconnect decoding word addresses onto a set of memory regions.
///
/// The bus also plays the role of the memory-side LL/SC monitor: a
/// reservation placed by `locked_read` is dropped by any later write to the
/// same word, whoever the writer is.
pub struct SystemBus {
    pub regions: Vec<MemoryEntry>,
    reservations: Mutex<HashMap<u32, Reservation>>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    pub fn new() -> Self {
        // Default initialization for tests
        Self {
            regions: vec![MemoryEntry {
                name: "ram".to_string(),
                mem: SharedMemory::new(1024 * 1024, 0x2000_0000),
            }],
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self {
            regions: Vec::new(),
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_region(&mut self, name: &str, base: u64, size: u64) -> SimResult<()> {
        if base % WORD_BYTES != 0 {
            return Err(SimulationError::Misaligned(base));
        }
        if let Some(existing) = self.regions.iter().find(|r| r.mem.overlaps(base, size)) {
            return Err(SimulationError::InvalidConfig(format!(
                "region '{}' at {:#x} overlaps '{}'",
                name, base, existing.name
            )));
        }
        self.regions.push(MemoryEntry {
            name: name.to_string(),
            mem: SharedMemory::new(size as usize, base),
        });
        Ok(())
    }

    pub fn from_config(manifest: &PlatformManifest) -> anyhow::Result<Self> {
        let mut bus = Self::empty();
        for region in &manifest.memory {
            let size = parse_size(&region.size)?;
            bus.add_region(&region.name, region.base, size)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            tracing::debug!(
                "Mapped memory '{}' at {:#x} ({} bytes)",
                region.name,
                region.base,
                size
            );
        }
        Ok(bus)
    }

    fn region(&self, addr: u64) -> SimResult<&SharedMemory> {
        if addr % WORD_BYTES != 0 {
            return Err(SimulationError::Misaligned(addr));
        }
        self.regions
            .iter()
            .map(|r| &r.mem)
            .find(|m| m.contains(addr))
            .ok_or(SimulationError::AddressDecode(addr))
    }

    fn invalidate_reservations(&self, addr: u64) {
        if let Ok(mut reservations) = self.reservations.lock() {
            reservations.retain(|_, r| r.addr != addr);
        }
    }

    /// Copies `data` into whichever region maps `addr`.
    pub fn load_words(&self, addr: u64, data: &[u32]) -> SimResult<()> {
        if self.region(addr)?.load_words(addr, data) {
            for i in 0..data.len() as u64 {
                self.invalidate_reservations(addr + i * WORD_BYTES);
            }
            Ok(())
        } else {
            Err(SimulationError::AddressDecode(
                addr + data.len() as u64 * WORD_BYTES,
            ))
        }
    }
}

impl BusTransport for SystemBus {
    fn read_word(&self, addr: u64) -> SimResult<u32> {
        self.region(addr)?
            .read_word(addr)
            .ok_or(SimulationError::AddressDecode(addr))
    }

    fn write_word(&self, addr: u64, value: u32) -> SimResult<()> {
        if !self.region(addr)?.write_word(addr, value) {
            return Err(SimulationError::AddressDecode(addr));
        }
        self.invalidate_reservations(addr);
        Ok(())
    }

    fn locked_read(&self, initiator: u32, addr: u64) -> SimResult<u32> {
        let value = self.read_word(addr)?;
        if let Ok(mut reservations) = self.reservations.lock() {
            reservations.insert(initiator, Reservation { addr, value });
        }
        tracing::trace!("LL {:#x} by {} -> {:#x}", addr, initiator, value);
        Ok(value)
    }

    fn store_conditional(&self, initiator: u32, addr: u64, value: u32) -> SimResult<bool> {
        let mem = self.region(addr)?;
        let Ok(mut reservations) = self.reservations.lock() else {
            return Ok(false);
        };
        let Some(reservation) = reservations.remove(&initiator) else {
            return Ok(false);
        };
        if reservation.addr != addr {
            return Ok(false);
        }
        // The exchange against the value seen by LL also covers writers that
        // bypass the reservation table, such as test-and-set.
        let stored = matches!(
            mem.compare_exchange(addr, reservation.value, value),
            Some(Ok(_))
        );
        if stored {
            reservations.retain(|_, r| r.addr != addr);
        }
        tracing::trace!("SC {:#x} by {} -> {}", addr, initiator, stored);
        Ok(stored)
    }

    fn test_and_set(&self, addr: u64) -> SimResult<u32> {
        match self.region(addr)?.compare_exchange(addr, 0, 1) {
            Some(Ok(prev)) => {
                self.invalidate_reservations(addr);
                Ok(prev)
            }
            Some(Err(prev)) => Ok(prev),
            None => Err(SimulationError::AddressDecode(addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> SystemBus {
        let mut bus = SystemBus::empty();
        bus.add_region("ram", 0x1000, 0x100).unwrap();
        bus.add_region("sram", 0x8000, 0x40).unwrap();
        bus
    }

    #[test]
    fn test_decodes_multiple_regions() {
        let bus = bus();
        bus.write_word(0x1004, 7).unwrap();
        bus.write_word(0x803C, 9).unwrap();
        assert_eq!(bus.read_word(0x1004).unwrap(), 7);
        assert_eq!(bus.read_word(0x803C).unwrap(), 9);
    }

    #[test]
    fn test_unmapped_address_is_decode_error() {
        let bus = bus();
        assert_eq!(
            bus.read_word(0x4000),
            Err(SimulationError::AddressDecode(0x4000))
        );
        assert_eq!(
            bus.write_word(0x8040, 1),
            Err(SimulationError::AddressDecode(0x8040))
        );
    }

    #[test]
    fn test_misaligned_access() {
        let bus = bus();
        assert_eq!(bus.read_word(0x1002), Err(SimulationError::Misaligned(0x1002)));
    }

    #[test]
    fn test_overlapping_region_rejected() {
        let mut bus = bus();
        assert!(matches!(
            bus.add_region("bad", 0x10F0, 0x20),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ll_sc_succeeds_without_interference() {
        let bus = bus();
        assert_eq!(bus.locked_read(1, 0x1010).unwrap(), 0);
        assert!(bus.store_conditional(1, 0x1010, 1).unwrap());
        assert_eq!(bus.read_word(0x1010).unwrap(), 1);
        // Reservation is consumed
        assert!(!bus.store_conditional(1, 0x1010, 2).unwrap());
    }

    #[test]
    fn test_sc_fails_after_intervening_write() {
        let bus = bus();
        bus.locked_read(1, 0x1010).unwrap();
        bus.write_word(0x1010, 0).unwrap();
        assert!(!bus.store_conditional(1, 0x1010, 1).unwrap());
    }

    #[test]
    fn test_sc_fails_after_test_and_set() {
        let bus = bus();
        assert_eq!(bus.locked_read(1, 0x1010).unwrap(), 0);
        assert_eq!(bus.test_and_set(0x1010).unwrap(), 0);
        assert!(!bus.store_conditional(1, 0x1010, 1).unwrap());
        assert_eq!(bus.read_word(0x1010).unwrap(), 1);
    }

    #[test]
    fn test_and_set_reports_previous_value() {
        let bus = bus();
        assert_eq!(bus.test_and_set(0x1020).unwrap(), 0);
        assert_eq!(bus.test_and_set(0x1020).unwrap(), 1);
        bus.write_word(0x1020, 0).unwrap();
        assert_eq!(bus.test_and_set(0x1020).unwrap(), 0);
    }

    #[test]
    fn test_block_transfers() {
        let bus = bus();
        bus.write_block(0x1040, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u32; 4];
        bus.read_block(0x1040, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
