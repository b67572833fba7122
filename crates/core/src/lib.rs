// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod channel;
pub mod client;
pub mod config;
pub mod controller;
pub mod coprocessor;
pub mod memory;
pub mod metrics;
pub mod platform;
pub mod snapshot;


pub use channel::{ChannelId, Direction};

/// Size of a bus word in bytes. Every channel pointer and length is counted in words.
pub const WORD_BYTES: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("Address decode error at {0:#x}")]
    AddressDecode(u64),
    #[error("Misaligned word access at {0:#x}")]
    Misaligned(u64),
    #[error("No {direction} channel with index {index}")]
    InvalidChannel { direction: Direction, index: u32 },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Word-level operations a bus master can issue against addressed memory.
///
/// Implementations take `&self` because memory is shared between the software
/// threads and the channel controller; each operation is atomic per word.
pub trait BusTransport: Send + Sync {
    fn read_word(&self, addr: u64) -> SimResult<u32>;
    fn write_word(&self, addr: u64, value: u32) -> SimResult<()>;

    /// Load-linked read. Places a reservation for `initiator` on `addr`.
    fn locked_read(&self, initiator: u32, addr: u64) -> SimResult<u32>;

    /// Store-conditional. Succeeds only if the reservation taken by the last
    /// `locked_read` of `initiator` is still valid, i.e. nobody wrote the word since.
    fn store_conditional(&self, initiator: u32, addr: u64, value: u32) -> SimResult<bool>;

    /// Atomic test-and-set of a lock word: stores 1 if the word is 0 and
    /// returns the value observed before the operation.
    fn test_and_set(&self, addr: u64) -> SimResult<u32>;

    fn read_block(&self, addr: u64, out: &mut [u32]) -> SimResult<()> {
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.read_word(addr + i as u64 * WORD_BYTES)?;
        }
        Ok(())
    }

    fn write_block(&self, addr: u64, data: &[u32]) -> SimResult<()> {
        for (i, word) in data.iter().enumerate() {
            self.write_word(addr + i as u64 * WORD_BYTES, *word)?;
        }
        Ok(())
    }
}

/// Register file exposed by a channel controller on its target port.
pub trait ControllerRegisters {
    fn read_register(&self, reg: u32) -> SimResult<u32>;
    fn write_register(&mut self, reg: u32, value: u32) -> SimResult<()>;
}

/// Trait for observing controller events in a modular way.
pub trait ChannelObserver: std::fmt::Debug + Send + Sync {
    fn on_election(&self, _channel: ChannelId) {}
    fn on_lock_retry(&self, _channel: ChannelId) {}
    fn on_transfer(&self, _channel: ChannelId, _words: u32) {}
    fn on_bailout(&self, _channel: ChannelId) {}
    fn on_not_running(&self, _channel: ChannelId) {}
}
