// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Cooldown in ticks applied to a channel after each completed burst.
    pub plaps: u32,
    /// Cooldown in ticks applied when the lock was taken but the ring had no
    /// room (or no data) for a full burst.
    pub backoff: u32,
    /// Staging buffer capacity of every to-coprocessor channel, in words.
    pub to_coproc_fifo_depth: u32,
    /// Staging buffer capacity of every from-coprocessor channel, in words.
    pub from_coproc_fifo_depth: u32,
    pub n_to_coproc: u32,
    pub n_from_coproc: u32,
    /// Coprocessor configuration registers written by software.
    pub n_config: u32,
    /// Coprocessor status registers read by software.
    pub n_status: u32,
    /// Source id presented on the bus for LL/SC reservations.
    pub initiator_id: u32,
}

impl ControllerConfig {
    pub fn default_backoff(plaps: u32) -> u32 {
        4 * plaps + 4
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            plaps: 2,
            backoff: Self::default_backoff(2),
            to_coproc_fifo_depth: 8,
            from_coproc_fifo_depth: 8,
            n_to_coproc: 1,
            n_from_coproc: 1,
            n_config: 4,
            n_status: 4,
            initiator_id: 1,
        }
    }
}
