// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::channel::{ChannelConfig, ChannelId};
use crate::controller::ChannelStats;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub tick: u64,
    pub plaps: u32,
    pub backoff: u32,
    /// Channel the next election scan starts from.
    pub last_elected: Option<ChannelId>,
    /// Channel whose lock the controller is currently trying to take.
    pub acquiring: Option<ChannelId>,
    pub reset_pending: bool,
    pub channels: Vec<ChannelSnapshot>,
    pub coproc_config: Vec<u32>,
    pub coproc_status: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub config: ChannelConfig,
    pub cooldown: u32,
    pub staging_occupancy: u32,
    pub staging_capacity: u32,
    pub stats: ChannelStats,
}

impl ControllerSnapshot {
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
