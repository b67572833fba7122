// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_plaps() -> u32 {
    2
}

fn default_fifo_depth() -> u32 {
    8
}

fn default_io_regs() -> u32 {
    4
}

fn default_initiator() -> u32 {
    1
}

fn default_lane_depth() -> u32 {
    4
}

fn default_interval() -> u32 {
    1
}

fn default_backoff_ticks() -> u32 {
    4
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MemoryRegion {
    pub name: String,
    pub base: u64,
    pub size: String, // e.g. "64KB"
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ControllerSection {
    #[serde(default = "default_plaps")]
    pub plaps: u32,
    /// Defaults to `4 * plaps + 4`.
    #[serde(default)]
    pub backoff: Option<u32>,
    #[serde(default = "default_fifo_depth")]
    pub to_coproc_fifo_depth: u32,
    #[serde(default = "default_fifo_depth")]
    pub from_coproc_fifo_depth: u32,
    /// Defaults to the highest to-coprocessor channel index plus one.
    #[serde(default)]
    pub n_to_coproc: Option<u32>,
    #[serde(default)]
    pub n_from_coproc: Option<u32>,
    #[serde(default = "default_io_regs")]
    pub n_config: u32,
    #[serde(default = "default_io_regs")]
    pub n_status: u32,
    #[serde(default = "default_initiator")]
    pub initiator_id: u32,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            plaps: default_plaps(),
            backoff: None,
            to_coproc_fifo_depth: default_fifo_depth(),
            from_coproc_fifo_depth: default_fifo_depth(),
            n_to_coproc: None,
            n_from_coproc: None,
            n_config: default_io_regs(),
            n_status: default_io_regs(),
            initiator_id: default_initiator(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDirection {
    #[serde(alias = "to_coproc")]
    ToCoprocessor,
    #[serde(alias = "from_coproc")]
    FromCoprocessor,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    #[default]
    StatusBlock,
    Embedded,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    pub name: String,
    pub direction: ChannelDirection,
    pub index: u32,
    /// Burst size in words.
    pub width: u32,
    /// Ring size in bursts.
    pub depth: u32,
    pub buffer: u64,
    pub status: u64,
    #[serde(default)]
    pub layout: DescriptorKind,
    /// Independent lock word; the descriptor's own lock slot is used when absent.
    #[serde(default)]
    pub lock_address: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoprocessorSection {
    Loopback {
        #[serde(default)]
        increment: u32,
        #[serde(default = "default_lane_depth")]
        depth: u32,
    },
    /// Sink on every to-coprocessor channel, counter source on every
    /// from-coprocessor channel.
    Stream {
        #[serde(default = "default_interval")]
        interval: u32,
        #[serde(default)]
        words: u32,
        #[serde(default)]
        start: u32,
    },
}

impl Default for CoprocessorSection {
    fn default() -> Self {
        Self::Loopback {
            increment: 0,
            depth: default_lane_depth(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskRoleKind {
    Writer,
    Reader,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskModeKind {
    #[default]
    Blocking,
    Polling,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TaskSection {
    pub name: String,
    pub role: TaskRoleKind,
    /// Name of a channel in `channels`.
    pub channel: String,
    pub words: u32,
    /// First value of the counter sequence a writer sends.
    #[serde(default)]
    pub start: u32,
    /// Words per call; one burst when absent.
    #[serde(default)]
    pub chunk: Option<u32>,
    #[serde(default)]
    pub mode: TaskModeKind,
    #[serde(default = "default_backoff_ticks")]
    pub backoff_ticks: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunLimits {
    pub max_ticks: u64,
    /// Stop when no task and no channel made progress for this many ticks.
    #[serde(default)]
    pub no_progress_ticks: Option<u64>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_ticks: 100_000,
            no_progress_ticks: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlatformManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub memory: Vec<MemoryRegion>,
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub coprocessor: CoprocessorSection,
    pub channels: Vec<ChannelSection>,
    #[serde(default)]
    pub workload: Vec<TaskSection>,
    #[serde(default)]
    pub limits: RunLimits,
}

impl PlatformManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to open platform manifest at {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(content).context("Failed to parse Platform Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Number of channel slots of `direction` the controller is built with.
    pub fn channel_count(&self, direction: ChannelDirection) -> u32 {
        let explicit = match direction {
            ChannelDirection::ToCoprocessor => self.controller.n_to_coproc,
            ChannelDirection::FromCoprocessor => self.controller.n_from_coproc,
        };
        explicit.unwrap_or_else(|| {
            self.channels
                .iter()
                .filter(|c| c.direction == direction)
                .map(|c| c.index + 1)
                .max()
                .unwrap_or(0)
        })
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSection> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.memory.is_empty() {
            anyhow::bail!("At least one memory region is required");
        }
        let mut mapped = Vec::with_capacity(self.memory.len());
        for region in &self.memory {
            let size = parse_size(&region.size)
                .with_context(|| format!("Memory region '{}' has an invalid size", region.name))?;
            check_aligned(&region.name, "base", region.base)?;
            mapped.push((region.base, size));
        }

        let ctrl = &self.controller;
        if ctrl.to_coproc_fifo_depth == 0 || ctrl.from_coproc_fifo_depth == 0 {
            anyhow::bail!("Controller staging FIFO depths must be greater than zero");
        }
        if ctrl.n_config > 16 || ctrl.n_status > 16 {
            anyhow::bail!("At most 16 coprocessor config/status registers are supported");
        }

        let mut names = HashSet::new();
        let mut slots = HashSet::new();
        for ch in &self.channels {
            if !names.insert(ch.name.as_str()) {
                anyhow::bail!("Duplicate channel name '{}'", ch.name);
            }
            if !slots.insert((ch.direction, ch.index)) {
                anyhow::bail!(
                    "Channel '{}' reuses {:?} index {}",
                    ch.name,
                    ch.direction,
                    ch.index
                );
            }
            if ch.index >= self.channel_count(ch.direction) {
                anyhow::bail!(
                    "Channel '{}' index {} exceeds the controller's {:?} channel count",
                    ch.name,
                    ch.index,
                    ch.direction
                );
            }
            if ch.width == 0 || ch.depth == 0 {
                anyhow::bail!("Channel '{}' width and depth must be greater than zero", ch.name);
            }
            // A to-coprocessor burst is only taken while the staging FIFO keeps a free slot.
            let fits = match ch.direction {
                ChannelDirection::ToCoprocessor => ch.width < ctrl.to_coproc_fifo_depth,
                ChannelDirection::FromCoprocessor => ch.width <= ctrl.from_coproc_fifo_depth,
            };
            if !fits {
                anyhow::bail!(
                    "Channel '{}' width {} does not fit the controller staging FIFO",
                    ch.name,
                    ch.width
                );
            }
            let ring_words = ch.width.checked_mul(ch.depth).ok_or_else(|| {
                anyhow::anyhow!(
                    "Channel '{}' ring of {} x {} words is too large",
                    ch.name,
                    ch.depth,
                    ch.width
                )
            })?;
            check_aligned(&ch.name, "buffer", ch.buffer)?;
            check_aligned(&ch.name, "status", ch.status)?;
            check_mapped(&mapped, &ch.name, "buffer", ch.buffer, ring_words as u64 * 4)?;
            check_mapped(&mapped, &ch.name, "status", ch.status, 16)?;
            if let Some(lock) = ch.lock_address {
                if lock == 0 {
                    anyhow::bail!("Channel '{}' lock_address cannot be zero", ch.name);
                }
                check_aligned(&ch.name, "lock_address", lock)?;
                check_mapped(&mapped, &ch.name, "lock_address", lock, 4)?;
            }
        }

        match self.coprocessor {
            CoprocessorSection::Stream { interval: 0, .. } => {
                anyhow::bail!("Stream coprocessor interval must be greater than zero");
            }
            CoprocessorSection::Loopback { increment, .. } if increment != 0 && ctrl.n_config == 0 => {
                anyhow::bail!("Loopback increment needs at least one coprocessor config register");
            }
            CoprocessorSection::Loopback { depth: 0, .. } => {
                anyhow::bail!("Loopback depth must be greater than zero");
            }
            _ => {}
        }

        let mut task_names = HashSet::new();
        for task in &self.workload {
            if !task_names.insert(task.name.as_str()) {
                anyhow::bail!("Duplicate task name '{}'", task.name);
            }
            let Some(ch) = self.channel(&task.channel) else {
                anyhow::bail!("Task '{}' refers to unknown channel '{}'", task.name, task.channel);
            };
            let expected = match task.role {
                TaskRoleKind::Writer => ChannelDirection::ToCoprocessor,
                TaskRoleKind::Reader => ChannelDirection::FromCoprocessor,
            };
            if ch.direction != expected {
                anyhow::bail!(
                    "Task '{}' is a {:?} but channel '{}' is {:?}",
                    task.name,
                    task.role,
                    ch.name,
                    ch.direction
                );
            }
            if task.chunk == Some(0) {
                anyhow::bail!("Task '{}' chunk must be greater than zero", task.name);
            }
        }

        if self.limits.max_ticks == 0 {
            anyhow::bail!("Limit 'max_ticks' must be greater than zero");
        }

        Ok(())
    }
}

fn check_aligned(owner: &str, field: &str, addr: u64) -> Result<()> {
    if addr % 4 != 0 {
        anyhow::bail!("'{}' {} {:#x} is not word aligned", owner, field, addr);
    }
    Ok(())
}

/// Requires `[addr, addr + len)` to lie inside a single memory region.
fn check_mapped(regions: &[(u64, u64)], owner: &str, field: &str, addr: u64, len: u64) -> Result<()> {
    let inside = regions.iter().any(|&(base, size)| {
        addr >= base && addr.checked_add(len).is_some_and(|end| end <= base.saturating_add(size))
    });
    if !inside {
        anyhow::bail!(
            "Channel '{}' {} {:#x} (+{} bytes) is outside mapped memory",
            owner,
            field,
            addr,
            len
        );
    }
    Ok(())
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
