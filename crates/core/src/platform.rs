// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::SystemBus;
use crate::channel::{ChannelLayout, Direction};
use crate::client::{self, ClientTask, MwmrChannel, TaskMode, TaskStats};
use crate::config::ControllerConfig;
use crate::controller::{MwmrController, TickOutcome};
use crate::coprocessor::{CoprocessorPort, Loopback, Sink, Source, SourceSink};
use crate::{ChannelObserver, SimResult};
use anyhow::Context;
use mwmr_config::{
    ChannelDirection, CoprocessorSection, DescriptorKind, PlatformManifest, TaskModeKind,
    TaskRoleKind,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    WorkloadComplete,
    MaxTicks,
    NoProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub progress: usize,
    pub total: usize,
    pub done: bool,
    pub stats: TaskStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stop_reason: StopReason,
    pub ticks: u64,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Memory, one controller, its coprocessor and the software tasks, advanced
/// together one tick at a time. Software runs first within a tick.
pub struct Platform {
    pub bus: Arc<SystemBus>,
    pub controller: MwmrController,
    pub coprocessor: Box<dyn CoprocessorPort>,
    pub tasks: Vec<ClientTask>,
    pub observers: Vec<Arc<dyn ChannelObserver>>,
    pub channels: HashMap<String, MwmrChannel>,
    ticks: u64,
    words_seen: u64,
    last_progress: u64,
}

fn direction_of(direction: ChannelDirection) -> Direction {
    match direction {
        ChannelDirection::ToCoprocessor => Direction::ToCoprocessor,
        ChannelDirection::FromCoprocessor => Direction::FromCoprocessor,
    }
}

impl Platform {
    pub fn new(
        bus: Arc<SystemBus>,
        controller: MwmrController,
        coprocessor: Box<dyn CoprocessorPort>,
    ) -> Self {
        Self {
            bus,
            controller,
            coprocessor,
            tasks: Vec::new(),
            observers: Vec::new(),
            channels: HashMap::new(),
            ticks: 0,
            words_seen: 0,
            last_progress: 0,
        }
    }

    pub fn from_manifest(manifest: &PlatformManifest) -> anyhow::Result<Self> {
        let bus = Arc::new(SystemBus::from_config(manifest)?);

        let section = &manifest.controller;
        let n_to = manifest.channel_count(ChannelDirection::ToCoprocessor);
        let n_from = manifest.channel_count(ChannelDirection::FromCoprocessor);
        let mut controller = MwmrController::new(ControllerConfig {
            plaps: section.plaps,
            backoff: section
                .backoff
                .unwrap_or_else(|| ControllerConfig::default_backoff(section.plaps)),
            to_coproc_fifo_depth: section.to_coproc_fifo_depth,
            from_coproc_fifo_depth: section.from_coproc_fifo_depth,
            n_to_coproc: n_to,
            n_from_coproc: n_from,
            n_config: section.n_config,
            n_status: section.n_status,
            initiator_id: section.initiator_id,
        });

        let mut channels = HashMap::new();
        for ch in &manifest.channels {
            let mut layout = match ch.layout {
                DescriptorKind::StatusBlock => ChannelLayout::status_block(ch.status),
                DescriptorKind::Embedded => ChannelLayout::embedded(ch.status),
            };
            if let Some(lock) = ch.lock_address {
                layout = layout.with_separate_lock(lock);
            }
            let channel =
                MwmrChannel::initialize_pointer(bus.as_ref(), ch.width, ch.depth, ch.buffer, layout)
                    .with_context(|| format!("Failed to initialize channel '{}'", ch.name))?;
            channel
                .hw_init(&mut controller, direction_of(ch.direction), ch.index)
                .with_context(|| format!("Failed to program channel '{}'", ch.name))?;
            channels.insert(ch.name.clone(), channel);
        }

        let coprocessor: Box<dyn CoprocessorPort> = match manifest.coprocessor {
            CoprocessorSection::Loopback { increment, depth } => {
                if section.n_config > 0 {
                    client::config(&mut controller, 0, increment)?;
                }
                Box::new(Loopback::new(n_to.min(n_from), depth as usize))
            }
            CoprocessorSection::Stream {
                interval,
                words,
                start,
            } => {
                let mut source = Source::new(n_from);
                for index in 0..n_from {
                    source.feed(index, (0..words).map(|i| start.wrapping_add(i)));
                }
                Box::new(SourceSink::new(source, Sink::with_interval(n_to, interval)))
            }
        };

        let mut platform = Self::new(bus, controller, coprocessor);
        for task in &manifest.workload {
            let channel = channels
                .get(&task.channel)
                .copied()
                .with_context(|| format!("Task '{}' has no channel", task.name))?;
            let built = match task.role {
                TaskRoleKind::Writer => ClientTask::writer(
                    &task.name,
                    channel,
                    (0..task.words).map(|i| task.start.wrapping_add(i)).collect(),
                ),
                TaskRoleKind::Reader => ClientTask::reader(&task.name, channel, task.words as usize),
            };
            let mode = match task.mode {
                TaskModeKind::Blocking => TaskMode::Blocking,
                TaskModeKind::Polling => TaskMode::Polling,
            };
            let mut built = built.with_mode(mode).with_backoff_ticks(task.backoff_ticks);
            if let Some(chunk) = task.chunk {
                built = built.with_chunk(chunk as usize);
            }
            platform.tasks.push(built);
        }
        platform.channels = channels;

        tracing::info!(
            "Platform '{}': {} channels, {} tasks",
            manifest.name,
            manifest.channels.len(),
            manifest.workload.len()
        );
        Ok(platform)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn task(&self, name: &str) -> Option<&ClientTask> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    pub fn add_task(&mut self, task: ClientTask) {
        self.tasks.push(task);
    }

    pub fn workload_complete(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(ClientTask::is_done)
    }

    fn words_progressed(&self) -> u64 {
        let software: u64 = self.tasks.iter().map(|t| t.progress() as u64).sum();
        let hardware: u64 = self
            .controller
            .snapshot()
            .channels
            .iter()
            .map(|c| c.stats.words_moved)
            .sum();
        software + hardware
    }

    pub fn step(&mut self) -> SimResult<TickOutcome> {
        for task in &mut self.tasks {
            task.tick(self.bus.as_ref())?;
        }
        let outcome =
            self.controller
                .tick(self.bus.as_ref(), self.coprocessor.as_mut(), &self.observers)?;
        self.ticks += 1;

        if matches!(outcome, TickOutcome::Transferred { .. }) || self.tasks_moved() {
            self.last_progress = self.ticks;
        }
        Ok(outcome)
    }

    fn tasks_moved(&mut self) -> bool {
        let software: u64 = self.tasks.iter().map(|t| t.progress() as u64).sum();
        let moved = software != self.words_seen;
        self.words_seen = software;
        moved
    }

    /// Runs until the workload completes, `max_ticks` elapse, or nothing
    /// moved for `no_progress_ticks`.
    pub fn run(&mut self, max_ticks: u64, no_progress_ticks: Option<u64>) -> SimResult<RunReport> {
        let start = self.ticks;
        let stop_reason = loop {
            if self.workload_complete() {
                break StopReason::WorkloadComplete;
            }
            if self.ticks - start >= max_ticks {
                break StopReason::MaxTicks;
            }
            if let Some(limit) = no_progress_ticks {
                if self.ticks - self.last_progress >= limit {
                    break StopReason::NoProgress;
                }
            }
            self.step()?;
        };

        tracing::info!(
            "Stopped after {} ticks: {:?} ({} words moved)",
            self.ticks,
            stop_reason,
            self.words_progressed()
        );
        Ok(self.report(stop_reason))
    }

    pub fn report(&self, stop_reason: StopReason) -> RunReport {
        RunReport {
            stop_reason,
            ticks: self.ticks,
            tasks: self
                .tasks
                .iter()
                .map(|t| TaskReport {
                    name: t.name().to_string(),
                    progress: t.progress(),
                    total: t.total(),
                    done: t.is_done(),
                    stats: t.stats(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOPBACK: &str = r#"
name: "loopback"
memory:
  - name: ram
    base: 0x20000000
    size: "64KB"
controller:
  plaps: 1
  n_config: 2
coprocessor:
  type: loopback
  increment: 100
channels:
  - name: input
    direction: to_coprocessor
    index: 0
    width: 4
    depth: 4
    buffer: 0x20000000
    status: 0x20000400
  - name: output
    direction: from_coprocessor
    index: 0
    width: 4
    depth: 4
    buffer: 0x20000100
    status: 0x20000410
    layout: embedded
    lock_address: 0x20000500
workload:
  - name: producer
    role: writer
    channel: input
    words: 64
  - name: consumer
    role: reader
    channel: output
    words: 64
"#;

    #[test]
    fn test_loopback_platform_round_trip() {
        let manifest = PlatformManifest::from_yaml(LOOPBACK).unwrap();
        let mut platform = Platform::from_manifest(&manifest).unwrap();
        let report = platform.run(20_000, Some(2_000)).unwrap();
        assert_eq!(report.stop_reason, StopReason::WorkloadComplete);

        let consumer = platform.task("consumer").unwrap();
        let expected: Vec<u32> = (0..64).map(|i| i + 100).collect();
        assert_eq!(consumer.received(), expected.as_slice());
        assert_eq!(platform.controller.coproc_status()[0], 64);
    }

    #[test]
    fn test_manifest_programs_controller_registers() {
        let manifest = PlatformManifest::from_yaml(LOOPBACK).unwrap();
        let platform = Platform::from_manifest(&manifest).unwrap();
        let cfg = platform
            .controller
            .channel_config(crate::ChannelId::from_coproc(0))
            .unwrap();
        assert!(cfg.running);
        assert_eq!(cfg.capacity_words, 16);
        assert_eq!(cfg.layout.lock_address(), 0x2000_0500);
        assert_eq!(platform.controller.coproc_config()[0], 100);
    }

    #[test]
    fn test_no_progress_stop() {
        let yaml = LOOPBACK.replace("    words: 64\n  - name: consumer", "    words: 8\n  - name: consumer");
        let manifest = PlatformManifest::from_yaml(&yaml).unwrap();
        let mut platform = Platform::from_manifest(&manifest).unwrap();
        let report = platform.run(50_000, Some(500)).unwrap();
        assert_eq!(report.stop_reason, StopReason::NoProgress);
        assert_eq!(report.task("consumer").unwrap().progress, 8);
        assert!(report.ticks < 50_000);
    }
}
