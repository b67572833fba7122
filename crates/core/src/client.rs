// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Software side of an MWMR channel.
//!
//! Every operation takes the descriptor lock with an atomic test-and-set on
//! the same word the controller acquires with LL/SC, and releases it together
//! with the final descriptor write.

use crate::channel::{ring_capacity, ChannelLayout, ChannelStatus, Direction, LockPlacement};
use crate::controller::Register;
use crate::{BusTransport, ControllerRegisters, SimResult, SimulationError, WORD_BYTES};
use serde::Serialize;

/// Busy-wait policy used between lock and room/data polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub spins: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { spins: 1000 }
    }
}

impl Backoff {
    pub fn new(spins: u32) -> Self {
        Self { spins }
    }

    pub fn wait(&self) {
        for _ in 0..self.spins {
            std::hint::spin_loop();
        }
        std::thread::yield_now();
    }
}

/// Writes a controller register.
pub fn config(regs: &mut dyn ControllerRegisters, reg: u32, value: u32) -> SimResult<()> {
    regs.write_register(reg, value)
}

/// Reads a controller register.
pub fn status(regs: &dyn ControllerRegisters, reg: u32) -> SimResult<u32> {
    regs.read_register(reg)
}

fn register_address(addr: u64) -> SimResult<u32> {
    u32::try_from(addr).map_err(|_| {
        SimulationError::InvalidConfig(format!("address {:#x} does not fit a register", addr))
    })
}

/// Software view of one channel: ring geometry plus descriptor location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MwmrChannel {
    pub burst_words: u32,
    pub capacity_words: u32,
    pub buffer_address: u64,
    pub layout: ChannelLayout,
}

impl MwmrChannel {
    /// Lays out a channel of `depth` bursts of `width` words and zeroes its
    /// descriptor and lock.
    pub fn initialize_pointer(
        bus: &dyn BusTransport,
        width: u32,
        depth: u32,
        buffer_address: u64,
        layout: ChannelLayout,
    ) -> SimResult<Self> {
        if width == 0 || depth == 0 {
            return Err(SimulationError::InvalidConfig(format!(
                "channel at {:#x} needs non-zero width and depth",
                buffer_address
            )));
        }
        let channel = Self {
            burst_words: width,
            capacity_words: ring_capacity(width, depth)?,
            buffer_address,
            layout,
        };
        layout.clear(bus)?;
        tracing::debug!(
            "Initialized channel at {:#x}: {} x {} words, status {:#x}",
            buffer_address,
            depth,
            width,
            layout.status_address
        );
        Ok(channel)
    }

    /// Programs channel `no` of `direction` in the controller with this
    /// channel's geometry and starts it.
    pub fn hw_init(
        &self,
        regs: &mut dyn ControllerRegisters,
        direction: Direction,
        no: u32,
    ) -> SimResult<()> {
        let lock = match self.layout.lock {
            LockPlacement::Bundled => 0,
            LockPlacement::Separate { address } => register_address(address)?,
        };
        config(regs, Register::ConfigFifoWay.index(), direction.register_value())?;
        config(regs, Register::ConfigFifoNo.index(), no)?;
        config(
            regs,
            Register::ConfigStatusAddr.index(),
            register_address(self.layout.status_address)?,
        )?;
        config(
            regs,
            Register::ConfigBufferAddr.index(),
            register_address(self.buffer_address)?,
        )?;
        config(regs, Register::ConfigLockAddr.index(), lock)?;
        config(regs, Register::ConfigLayout.index(), self.layout.fields.register_value())?;
        config(regs, Register::ConfigWidth.index(), self.burst_words)?;
        config(regs, Register::ConfigDepth.index(), self.capacity_words)?;
        config(regs, Register::ConfigRunning.index(), 1)
    }

    fn slot_address(&self, ptr: u32) -> u64 {
        self.buffer_address + ptr as u64 * WORD_BYTES
    }

    fn burst(&self) -> u32 {
        self.burst_words.max(1)
    }

    fn lock(&self, bus: &dyn BusTransport, backoff: &Backoff) -> SimResult<()> {
        let addr = self.layout.lock_address();
        while bus.test_and_set(addr)? != 0 {
            backoff.wait();
        }
        Ok(())
    }

    fn try_lock(&self, bus: &dyn BusTransport) -> SimResult<bool> {
        Ok(bus.test_and_set(self.layout.lock_address())? == 0)
    }

    fn unlock(&self, bus: &dyn BusTransport, status: &ChannelStatus, modified: bool) -> SimResult<()> {
        if modified {
            self.layout.commit(bus, status)
        } else {
            self.layout.release(bus)
        }
    }

    /// Gives the lock back after a failed locked section and passes the
    /// error on. Nothing written since the last commit becomes visible.
    fn release_on_error<T>(&self, bus: &dyn BusTransport, result: SimResult<T>) -> SimResult<T> {
        if let Err(e) = &result {
            tracing::warn!("Channel at {:#x} dropping its lock after: {}", self.buffer_address, e);
            if let Err(release) = self.layout.release(bus) {
                tracing::warn!("Channel at {:#x} lock not released: {}", self.buffer_address, release);
            }
        }
        result
    }

    /// Copies `data` into the ring at `write_ptr`. The run must not cross the
    /// end of the ring.
    fn copy_in(&self, bus: &dyn BusTransport, status: &mut ChannelStatus, data: &[u32]) -> SimResult<()> {
        bus.write_block(self.slot_address(status.write_ptr), data)?;
        status.advance_write(data.len() as u32, self.capacity_words);
        Ok(())
    }

    fn copy_out(&self, bus: &dyn BusTransport, status: &mut ChannelStatus, out: &mut [u32]) -> SimResult<()> {
        bus.read_block(self.slot_address(status.read_ptr), out)?;
        status.advance_read(out.len() as u32, self.capacity_words);
        Ok(())
    }

    /// Blocking write of `data`.
    ///
    /// Waits, lock released, whenever fewer than one burst of room is free,
    /// including for a final remainder shorter than a burst.
    pub fn write(&self, bus: &dyn BusTransport, data: &[u32], backoff: &Backoff) -> SimResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.lock(bus, backoff)?;
        let result = self.write_locked(bus, data, backoff);
        self.release_on_error(bus, result)
    }

    fn write_locked(&self, bus: &dyn BusTransport, data: &[u32], backoff: &Backoff) -> SimResult<()> {
        let cap = self.capacity_words;
        let mut status = self.layout.read_status(bus)?;
        let mut modified = false;
        let mut done = 0;

        while done < data.len() {
            if status.free_words(cap) < self.burst() {
                self.unlock(bus, &status, modified)?;
                modified = false;
                backoff.wait();
                self.lock(bus, backoff)?;
                status = self.layout.read_status(bus)?;
                continue;
            }
            let run = (status.contiguous_free(cap) as usize).min(data.len() - done);
            self.copy_in(bus, &mut status, &data[done..done + run])?;
            done += run;
            modified = true;
        }
        self.unlock(bus, &status, modified)
    }

    /// Blocking read filling `out`. Waits while fewer than one burst is stored.
    pub fn read(&self, bus: &dyn BusTransport, out: &mut [u32], backoff: &Backoff) -> SimResult<()> {
        if out.is_empty() {
            return Ok(());
        }
        self.lock(bus, backoff)?;
        let result = self.read_locked(bus, out, backoff);
        self.release_on_error(bus, result)
    }

    fn read_locked(&self, bus: &dyn BusTransport, out: &mut [u32], backoff: &Backoff) -> SimResult<()> {
        let cap = self.capacity_words;
        let mut status = self.layout.read_status(bus)?;
        let mut modified = false;
        let mut done = 0;

        while done < out.len() {
            if status.usage < self.burst() {
                self.unlock(bus, &status, modified)?;
                modified = false;
                backoff.wait();
                self.lock(bus, backoff)?;
                status = self.layout.read_status(bus)?;
                continue;
            }
            let run = (status.contiguous_used(cap) as usize).min(out.len() - done);
            self.copy_out(bus, &mut status, &mut out[done..done + run])?;
            done += run;
            modified = true;
        }
        self.unlock(bus, &status, modified)
    }

    /// Writes as many words of `data` as currently fit, without a burst
    /// minimum. Returns 0 if the lock was busy.
    pub fn try_write(&self, bus: &dyn BusTransport, data: &[u32]) -> SimResult<usize> {
        if !self.try_lock(bus)? {
            return Ok(0);
        }
        let result = self.try_write_locked(bus, data);
        self.release_on_error(bus, result)
    }

    fn try_write_locked(&self, bus: &dyn BusTransport, data: &[u32]) -> SimResult<usize> {
        let cap = self.capacity_words;
        let mut status = self.layout.read_status(bus)?;
        let total = (status.free_words(cap) as usize).min(data.len());
        let mut done = 0;
        while done < total {
            let run = (status.contiguous_free(cap) as usize).min(total - done);
            self.copy_in(bus, &mut status, &data[done..done + run])?;
            done += run;
        }
        self.unlock(bus, &status, done > 0)?;
        Ok(done)
    }

    /// Reads as many words as are stored, up to `out.len()`. Returns 0 if the
    /// lock was busy.
    pub fn try_read(&self, bus: &dyn BusTransport, out: &mut [u32]) -> SimResult<usize> {
        if !self.try_lock(bus)? {
            return Ok(0);
        }
        let result = self.try_read_locked(bus, out);
        self.release_on_error(bus, result)
    }

    fn try_read_locked(&self, bus: &dyn BusTransport, out: &mut [u32]) -> SimResult<usize> {
        let cap = self.capacity_words;
        let mut status = self.layout.read_status(bus)?;
        let total = (status.usage as usize).min(out.len());
        let mut done = 0;
        while done < total {
            let run = (status.contiguous_used(cap) as usize).min(total - done);
            self.copy_out(bus, &mut status, &mut out[done..done + run])?;
            done += run;
        }
        self.unlock(bus, &status, done > 0)?;
        Ok(done)
    }

    /// Blocks until the ring is empty and the controller's staging buffer
    /// for channel `no` of `direction` reports no words.
    pub fn wait_until_drained(
        &self,
        bus: &dyn BusTransport,
        regs: &mut dyn ControllerRegisters,
        direction: Direction,
        no: u32,
        backoff: &Backoff,
    ) -> SimResult<()> {
        loop {
            self.lock(bus, backoff)?;
            let status = self.release_on_error(bus, self.layout.read_status(bus))?;
            self.layout.release(bus)?;
            if status.usage == 0 {
                break;
            }
            backoff.wait();
        }

        config(regs, Register::ConfigFifoWay.index(), direction.register_value())?;
        config(regs, Register::ConfigFifoNo.index(), no)?;
        while status(regs, Register::FifoFillStatus.index())? != 0 {
            backoff.wait();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// `write`/`read` semantics: wait for a full burst of room or data.
    Blocking,
    /// `try_write`/`try_read` in a loop, backing off after an empty attempt.
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRole {
    Writer { data: Vec<u32> },
    Reader { target: usize, received: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Acquire,
    Holding { status: ChannelStatus, modified: bool },
    Backoff(u32),
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub calls: u64,
    pub lock_retries: u64,
    pub blocked: u64,
    pub words: u64,
}

/// A software thread running channel calls, advanced one tick at a time.
///
/// A blocking call takes one tick per lock attempt and one tick per
/// contiguous copy, holding the lock in between. A polling call locks,
/// moves what it can and unlocks within a single tick.
#[derive(Debug, Clone)]
pub struct ClientTask {
    name: String,
    channel: MwmrChannel,
    role: TaskRole,
    mode: TaskMode,
    chunk: usize,
    backoff_ticks: u32,
    position: usize,
    /// Position when the lock was last taken; words past it are uncommitted.
    locked_at: usize,
    call_end: Option<usize>,
    phase: TaskPhase,
    stats: TaskStats,
}

impl ClientTask {
    pub fn writer(name: &str, channel: MwmrChannel, data: Vec<u32>) -> Self {
        Self::new(name, channel, TaskRole::Writer { data })
    }

    pub fn reader(name: &str, channel: MwmrChannel, target: usize) -> Self {
        Self::new(
            name,
            channel,
            TaskRole::Reader {
                target,
                received: Vec::with_capacity(target),
            },
        )
    }

    fn new(name: &str, channel: MwmrChannel, role: TaskRole) -> Self {
        let phase = if Self::total_of(&role) == 0 {
            TaskPhase::Done
        } else {
            TaskPhase::Acquire
        };
        Self {
            name: name.to_string(),
            chunk: channel.burst_words.max(1) as usize,
            channel,
            role,
            mode: TaskMode::Blocking,
            backoff_ticks: 4,
            position: 0,
            locked_at: 0,
            call_end: None,
            phase,
            stats: TaskStats::default(),
        }
    }

    pub fn with_mode(mut self, mode: TaskMode) -> Self {
        self.mode = mode;
        self
    }

    /// Words requested per call.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn with_backoff_ticks(mut self, ticks: u32) -> Self {
        self.backoff_ticks = ticks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &MwmrChannel {
        &self.channel
    }

    pub fn stats(&self) -> TaskStats {
        self.stats
    }

    pub fn is_done(&self) -> bool {
        self.phase == TaskPhase::Done
    }

    /// Whether the task currently owns the descriptor lock.
    pub fn holds_lock(&self) -> bool {
        matches!(self.phase, TaskPhase::Holding { .. })
    }

    pub fn progress(&self) -> usize {
        self.position
    }

    pub fn total(&self) -> usize {
        Self::total_of(&self.role)
    }

    fn total_of(role: &TaskRole) -> usize {
        match role {
            TaskRole::Writer { data } => data.len(),
            TaskRole::Reader { target, .. } => *target,
        }
    }

    /// Words read so far; empty for a writer.
    pub fn received(&self) -> &[u32] {
        match &self.role {
            TaskRole::Reader { received, .. } => received.as_slice(),
            TaskRole::Writer { .. } => &[],
        }
    }

    fn call_remaining(&mut self) -> usize {
        let total = self.total();
        let chunk = self.chunk;
        let position = self.position;
        let end = *self
            .call_end
            .get_or_insert_with(|| (position + chunk).min(total));
        end - self.position
    }

    fn finish_call(&mut self) {
        self.call_end = None;
        self.stats.calls += 1;
        self.phase = if self.position >= self.total() {
            tracing::debug!("Task '{}' finished after {} words", self.name, self.position);
            TaskPhase::Done
        } else {
            TaskPhase::Acquire
        };
    }

    fn back_off(&mut self) {
        self.phase = match self.backoff_ticks {
            0 => TaskPhase::Acquire,
            n => TaskPhase::Backoff(n),
        };
    }

    /// Room (writer) or data (reader) currently available.
    fn available(&self, status: &ChannelStatus) -> u32 {
        match self.role {
            TaskRole::Writer { .. } => status.free_words(self.channel.capacity_words),
            TaskRole::Reader { .. } => status.usage,
        }
    }

    /// Moves one contiguous run of at most `limit` words.
    fn copy_run(&mut self, bus: &dyn BusTransport, status: &mut ChannelStatus, limit: usize) -> SimResult<usize> {
        let cap = self.channel.capacity_words;
        let channel = self.channel;
        let start = self.position;
        let run = match &mut self.role {
            TaskRole::Writer { data } => {
                let run = (status.contiguous_free(cap) as usize).min(limit);
                channel.copy_in(bus, status, &data[start..start + run])?;
                run
            }
            TaskRole::Reader { received, .. } => {
                let run = (status.contiguous_used(cap) as usize).min(limit);
                let mut words = vec![0u32; run];
                channel.copy_out(bus, status, &mut words)?;
                received.extend_from_slice(&words);
                run
            }
        };
        self.position += run;
        self.stats.words += run as u64;
        Ok(run)
    }

    pub fn tick(&mut self, bus: &dyn BusTransport) -> SimResult<()> {
        match self.phase {
            TaskPhase::Done => Ok(()),
            TaskPhase::Backoff(n) => {
                self.phase = if n <= 1 {
                    TaskPhase::Acquire
                } else {
                    TaskPhase::Backoff(n - 1)
                };
                Ok(())
            }
            TaskPhase::Acquire => {
                if !self.channel.try_lock(bus)? {
                    self.stats.lock_retries += 1;
                    tracing::trace!("Task '{}' lock busy", self.name);
                    if self.mode == TaskMode::Polling {
                        self.call_end = None;
                        self.back_off();
                    }
                    return Ok(());
                }
                self.locked_at = self.position;
                let result = self.acquired(bus);
                self.abandon_on_error(bus, result)
            }
            TaskPhase::Holding { status, modified } => {
                let result = self.blocking_step(bus, status, modified);
                self.abandon_on_error(bus, result)
            }
        }
    }

    fn acquired(&mut self, bus: &dyn BusTransport) -> SimResult<()> {
        let status = self.channel.layout.read_status(bus)?;
        match self.mode {
            TaskMode::Blocking => {
                self.phase = TaskPhase::Holding {
                    status,
                    modified: false,
                };
                Ok(())
            }
            TaskMode::Polling => self.poll(bus, status),
        }
    }

    /// Rolls the task back to its last commit and drops the lock when a
    /// locked step fails.
    fn abandon_on_error(&mut self, bus: &dyn BusTransport, result: SimResult<()>) -> SimResult<()> {
        if result.is_err() {
            let undone = self.position - self.locked_at;
            self.position = self.locked_at;
            self.stats.words -= undone as u64;
            if let TaskRole::Reader { received, .. } = &mut self.role {
                received.truncate(self.locked_at);
            }
            self.call_end = None;
            self.phase = TaskPhase::Acquire;
        }
        self.channel.release_on_error(bus, result)
    }

    fn blocking_step(&mut self, bus: &dyn BusTransport, mut status: ChannelStatus, modified: bool) -> SimResult<()> {
        if self.available(&status) < self.channel.burst() {
            self.channel.unlock(bus, &status, modified)?;
            self.stats.blocked += 1;
            tracing::trace!("Task '{}' blocked (usage {})", self.name, status.usage);
            self.back_off();
            return Ok(());
        }
        let remaining = self.call_remaining();
        self.copy_run(bus, &mut status, remaining)?;
        if self.call_remaining() == 0 {
            self.channel.unlock(bus, &status, true)?;
            self.finish_call();
        } else {
            self.phase = TaskPhase::Holding {
                status,
                modified: true,
            };
        }
        Ok(())
    }

    fn poll(&mut self, bus: &dyn BusTransport, mut status: ChannelStatus) -> SimResult<()> {
        let want = self.call_remaining().min(self.available(&status) as usize);
        let mut done = 0;
        while done < want {
            done += self.copy_run(bus, &mut status, want - done)?;
        }
        self.channel.unlock(bus, &status, done > 0)?;
        if done == 0 {
            self.call_end = None;
            self.stats.blocked += 1;
            self.back_off();
        } else {
            self.finish_call();
        }
        Ok(())
    }
}
