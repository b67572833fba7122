// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod registers;

pub use registers::{Register, MWMR_IOREG_MAX};

use crate::channel::{
    ChannelConfig, ChannelId, DescriptorLayout, Direction, LockPlacement, StagingBuffer,
};
use crate::config::ControllerConfig;
use crate::coprocessor::CoprocessorPort;
use crate::snapshot::{ChannelSnapshot, ControllerSnapshot};
use crate::{
    BusTransport, ChannelObserver, ControllerRegisters, SimResult, SimulationError, WORD_BYTES,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-channel event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub services: u64,
    pub bailouts: u64,
    pub lock_retries: u64,
    pub not_running_skips: u64,
    pub words_moved: u64,
}

#[derive(Debug, Clone)]
struct ChannelState {
    id: ChannelId,
    config: ChannelConfig,
    cooldown: u32,
    staging: StagingBuffer,
    stats: ChannelStats,
}

impl ChannelState {
    fn new(id: ChannelId, fifo_depth: u32) -> Self {
        Self {
            id,
            config: ChannelConfig::unconfigured(id.direction),
            cooldown: 0,
            staging: StagingBuffer::new(fifo_depth as usize),
            stats: ChannelStats::default(),
        }
    }

    /// Staging side can take (or give) one more full burst.
    fn ready(&self) -> bool {
        let burst = self.config.burst_words;
        match self.config.direction {
            Direction::ToCoprocessor => {
                burst < self.staging.capacity().saturating_sub(self.staging.occupancy())
            }
            Direction::FromCoprocessor => self.staging.occupancy() >= burst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Acquiring { slot: usize },
}

/// Coprocessor-side handshake sampled at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    None,
    Consume,
    Produced(u32),
}

/// What the controller did during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Reset,
    LockRetry(ChannelId),
    Transferred { channel: ChannelId, words: u32 },
    BailedOut(ChannelId),
}

/// Bus-mastering MWMR channel controller.
///
/// Channel slots are ordered with every to-coprocessor channel first, then
/// every from-coprocessor channel. The election scan walks that order.
pub struct MwmrController {
    config: ControllerConfig,
    channels: Vec<ChannelState>,
    phase: Phase,
    last_elected: usize,
    committed: Option<usize>,
    selected_way: Direction,
    selected_no: u32,
    pending_reset: bool,
    coproc_config: Vec<u32>,
    coproc_status: Vec<u32>,
    tick_count: u64,
}

impl MwmrController {
    pub fn new(config: ControllerConfig) -> Self {
        let to = (0..config.n_to_coproc)
            .map(|i| ChannelState::new(ChannelId::to_coproc(i), config.to_coproc_fifo_depth));
        let from = (0..config.n_from_coproc)
            .map(|i| ChannelState::new(ChannelId::from_coproc(i), config.from_coproc_fifo_depth));
        let channels = to.chain(from).collect();

        Self {
            coproc_config: vec![0; config.n_config.min(MWMR_IOREG_MAX) as usize],
            coproc_status: vec![0; config.n_status.min(MWMR_IOREG_MAX) as usize],
            config,
            channels,
            phase: Phase::Idle,
            last_elected: 0,
            committed: None,
            selected_way: Direction::ToCoprocessor,
            selected_no: 0,
            pending_reset: false,
            tick_count: 0,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().map(|c| c.id)
    }

    fn slot_of(&self, id: ChannelId) -> SimResult<usize> {
        let (count, offset) = match id.direction {
            Direction::ToCoprocessor => (self.config.n_to_coproc, 0),
            Direction::FromCoprocessor => (self.config.n_from_coproc, self.config.n_to_coproc),
        };
        if id.index >= count {
            return Err(SimulationError::InvalidChannel {
                direction: id.direction,
                index: id.index,
            });
        }
        Ok((offset + id.index) as usize)
    }

    fn channel(&self, id: ChannelId) -> SimResult<&ChannelState> {
        let slot = self.slot_of(id)?;
        Ok(&self.channels[slot])
    }

    /// Programs a channel directly, bypassing the register file.
    pub fn configure(&mut self, id: ChannelId, config: ChannelConfig) -> SimResult<()> {
        if config.direction != id.direction {
            return Err(SimulationError::InvalidConfig(format!(
                "channel {} configured with direction {}",
                id, config.direction
            )));
        }
        let slot = self.slot_of(id)?;
        self.channels[slot].config = config;
        self.check_channel(slot);
        Ok(())
    }

    pub fn channel_config(&self, id: ChannelId) -> SimResult<ChannelConfig> {
        Ok(self.channel(id)?.config)
    }

    pub fn staging(&self, id: ChannelId) -> SimResult<&StagingBuffer> {
        Ok(&self.channel(id)?.staging)
    }

    pub fn stats(&self, id: ChannelId) -> SimResult<ChannelStats> {
        Ok(self.channel(id)?.stats)
    }

    pub fn cooldown(&self, id: ChannelId) -> SimResult<u32> {
        Ok(self.channel(id)?.cooldown)
    }

    /// Staging occupancy, as reported by `FIFO_FILL_STATUS`.
    pub fn fill_status(&self, id: ChannelId) -> SimResult<u32> {
        Ok(self.channel(id)?.staging.occupancy())
    }

    /// Requests a reset. It takes effect on the next tick in which no lock
    /// acquisition is in progress.
    pub fn reset(&mut self) {
        self.pending_reset = true;
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn coproc_config(&self) -> &[u32] {
        &self.coproc_config
    }

    pub fn coproc_status(&self) -> &[u32] {
        &self.coproc_status
    }

    fn check_channel(&self, slot: usize) {
        let ch = &self.channels[slot];
        let cfg = &ch.config;
        if !cfg.running {
            return;
        }
        if !cfg.is_usable() {
            tracing::warn!(
                "Channel {} running with width {} and depth {}; it will never be elected",
                ch.id,
                cfg.burst_words,
                cfg.capacity_words
            );
            return;
        }
        let fits = match cfg.direction {
            Direction::ToCoprocessor => cfg.burst_words < ch.staging.capacity(),
            Direction::FromCoprocessor => cfg.burst_words <= ch.staging.capacity(),
        };
        if !fits {
            tracing::warn!(
                "Channel {} burst of {} words does not fit its {}-word staging buffer",
                ch.id,
                cfg.burst_words,
                ch.staging.capacity()
            );
        }
    }

    fn apply_reset(&mut self) {
        for ch in &mut self.channels {
            ch.config.running = false;
            ch.cooldown = 0;
            ch.staging.clear();
        }
        self.selected_way = Direction::ToCoprocessor;
        self.selected_no = 0;
        self.last_elected = 0;
        self.pending_reset = false;
        tracing::info!("MWMR controller reset");
    }

    /// Picks the next channel to service.
    ///
    /// The scan starts at the previous winner itself, so a channel that stays
    /// ready is picked again as soon as its cooldown expires.
    fn elect(&mut self, observers: &[Arc<dyn ChannelObserver>]) -> Option<usize> {
        let n = self.channels.len();
        for k in 0..n {
            let slot = (self.last_elected + k) % n;
            let ch = &mut self.channels[slot];
            if ch.cooldown > 0 {
                continue;
            }
            if !ch.config.running {
                ch.stats.not_running_skips += 1;
                for observer in observers {
                    observer.on_not_running(ch.id);
                }
                continue;
            }
            if ch.config.is_usable() && ch.ready() {
                self.last_elected = slot;
                tracing::debug!("Elected channel {}", ch.id);
                for observer in observers {
                    observer.on_election(ch.id);
                }
                return Some(slot);
            }
        }
        None
    }

    /// One LL/SC attempt on the channel lock.
    fn try_lock(&self, bus: &dyn BusTransport, slot: usize) -> SimResult<bool> {
        let addr = self.channels[slot].config.layout.lock_address();
        let initiator = self.config.initiator_id;
        if bus.locked_read(initiator, addr)? != 0 {
            return Ok(false);
        }
        bus.store_conditional(initiator, addr, 1)
    }

    /// Advances the controller by one tick.
    ///
    /// The coprocessor model steps first against the pass-through registers
    /// and its handshakes are sampled. The controller then performs at most
    /// one lock attempt and, once the lock is held, a complete status read,
    /// burst and commit. Remaining port handshakes and cooldowns are applied
    /// last.
    pub fn tick(
        &mut self,
        bus: &dyn BusTransport,
        port: &mut dyn CoprocessorPort,
        observers: &[Arc<dyn ChannelObserver>],
    ) -> SimResult<TickOutcome> {
        port.tick(&self.coproc_config, &mut self.coproc_status);
        let mut handshakes = self.sample_port(port);
        self.committed = None;

        let result = self.step(bus, port, &mut handshakes, observers);
        if result.is_err() {
            self.phase = Phase::Idle;
        }
        if result == Ok(TickOutcome::Reset) {
            handshakes.fill(Handshake::None);
        }

        self.apply_port(port, &handshakes);

        for (slot, ch) in self.channels.iter_mut().enumerate() {
            if Some(slot) != self.committed {
                ch.cooldown = ch.cooldown.saturating_sub(1);
            }
        }
        self.tick_count += 1;
        result
    }

    fn sample_port(&self, port: &mut dyn CoprocessorPort) -> Vec<Handshake> {
        self.channels
            .iter()
            .map(|ch| match ch.id.direction {
                Direction::ToCoprocessor => {
                    if !ch.staging.is_empty() && port.ready_to_consume(ch.id.index) {
                        Handshake::Consume
                    } else {
                        Handshake::None
                    }
                }
                Direction::FromCoprocessor => {
                    if ch.staging.is_full() {
                        return Handshake::None;
                    }
                    port.produce(ch.id.index)
                        .map_or(Handshake::None, Handshake::Produced)
                }
            })
            .collect()
    }

    fn apply_port(&mut self, port: &mut dyn CoprocessorPort, handshakes: &[Handshake]) {
        for (ch, hs) in self.channels.iter_mut().zip(handshakes) {
            match *hs {
                Handshake::None => {}
                Handshake::Consume => {
                    if let Some(word) = ch.staging.pop() {
                        port.consume(ch.id.index, word);
                    }
                }
                Handshake::Produced(word) => {
                    if !ch.staging.push(word) {
                        tracing::warn!("Channel {} dropped coprocessor word {:#x}", ch.id, word);
                    }
                }
            }
        }
    }

    fn step(
        &mut self,
        bus: &dyn BusTransport,
        port: &mut dyn CoprocessorPort,
        handshakes: &mut [Handshake],
        observers: &[Arc<dyn ChannelObserver>],
    ) -> SimResult<TickOutcome> {
        let slot = match self.phase {
            Phase::Acquiring { slot } => slot,
            Phase::Idle => {
                if self.pending_reset {
                    self.apply_reset();
                    return Ok(TickOutcome::Reset);
                }
                match self.elect(observers) {
                    Some(slot) => {
                        self.phase = Phase::Acquiring { slot };
                        slot
                    }
                    None => return Ok(TickOutcome::Idle),
                }
            }
        };

        if !self.try_lock(bus, slot)? {
            let ch = &mut self.channels[slot];
            ch.stats.lock_retries += 1;
            tracing::trace!("Channel {} lock busy", ch.id);
            for observer in observers {
                observer.on_lock_retry(ch.id);
            }
            return Ok(TickOutcome::LockRetry(ch.id));
        }

        self.phase = Phase::Idle;
        self.committed = Some(slot);
        self.transfer(bus, slot, port, &mut handshakes[slot], observers)
    }

    /// Runs the locked part of a transaction: status read, decide, burst, commit.
    ///
    /// A bus error while the lock is held releases the lock and backs the
    /// channel off before the error is returned. Staging contents and the
    /// port handshake are only updated once the commit went through.
    fn transfer(
        &mut self,
        bus: &dyn BusTransport,
        slot: usize,
        port: &mut dyn CoprocessorPort,
        handshake: &mut Handshake,
        observers: &[Arc<dyn ChannelObserver>],
    ) -> SimResult<TickOutcome> {
        let result = self.locked_transfer(bus, slot, port, handshake, observers);
        if let Err(e) = &result {
            let backoff = self.config.backoff;
            let ch = &mut self.channels[slot];
            ch.cooldown = backoff;
            ch.stats.bailouts += 1;
            tracing::warn!("Channel {} transfer aborted: {}", ch.id, e);
            if let Err(release) = ch.config.layout.release(bus) {
                tracing::warn!("Channel {} lock not released: {}", ch.id, release);
            }
        }
        result
    }

    fn locked_transfer(
        &mut self,
        bus: &dyn BusTransport,
        slot: usize,
        port: &mut dyn CoprocessorPort,
        handshake: &mut Handshake,
        observers: &[Arc<dyn ChannelObserver>],
    ) -> SimResult<TickOutcome> {
        let plaps = self.config.plaps;
        let backoff = self.config.backoff;
        let ch = &mut self.channels[slot];
        let cfg = ch.config;
        let burst = cfg.burst_words;
        let cap = cfg.capacity_words;
        let mut status = cfg.layout.read_status(bus)?;

        let in_range = status.usage <= cap && status.read_ptr < cap && status.write_ptr < cap;
        if !in_range {
            tracing::warn!("Channel {} descriptor out of range: {:?}", ch.id, status);
        }
        // Registers may have been rewritten while the lock was being acquired.
        let staging_ready = cfg.is_usable() && ch.ready();
        if !staging_ready {
            tracing::warn!("Channel {} staging no longer ready for a burst", ch.id);
        }

        let can_move = in_range
            && staging_ready
            && match cfg.direction {
                Direction::ToCoprocessor => status.usage >= burst,
                Direction::FromCoprocessor => burst <= cap - status.usage,
            };

        if !can_move {
            cfg.layout.release(bus)?;
            ch.cooldown = backoff;
            ch.stats.bailouts += 1;
            tracing::debug!(
                "Channel {} bail-out (usage {}/{}), backoff {}",
                ch.id,
                status.usage,
                cap,
                backoff
            );
            for observer in observers {
                observer.on_bailout(ch.id);
            }
            return Ok(TickOutcome::BailedOut(ch.id));
        }

        let mut staging = ch.staging.clone();
        let mut consumed = None;
        let mut words = vec![0u32; burst as usize];
        match cfg.direction {
            Direction::ToCoprocessor => {
                read_ring(bus, &cfg, status.read_ptr, &mut words)?;
                status.advance_read(burst, cap);
                for (i, word) in words.iter().enumerate() {
                    if i == 0 && *handshake == Handshake::Consume {
                        consumed = Some(staging.push_and_pop(*word));
                    } else if !staging.push(*word) {
                        return Err(staging_fault(ch.id));
                    }
                }
            }
            Direction::FromCoprocessor => {
                for (i, word) in words.iter_mut().enumerate() {
                    *word = match (i, *handshake) {
                        (0, Handshake::Produced(incoming)) => staging.push_and_pop(incoming),
                        _ => staging.pop().ok_or_else(|| staging_fault(ch.id))?,
                    };
                }
                write_ring(bus, &cfg, status.write_ptr, &words)?;
                status.advance_write(burst, cap);
            }
        }

        cfg.layout.commit(bus, &status)?;
        ch.staging = staging;
        if let Some(word) = consumed {
            port.consume(ch.id.index, word);
        }
        if matches!(*handshake, Handshake::Consume | Handshake::Produced(_)) {
            *handshake = Handshake::None;
        }
        ch.cooldown = plaps;
        ch.stats.services += 1;
        ch.stats.words_moved += burst as u64;
        tracing::debug!(
            "Channel {} moved {} words, usage now {}/{}",
            ch.id,
            burst,
            status.usage,
            cap
        );
        for observer in observers {
            observer.on_transfer(ch.id, burst);
        }
        Ok(TickOutcome::Transferred {
            channel: ch.id,
            words: burst,
        })
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let acquiring = match self.phase {
            Phase::Acquiring { slot } => Some(self.channels[slot].id),
            Phase::Idle => None,
        };
        ControllerSnapshot {
            tick: self.tick_count,
            plaps: self.config.plaps,
            backoff: self.config.backoff,
            last_elected: self.channels.get(self.last_elected).map(|c| c.id),
            acquiring,
            reset_pending: self.pending_reset,
            channels: self
                .channels
                .iter()
                .map(|ch| ChannelSnapshot {
                    id: ch.id,
                    config: ch.config,
                    cooldown: ch.cooldown,
                    staging_occupancy: ch.staging.occupancy(),
                    staging_capacity: ch.staging.capacity(),
                    stats: ch.stats,
                })
                .collect(),
            coproc_config: self.coproc_config.clone(),
            coproc_status: self.coproc_status.clone(),
        }
    }

    fn selected_slot(&self) -> SimResult<usize> {
        self.slot_of(ChannelId {
            direction: self.selected_way,
            index: self.selected_no,
        })
    }
}

/// Reads `out.len()` ring words starting at slot `ptr`, split in two bus
/// transactions when the run crosses the end of the ring.
fn read_ring(bus: &dyn BusTransport, cfg: &ChannelConfig, ptr: u32, out: &mut [u32]) -> SimResult<()> {
    let first = out.len().min((cfg.capacity_words - ptr) as usize);
    let (head, tail) = out.split_at_mut(first);
    bus.read_block(cfg.slot_address(ptr), head)?;
    if !tail.is_empty() {
        bus.read_block(cfg.base_address, tail)?;
    }
    Ok(())
}

fn write_ring(bus: &dyn BusTransport, cfg: &ChannelConfig, ptr: u32, data: &[u32]) -> SimResult<()> {
    let first = data.len().min((cfg.capacity_words - ptr) as usize);
    let (head, tail) = data.split_at(first);
    bus.write_block(cfg.slot_address(ptr), head)?;
    if !tail.is_empty() {
        bus.write_block(cfg.base_address, tail)?;
    }
    Ok(())
}

fn staging_fault(id: ChannelId) -> SimulationError {
    SimulationError::InvalidConfig(format!("channel {} staging cannot hold a full burst", id))
}

fn decode_error(reg: u32) -> SimulationError {
    SimulationError::AddressDecode(reg as u64 * WORD_BYTES)
}

impl ControllerRegisters for MwmrController {
    fn read_register(&self, reg: u32) -> SimResult<u32> {
        if reg < MWMR_IOREG_MAX {
            return self
                .coproc_status
                .get(reg as usize)
                .copied()
                .ok_or_else(|| decode_error(reg));
        }
        let register = Register::from_index(reg).ok_or_else(|| decode_error(reg))?;
        match register {
            Register::Reset => return Err(decode_error(reg)),
            Register::ConfigFifoWay => return Ok(self.selected_way.register_value()),
            Register::ConfigFifoNo => return Ok(self.selected_no),
            _ => {}
        }

        let ch = &self.channels[self.selected_slot()?];
        let cfg = &ch.config;
        let value = match register {
            Register::ConfigStatusAddr => cfg.layout.status_address as u32,
            Register::ConfigDepth => cfg.capacity_words,
            Register::ConfigBufferAddr => cfg.base_address as u32,
            Register::ConfigLockAddr => match cfg.layout.lock {
                LockPlacement::Bundled => 0,
                LockPlacement::Separate { address } => address as u32,
            },
            Register::ConfigRunning => cfg.running as u32,
            Register::ConfigWidth => cfg.burst_words,
            Register::FifoFillStatus => ch.staging.occupancy(),
            Register::ConfigLayout => cfg.layout.fields.register_value(),
            Register::Reset | Register::ConfigFifoWay | Register::ConfigFifoNo => 0,
        };
        Ok(value)
    }

    fn write_register(&mut self, reg: u32, value: u32) -> SimResult<()> {
        if reg < MWMR_IOREG_MAX {
            let slot = self
                .coproc_config
                .get_mut(reg as usize)
                .ok_or_else(|| decode_error(reg))?;
            *slot = value;
            return Ok(());
        }
        let register = Register::from_index(reg).ok_or_else(|| decode_error(reg))?;
        match register {
            Register::Reset => {
                self.reset();
                return Ok(());
            }
            Register::ConfigFifoWay => {
                self.selected_way = Direction::from_register(value);
                return Ok(());
            }
            Register::ConfigFifoNo => {
                self.selected_no = value;
                return Ok(());
            }
            Register::FifoFillStatus => return Err(decode_error(reg)),
            _ => {}
        }

        let slot = self.selected_slot()?;
        let cfg = &mut self.channels[slot].config;
        match register {
            Register::ConfigStatusAddr => cfg.layout.status_address = value as u64,
            Register::ConfigDepth => cfg.capacity_words = value,
            Register::ConfigBufferAddr => cfg.base_address = value as u64,
            Register::ConfigLockAddr => {
                cfg.layout.lock = if value == 0 {
                    LockPlacement::Bundled
                } else {
                    LockPlacement::Separate {
                        address: value as u64,
                    }
                }
            }
            Register::ConfigRunning => cfg.running = value != 0,
            Register::ConfigWidth => cfg.burst_words = value,
            Register::ConfigLayout => cfg.layout.fields = DescriptorLayout::from_register(value),
            Register::Reset
            | Register::ConfigFifoWay
            | Register::ConfigFifoNo
            | Register::FifoFillStatus => {}
        }
        tracing::trace!("Channel {} {:?} <- {:#x}", self.channels[slot].id, register, value);
        if register == Register::ConfigRunning {
            self.check_channel(slot);
        }
        Ok(())
    }
}

/// Controller shared between a driver thread and software threads.
#[derive(Clone)]
pub struct SharedController(Arc<Mutex<MwmrController>>);

impl SharedController {
    pub fn new(controller: MwmrController) -> Self {
        Self(Arc::new(Mutex::new(controller)))
    }

    pub fn lock(&self) -> MutexGuard<'_, MwmrController> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ControllerRegisters for SharedController {
    fn read_register(&self, reg: u32) -> SimResult<u32> {
        self.lock().read_register(reg)
    }

    fn write_register(&mut self, reg: u32, value: u32) -> SimResult<()> {
        self.lock().write_register(reg, value)
    }
}
