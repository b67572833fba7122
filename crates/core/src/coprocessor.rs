// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::VecDeque;

/// Accelerator side of the controller's staging buffers.
///
/// `index` is the channel index within its direction. The controller calls
/// `ready_to_consume`/`consume` for to-coprocessor channels and `produce` for
/// from-coprocessor channels, at most one word per channel per tick. `tick`
/// runs once at the start of every controller tick with the pass-through
/// register arrays.
pub trait CoprocessorPort: Send {
    fn ready_to_consume(&self, index: u32) -> bool;
    fn consume(&mut self, index: u32, word: u32);
    /// Offers the next output word of `index`, if any. Only called when the
    /// staging buffer has room, so a returned word is never dropped.
    fn produce(&mut self, index: u32) -> Option<u32>;
    fn tick(&mut self, _config: &[u32], _status: &mut [u32]) {}
}

/// Copies to-coprocessor channel `i` onto from-coprocessor channel `i`,
/// adding the value of config register 0 to every word.
///
/// Status register 0 counts the words processed, register 1 the words held
/// inside the model.
#[derive(Debug, Default)]
pub struct Loopback {
    lanes: Vec<VecDeque<u32>>,
    depth: usize,
    increment: u32,
    processed: u32,
}

impl Loopback {
    pub fn new(channels: u32, depth: usize) -> Self {
        Self {
            lanes: (0..channels).map(|_| VecDeque::with_capacity(depth)).collect(),
            depth,
            increment: 0,
            processed: 0,
        }
    }

    pub fn processed(&self) -> u32 {
        self.processed
    }

    fn in_flight(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

impl CoprocessorPort for Loopback {
    fn ready_to_consume(&self, index: u32) -> bool {
        self.lanes
            .get(index as usize)
            .is_some_and(|lane| lane.len() < self.depth)
    }

    fn consume(&mut self, index: u32, word: u32) {
        if let Some(lane) = self.lanes.get_mut(index as usize) {
            lane.push_back(word.wrapping_add(self.increment));
            self.processed = self.processed.wrapping_add(1);
        }
    }

    fn produce(&mut self, index: u32) -> Option<u32> {
        self.lanes.get_mut(index as usize)?.pop_front()
    }

    fn tick(&mut self, config: &[u32], status: &mut [u32]) {
        if let Some(&inc) = config.first() {
            self.increment = inc;
        }
        if let Some(s) = status.get_mut(0) {
            *s = self.processed;
        }
        if let Some(s) = status.get_mut(1) {
            *s = self.in_flight() as u32;
        }
    }
}

/// Emits preloaded words on from-coprocessor channels.
#[derive(Debug, Default, Clone)]
pub struct Source {
    pending: Vec<VecDeque<u32>>,
}

impl Source {
    pub fn new(channels: u32) -> Self {
        Self {
            pending: vec![VecDeque::new(); channels as usize],
        }
    }

    pub fn feed(&mut self, index: u32, words: impl IntoIterator<Item = u32>) {
        if let Some(queue) = self.pending.get_mut(index as usize) {
            queue.extend(words);
        }
    }

    pub fn remaining(&self, index: u32) -> usize {
        self.pending.get(index as usize).map_or(0, VecDeque::len)
    }
}

/// Collects words arriving on to-coprocessor channels, accepting at most one
/// word every `interval` ticks per channel.
#[derive(Debug, Default, Clone)]
pub struct Sink {
    received: Vec<Vec<u32>>,
    interval: u32,
    countdown: Vec<u32>,
}

impl Sink {
    pub fn new(channels: u32) -> Self {
        Self::with_interval(channels, 1)
    }

    pub fn with_interval(channels: u32, interval: u32) -> Self {
        Self {
            received: vec![Vec::new(); channels as usize],
            interval: interval.max(1),
            countdown: vec![0; channels as usize],
        }
    }

    pub fn received(&self, index: u32) -> &[u32] {
        self.received
            .get(index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A [`Source`] and a [`Sink`] behind one port.
#[derive(Debug, Default, Clone)]
pub struct SourceSink {
    pub source: Source,
    pub sink: Sink,
}

impl SourceSink {
    pub fn new(source: Source, sink: Sink) -> Self {
        Self { source, sink }
    }
}

impl CoprocessorPort for Source {
    fn ready_to_consume(&self, _index: u32) -> bool {
        false
    }

    fn consume(&mut self, _index: u32, _word: u32) {}

    fn produce(&mut self, index: u32) -> Option<u32> {
        self.pending.get_mut(index as usize)?.pop_front()
    }
}

impl CoprocessorPort for Sink {
    fn ready_to_consume(&self, index: u32) -> bool {
        self.countdown.get(index as usize) == Some(&0)
    }

    fn consume(&mut self, index: u32, word: u32) {
        let i = index as usize;
        if let (Some(rx), Some(cd)) = (self.received.get_mut(i), self.countdown.get_mut(i)) {
            rx.push(word);
            *cd = self.interval;
        }
    }

    fn produce(&mut self, _index: u32) -> Option<u32> {
        None
    }

    fn tick(&mut self, _config: &[u32], status: &mut [u32]) {
        for cd in &mut self.countdown {
            *cd = cd.saturating_sub(1);
        }
        if let Some(s) = status.get_mut(0) {
            *s = self.received.iter().map(Vec::len).sum::<usize>() as u32;
        }
    }
}

impl CoprocessorPort for SourceSink {
    fn ready_to_consume(&self, index: u32) -> bool {
        self.sink.ready_to_consume(index)
    }

    fn consume(&mut self, index: u32, word: u32) {
        self.sink.consume(index, word)
    }

    fn produce(&mut self, index: u32) -> Option<u32> {
        self.source.produce(index)
    }

    fn tick(&mut self, config: &[u32], status: &mut [u32]) {
        self.sink.tick(config, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_applies_increment_from_config() {
        let mut lb = Loopback::new(1, 2);
        let mut status = [0u32; 4];
        lb.tick(&[10, 0], &mut status);
        assert!(lb.ready_to_consume(0));
        lb.consume(0, 1);
        lb.consume(0, 2);
        assert!(!lb.ready_to_consume(0));
        lb.tick(&[10, 0], &mut status);
        assert_eq!(status[0], 2);
        assert_eq!(status[1], 2);
        assert_eq!(lb.produce(0), Some(11));
        assert_eq!(lb.produce(0), Some(12));
        assert_eq!(lb.produce(0), None);
    }

    #[test]
    fn test_loopback_unknown_lane() {
        let mut lb = Loopback::new(1, 2);
        assert!(!lb.ready_to_consume(3));
        lb.consume(3, 1);
        assert_eq!(lb.produce(3), None);
        assert_eq!(lb.processed(), 0);
    }

    #[test]
    fn test_sink_interval_throttles() {
        let mut sink = Sink::with_interval(1, 2);
        let mut status = [0u32; 1];
        assert!(sink.ready_to_consume(0));
        sink.consume(0, 5);
        sink.tick(&[], &mut status);
        assert!(!sink.ready_to_consume(0));
        sink.tick(&[], &mut status);
        assert!(sink.ready_to_consume(0));
        assert_eq!(sink.received(0), &[5]);
        assert_eq!(status[0], 1);
    }

    #[test]
    fn test_source_drains_in_order() {
        let mut src = Source::new(2);
        src.feed(1, [7, 8]);
        assert_eq!(src.produce(0), None);
        assert_eq!(src.produce(1), Some(7));
        assert_eq!(src.remaining(1), 1);
    }
}
