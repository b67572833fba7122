// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{ChannelId, ChannelObserver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Controller-wide counters fed through [`ChannelObserver`].
#[derive(Debug)]
pub struct ChannelMetrics {
    elections: AtomicU64,
    lock_retries: AtomicU64,
    bailouts: AtomicU64,
    not_running: AtomicU64,
    words_moved: AtomicU64,
    words_by_channel: Mutex<HashMap<ChannelId, u64>>,
    start_time: Instant,
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self {
            elections: AtomicU64::new(0),
            lock_retries: AtomicU64::new(0),
            bailouts: AtomicU64::new(0),
            not_running: AtomicU64::new(0),
            words_moved: AtomicU64::new(0),
            words_by_channel: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.elections.store(0, Ordering::SeqCst);
        self.lock_retries.store(0, Ordering::SeqCst);
        self.bailouts.store(0, Ordering::SeqCst);
        self.not_running.store(0, Ordering::SeqCst);
        self.words_moved.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.words_by_channel.lock() {
            m.clear();
        }
    }

    pub fn get_elections(&self) -> u64 {
        self.elections.load(Ordering::SeqCst)
    }

    pub fn get_lock_retries(&self) -> u64 {
        self.lock_retries.load(Ordering::SeqCst)
    }

    pub fn get_bailouts(&self) -> u64 {
        self.bailouts.load(Ordering::SeqCst)
    }

    pub fn get_not_running(&self) -> u64 {
        self.not_running.load(Ordering::SeqCst)
    }

    pub fn get_words_moved(&self) -> u64 {
        self.words_moved.load(Ordering::SeqCst)
    }

    pub fn get_words(&self, channel: ChannelId) -> u64 {
        self.words_by_channel
            .lock()
            .ok()
            .and_then(|m| m.get(&channel).copied())
            .unwrap_or(0)
    }

    /// Words per wall-clock second since creation.
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_words_moved() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl ChannelObserver for ChannelMetrics {
    fn on_election(&self, _channel: ChannelId) {
        self.elections.fetch_add(1, Ordering::Relaxed);
    }

    fn on_lock_retry(&self, _channel: ChannelId) {
        self.lock_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn on_transfer(&self, channel: ChannelId, words: u32) {
        self.words_moved.fetch_add(words as u64, Ordering::Relaxed);
        if let Ok(mut m) = self.words_by_channel.lock() {
            *m.entry(channel).or_insert(0) += words as u64;
        }
    }

    fn on_bailout(&self, _channel: ChannelId) {
        self.bailouts.fetch_add(1, Ordering::Relaxed);
    }

    fn on_not_running(&self, _channel: ChannelId) {
        self.not_running.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_channel() {
        let metrics = ChannelMetrics::new();
        metrics.on_election(ChannelId::to_coproc(0));
        metrics.on_transfer(ChannelId::to_coproc(0), 4);
        metrics.on_transfer(ChannelId::from_coproc(0), 4);
        metrics.on_transfer(ChannelId::to_coproc(0), 4);
        metrics.on_bailout(ChannelId::to_coproc(0));

        assert_eq!(metrics.get_elections(), 1);
        assert_eq!(metrics.get_words_moved(), 12);
        assert_eq!(metrics.get_words(ChannelId::to_coproc(0)), 8);
        assert_eq!(metrics.get_words(ChannelId::to_coproc(1)), 0);
        assert_eq!(metrics.get_bailouts(), 1);

        metrics.reset();
        assert_eq!(metrics.get_words_moved(), 0);
        assert_eq!(metrics.get_words(ChannelId::from_coproc(0)), 0);
    }
}
