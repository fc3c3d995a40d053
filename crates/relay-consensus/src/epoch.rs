// Epoch clock - deterministic mapping from wall-clock time to epochs
//
// SAFETY INVARIANTS:
// 1. Epoch is a pure function of the timestamp and the genesis parameters
// 2. Epochs are monotonic in time
// 3. Timestamps before genesis map to epoch 0

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{RelayError, RelayResult};

/// Epoch parameters of the source chain: immutable after genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClock {
    /// Unix timestamp (seconds) at which epoch 0 starts
    pub genesis_time: u64,

    /// Length of each epoch in seconds. Must be > 0.
    pub epoch_duration: u64,
}

impl EpochClock {
    pub fn new(genesis_time: u64, epoch_duration: u64) -> RelayResult<Self> {
        if epoch_duration == 0 {
            return Err(RelayError::InvalidConfig("epoch_duration must be > 0".to_string()));
        }
        Ok(EpochClock { genesis_time, epoch_duration })
    }

    /// Compute the epoch for a given timestamp.
    ///
    /// Formula: epoch = (now - genesis_time) / epoch_duration
    pub fn epoch_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.genesis_time) / self.epoch_duration
    }

    /// Timestamp range covered by an epoch.
    pub fn time_range(&self, epoch: u64) -> Range<u64> {
        let start = self.epoch_start_time(epoch);
        start..start.saturating_add(self.epoch_duration)
    }

    pub fn epoch_start_time(&self, epoch: u64) -> u64 {
        self.genesis_time.saturating_add(epoch.saturating_mul(self.epoch_duration))
    }
}

/// Source of the current time, in Unix seconds.
pub trait TimeSource {
    fn now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// A settable clock. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        ManualClock { now: Arc::new(AtomicU64::new(now)) }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
