//! Time-windowed aggregation of change records.
//!
//! Editors and build tools emit several events per logical save
//! (truncate+write, temp-file-then-rename). The aggregator keeps only the
//! latest record per path inside the current window so one notification
//! per path goes out per flush cycle, while destructive changes (delete,
//! move) request an immediate flush instead of waiting.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::event::ChangeRecord;

/// Windowed deduplication buffer keyed by path.
///
/// Arrival order is tracked separately from the per-path map: the first
/// arrival of a path fixes its position, and `drain_pending` returns
/// records oldest-arrival first.
#[derive(Debug)]
pub struct EventAggregator {
    window: Duration,
    max_pending: usize,
    /// Latest record per path in the current window.
    latest: HashMap<PathBuf, ChangeRecord>,
    /// (first arrival, path) in FIFO order, used for expiry and drain order.
    arrivals: VecDeque<(Instant, PathBuf)>,
}

impl EventAggregator {
    pub fn new(window: Duration, max_pending: usize) -> Self {
        Self {
            window,
            max_pending,
            latest: HashMap::new(),
            arrivals: VecDeque::new(),
        }
    }

    /// Buffer a record. Returns true when the caller should flush now
    /// instead of waiting for the periodic cycle: the record is terminal
    /// (delete/move), or the number of distinct pending paths has reached
    /// the configured ceiling.
    pub fn offer(&mut self, record: ChangeRecord) -> bool {
        self.expire(record.arrived);

        let terminal = record.kind.is_terminal();
        let path = record.path.clone();

        if self.latest.insert(path.clone(), record).is_none() {
            self.arrivals.push_back((Instant::now(), path));
        }

        terminal || self.latest.len() >= self.max_pending
    }

    /// Take all pending records in arrival order and clear the buffer.
    pub fn drain_pending(&mut self) -> Vec<ChangeRecord> {
        let mut drained = Vec::with_capacity(self.latest.len());
        while let Some((_, path)) = self.arrivals.pop_front() {
            if let Some(record) = self.latest.remove(&path) {
                drained.push(record);
            }
        }
        self.latest.clear();
        drained
    }

    /// Number of distinct paths currently buffered.
    pub fn pending_len(&self) -> usize {
        self.latest.len()
    }

    /// Drop entries whose first arrival is older than the window. Bounds
    /// memory when flushes are delayed.
    fn expire(&mut self, now: Instant) {
        while let Some((arrived, _)) = self.arrivals.front() {
            if now.duration_since(*arrived) < self.window {
                break;
            }
            if let Some((_, path)) = self.arrivals.pop_front() {
                self.latest.remove(&path);
            }
        }
    }
}
