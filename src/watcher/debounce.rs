//! Per-path debounce filtering.
//!
//! Suppresses repeat events for the same path inside a short window. This
//! is single-event suppression: the first event of a burst passes through
//! immediately and later ones inside the window are dropped. Windowed
//! coalescing across paths is the aggregator's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Entries older than `window * EVICT_MULTIPLE` are stale and swept.
const EVICT_MULTIPLE: u32 = 10;
/// Sweep cadence, counted in `should_suppress` calls.
const EVICT_EVERY: u32 = 512;

/// Last-seen-timestamp table keyed by path.
#[derive(Debug)]
pub struct DebounceFilter {
    last_seen: HashMap<PathBuf, Instant>,
    window: Duration,
    calls: u32,
}

impl DebounceFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            last_seen: HashMap::new(),
            window,
            calls: 0,
        }
    }

    /// Returns true when an event for `path` fired less than one window
    /// ago. Suppression does not refresh the timestamp, so a steady stream
    /// of events still forwards one event per window rather than going
    /// silent forever.
    pub fn should_suppress(&mut self, path: &Path, now: Instant) -> bool {
        self.calls = self.calls.wrapping_add(1);
        if self.calls % EVICT_EVERY == 0 {
            self.evict(now);
        }

        if let Some(last) = self.last_seen.get(path) {
            if now.duration_since(*last) < self.window {
                return true;
            }
        }
        self.last_seen.insert(path.to_path_buf(), now);
        false
    }

    /// Forget a path, e.g. after its watch root is torn down.
    pub fn forget(&mut self, path: &Path) {
        self.last_seen.remove(path);
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn tracked_paths(&self) -> usize {
        self.last_seen.len()
    }

    /// Drop entries old enough that they can no longer suppress anything.
    fn evict(&mut self, now: Instant) {
        let horizon = self.window * EVICT_MULTIPLE;
        self.last_seen
            .retain(|_, seen| now.duration_since(*seen) < horizon);
    }
}
