//! Watch registry: one native filesystem watch per root path.
//!
//! Raw notify callbacks arrive on the watch backend's own thread and are
//! handed off over a bounded channel into a per-watch tokio task, which
//! owns all mutable filter state (matcher, debounce table, status
//! counters). Teardown drops the native watcher synchronously; a failure
//! while handling one raw event is recorded in the watch status and never
//! kills the watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use super::debounce::DebounceFilter;
use super::error::WatchError;
use crate::event::{ChangeKind, ChangeRecord};
use crate::pattern::PatternMatcher;

/// Configuration for one directory watch.
#[derive(Debug, Clone)]
pub struct WatchDescriptor {
    pub root: PathBuf,
    pub scope: Option<String>,
    pub recursive: bool,
    /// Ordered gitignore-style rules, compiled once at watch start.
    pub ignore_rules: Vec<String>,
    pub debounce_window: Duration,
    pub max_file_size_bytes: u64,
}

impl WatchDescriptor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scope: None,
            recursive: true,
            ignore_rules: Vec::new(),
            debounce_window: Duration::from_millis(500),
            max_file_size_bytes: 100 * 1024 * 1024,
        }
    }

    pub fn scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn ignore_rules(mut self, rules: Vec<String>) -> Self {
        self.ignore_rules = rules;
        self
    }

    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn max_file_size_bytes(mut self, max: u64) -> Self {
        self.max_file_size_bytes = max;
        self
    }
}

/// Read-only health snapshot of a watch.
#[derive(Debug, Clone, Serialize)]
pub struct WatchStatus {
    pub root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    pub event_count: u64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WatchStatus {
    fn new(root: PathBuf, scope: Option<String>) -> Self {
        Self {
            root,
            scope,
            is_active: true,
            created_at: Utc::now(),
            last_event_at: None,
            event_count: 0,
            error_count: 0,
            last_error: None,
        }
    }
}

type StatusCell = Arc<RwLock<WatchStatus>>;

struct WatchEntry {
    descriptor: WatchDescriptor,
    /// Dropping releases the OS watch handle. Wrapped so entries stay
    /// shareable across registry callers.
    _watcher: Mutex<notify::RecommendedWatcher>,
    task: tokio::task::JoinHandle<()>,
}

/// Owns all active watches, keyed by canonicalized root path.
///
/// Invariant: at most one active watch per normalized root. Statuses
/// outlive their watch so a stopped root still reports `is_active: false`.
pub struct WatchRegistry {
    watches: DashMap<PathBuf, WatchEntry>,
    statuses: DashMap<PathBuf, StatusCell>,
    channel_capacity: usize,
}

impl WatchRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            watches: DashMap::new(),
            statuses: DashMap::new(),
            channel_capacity,
        }
    }

    /// Start watching `descriptor.root`, forwarding accepted records to
    /// `output`. An existing watch on the same normalized root is stopped
    /// first: duplicate registration is an explicit re-arm, not an error.
    pub fn start_watch(
        &self,
        descriptor: WatchDescriptor,
        output: mpsc::Sender<ChangeRecord>,
    ) -> Result<(), WatchError> {
        let meta = std::fs::metadata(&descriptor.root).map_err(|_| WatchError::PathNotFound {
            path: descriptor.root.clone(),
        })?;
        if !meta.is_dir() {
            return Err(WatchError::NotADirectory {
                path: descriptor.root.clone(),
            });
        }

        let root = normalize_root(&descriptor.root);
        self.stop_watch(&root);

        let descriptor = WatchDescriptor {
            root: root.clone(),
            ..descriptor
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                // backend thread; blocks only when the pipeline lags behind
                let _ = tx.blocking_send(res);
            })
            .map_err(|e| WatchError::StartFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        let mode = if descriptor.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&root, mode)
            .map_err(|e| WatchError::StartFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        let status: StatusCell = Arc::new(RwLock::new(WatchStatus::new(
            root.clone(),
            descriptor.scope.clone(),
        )));
        self.statuses.insert(root.clone(), Arc::clone(&status));

        let processor = EventProcessor::new(descriptor.clone(), status, output);
        let task = tokio::spawn(processor.run(rx));

        crate::log_event!("watch", "started", "{} (recursive={})", root.display(), descriptor.recursive);
        self.watches.insert(
            root,
            WatchEntry {
                descriptor,
                _watcher: Mutex::new(watcher),
                task,
            },
        );
        Ok(())
    }

    /// Stop the watch on `root`. Returns false when no watch was active.
    /// The native handle is released before this returns.
    pub fn stop_watch(&self, root: &Path) -> bool {
        let root = normalize_root(root);
        match self.watches.remove(&root) {
            Some((_, entry)) => {
                entry.task.abort();
                if let Some(status) = self.statuses.get(&root) {
                    status.write().is_active = false;
                }
                // entry (and the native watcher) drops here
                crate::log_event!("watch", "stopped", "{}", root.display());
                true
            }
            None => false,
        }
    }

    /// Tear down every active watch.
    pub fn stop_all(&self) {
        let roots: Vec<PathBuf> = self.watches.iter().map(|e| e.key().clone()).collect();
        for root in roots {
            self.stop_watch(&root);
        }
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.watches.contains_key(&normalize_root(root))
    }

    /// Status snapshot for one root, if it was ever watched.
    pub fn status(&self, root: &Path) -> Option<WatchStatus> {
        self.statuses
            .get(&normalize_root(root))
            .map(|cell| cell.read().clone())
    }

    /// Snapshots for every root ever watched, active and stopped.
    pub fn statuses(&self) -> Vec<WatchStatus> {
        self.statuses.iter().map(|e| e.read().clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.watches.len()
    }

    pub fn descriptor(&self, root: &Path) -> Option<WatchDescriptor> {
        self.watches
            .get(&normalize_root(root))
            .map(|e| e.descriptor.clone())
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        for entry in self.watches.iter() {
            entry.task.abort();
        }
    }
}

/// Canonical form used as the watch-table key, so `/proj` and `/proj/./`
/// collapse to one entry. Falls back to the given path when the root has
/// already disappeared.
fn normalize_root(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Per-watch task state: converts raw notify events into change records.
struct EventProcessor {
    descriptor: WatchDescriptor,
    matcher: PatternMatcher,
    debounce: DebounceFilter,
    status: StatusCell,
    output: mpsc::Sender<ChangeRecord>,
}

impl EventProcessor {
    fn new(descriptor: WatchDescriptor, status: StatusCell, output: mpsc::Sender<ChangeRecord>) -> Self {
        let matcher = PatternMatcher::compile(&descriptor.ignore_rules, &descriptor.root);
        let debounce = DebounceFilter::new(descriptor.debounce_window);
        Self {
            descriptor,
            matcher,
            debounce,
            status,
            output,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<notify::Result<Event>>) {
        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => {
                    if let Err(e) = self.handle(event).await {
                        self.record_error(&e);
                    }
                }
                Err(e) => {
                    self.record_error(&WatchError::Internal {
                        path: self.descriptor.root.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn handle(&mut self, event: Event) -> Result<(), WatchError> {
        for (kind, path, dest) in resolve_changes(&event) {
            let is_directory = path.is_dir();

            // a bare "directory modified" carries no information: content
            // changes surface as child create/delete events
            if kind == ChangeKind::Modified && is_directory {
                continue;
            }

            if self.matcher.ignored(&path, is_directory) {
                crate::debug_event!("watch", "ignored", "{}", path.display());
                continue;
            }

            // stat failure is expected for already-deleted paths
            let size_bytes = if is_directory {
                None
            } else {
                std::fs::metadata(&path).ok().map(|m| m.len())
            };
            if let Some(size) = size_bytes {
                if size > self.descriptor.max_file_size_bytes {
                    crate::debug_event!(
                        "watch",
                        "oversized",
                        "{} ({size} bytes)",
                        path.display()
                    );
                    continue;
                }
            }

            if self.debounce.should_suppress(&path, Instant::now()) {
                crate::debug_event!("watch", "debounced", "{}", path.display());
                continue;
            }

            let mut record = ChangeRecord::new(kind, path)
                .with_directory(is_directory)
                .with_size(size_bytes)
                .with_scope(self.descriptor.scope.clone())
                .with_metadata("watch_root", self.descriptor.root.to_string_lossy())
                .with_metadata("recursive", self.descriptor.recursive.to_string());
            if let Some(dest) = dest {
                record = record.with_dest(dest);
            }

            {
                let mut status = self.status.write();
                status.event_count += 1;
                status.last_event_at = Some(record.timestamp);
            }

            if self.output.send(record).await.is_err() {
                // pipeline stopped; keep the watch alive, drop the record
                crate::debug_event!("watch", "dropped", "pipeline not running");
            }
        }
        Ok(())
    }

    fn record_error(&self, error: &WatchError) {
        tracing::error!("[watch] {}: {error}", self.descriptor.root.display());
        let mut status = self.status.write();
        status.error_count += 1;
        status.last_error = Some(error.to_string());
    }
}

/// Resolve a raw notify event into typed changes.
///
/// A rename with both endpoints known becomes one `Moved`; a rename half
/// without a destination degrades to `Deleted` (source half) or `Created`
/// (destination half). Access and other informational events are dropped.
fn resolve_changes(event: &Event) -> Vec<(ChangeKind, PathBuf, Option<PathBuf>)> {
    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                out.push((ChangeKind::Created, path.clone(), None));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push((ChangeKind::Deleted, path.clone(), None));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                out.push((
                    ChangeKind::Moved,
                    event.paths[0].clone(),
                    Some(event.paths[1].clone()),
                ));
            }
            RenameMode::From => {
                if let Some(path) = event.paths.first() {
                    out.push((ChangeKind::Deleted, path.clone(), None));
                }
            }
            RenameMode::To => {
                if let Some(path) = event.paths.first() {
                    out.push((ChangeKind::Created, path.clone(), None));
                }
            }
            _ => {
                // rename with unknown direction: infer from existence
                for path in &event.paths {
                    let kind = if path.exists() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Deleted
                    };
                    out.push((kind, path.clone(), None));
                }
            }
        },
        EventKind::Modify(_) => {
            for path in &event.paths {
                out.push((ChangeKind::Modified, path.clone(), None));
            }
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }
    out
}
