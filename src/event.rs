//! Change records and the notification payload emitted to subscribers.
//!
//! A [`ChangeRecord`] is one filesystem change after filtering: it carries
//! both a wall-clock timestamp (what subscribers see) and a monotonic
//! arrival instant (what the aggregation window is measured against).
//! Records are immutable once constructed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl ChangeKind {
    /// Terminal changes bypass the aggregation window and flush immediately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeKind::Deleted | ChangeKind::Moved)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Moved => "moved",
        };
        f.write_str(s)
    }
}

/// One filesystem change, post filtering and debounce.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    /// Absolute source path.
    pub path: PathBuf,
    /// Destination path, set only for `Moved`.
    pub dest_path: Option<PathBuf>,
    pub is_directory: bool,
    /// Current size, present for files that still exist and could be stat'd.
    pub size_bytes: Option<u64>,
    /// Wall-clock time the change was observed.
    pub timestamp: DateTime<Utc>,
    /// Monotonic arrival time, used by the aggregation window.
    pub arrived: Instant,
    /// Optional routing scope (project identifier).
    pub scope: Option<String>,
    /// Opaque context, e.g. the originating watch root.
    pub metadata: HashMap<String, String>,
}

impl ChangeRecord {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            dest_path: None,
            is_directory: false,
            size_bytes: None,
            timestamp: Utc::now(),
            arrived: Instant::now(),
            scope: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.dest_path = Some(dest.into());
        self
    }

    pub fn with_directory(mut self, is_directory: bool) -> Self {
        self.is_directory = is_directory;
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size_bytes = size;
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the transport-agnostic payload for this record.
    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            kind: self.kind,
            path: self.path.clone(),
            dest_path: self.dest_path.clone(),
            is_directory: self.is_directory,
            size_bytes: self.size_bytes,
            scope: self.scope.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Logical notification shape delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: ChangeKind,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<PathBuf>,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Wire envelope around a payload: `{ "type": "file_event", "data": ..., "timestamp": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: NotificationPayload,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn file_event(payload: NotificationPayload) -> Self {
        Self {
            message_type: "file_event".to_string(),
            data: payload,
            timestamp: Utc::now(),
        }
    }

    /// Serialize for delivery. Infallible in practice; a serialization
    /// failure is reported as a JSON error object rather than a panic.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"type\":\"error\",\"error\":\"{e}\"}}"))
    }
}

/// Convenience for tests and logging: a short human form.
pub fn describe(record: &ChangeRecord) -> String {
    match (&record.kind, &record.dest_path) {
        (ChangeKind::Moved, Some(dest)) => {
            format!("moved {} -> {}", record.path.display(), dest.display())
        }
        (kind, _) => format!("{kind} {}", record.path.display()),
    }
}

/// Normalize a path for use as a watch-table key or matcher candidate:
/// platform separators become `/`, a leading `./` is stripped.
pub fn normalize_slashes(path: &Path) -> String {
    let s = path.to_string_lossy();
    let s = s.replace(std::path::MAIN_SEPARATOR, "/");
    s.strip_prefix("./").map(str::to_string).unwrap_or(s)
}
