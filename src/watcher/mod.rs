//! Filesystem watching layer.
//!
//! One native watch per root path, with raw OS notifications converted to
//! typed [`crate::event::ChangeRecord`]s after gitignore-style filtering,
//! a size ceiling, and per-path debouncing.
//!
//! ```text
//! notify backend thread
//!     | blocking_send (bounded channel)
//!     v
//! per-watch tokio task: resolve kind -> ignore rules -> size -> debounce
//!     |
//!     v
//! pipeline record channel
//! ```

mod debounce;
mod error;
mod registry;

pub use debounce::DebounceFilter;
pub use error::{DeliveryError, WatchError};
pub use registry::{WatchDescriptor, WatchRegistry, WatchStatus};
