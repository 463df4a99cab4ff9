pub mod aggregate;
pub mod broadcast;
pub mod config;
pub mod event;
pub mod logging;
pub mod pattern;
pub mod pipeline;
pub mod watcher;

pub use aggregate::EventAggregator;
pub use broadcast::{Broadcaster, ChannelSink, NotificationSink, SubscriberId};
pub use config::Settings;
pub use event::{ChangeKind, ChangeRecord, Envelope, NotificationPayload};
pub use pattern::PatternMatcher;
pub use pipeline::{HandlerId, Pipeline};
pub use watcher::{
    DebounceFilter, DeliveryError, WatchDescriptor, WatchError, WatchRegistry, WatchStatus,
};
