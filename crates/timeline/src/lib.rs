#![deny(unsafe_code)]

//! Reconciles a chat's live message buffer, paginated history and scroll position into the
//! list a host draws.

pub mod context;
pub mod error;
pub mod events;
pub mod merge;
pub mod pagination;
pub mod scroll;
pub mod select;
pub mod settings;
pub mod testing;
pub mod timeline;

pub use context::TimelineContext;
pub use error::{TimelineError, TimelineResult};
pub use events::{GestureKind, ViewportEvent};
pub use merge::{merge_initial_page_with_loaded_messages, prepend_older_messages};
pub use pagination::{LoadMoreTicket, PaginationEngine, PrependOutcome};
pub use scroll::{
    FollowMode, ScrollAnchor, ScrollBehavior, ScrollCoordinator, ScrollMetrics, ScrollState,
    ScrollSurface,
};
pub use select::{SelectedSource, Selection, select_effective_messages};
pub use settings::{SettingsError, SettingsStore, TimelineSettings};
pub use timeline::{LoadMoreOutcome, PendingLoadMore, RenderSnapshot, Timeline};
