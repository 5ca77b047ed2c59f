mod coordinator;
mod state;
mod surface;
mod throttle;

pub use coordinator::ScrollCoordinator;
pub use state::{FollowMode, ScrollState};
pub use surface::{ScrollAnchor, ScrollBehavior, ScrollMetrics, ScrollSurface};
pub use throttle::ScrollThrottle;
