//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod key;
mod limiter;
mod registry;
mod rules;
mod sweeper;

pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{normalize_path, ClientKey, UNKNOWN_CLIENT};
pub use limiter::{Admission, RequestDescriptor, RouteLimiter};
pub use registry::{ClientRegistry, RegistryEntry};
pub use rules::{LimiterConfig, RouteGroupRule, RouteRules};
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
