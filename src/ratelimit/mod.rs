//! Rate limiting logic and state management.

mod backend;
mod clock;
mod key;
mod rules;
mod store;
mod tracker;
mod window;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{RateKey, ANONYMOUS_SUBJECT};
pub use rules::{LimitTable, OperationLimit, ResolvedLimit, TimeUnit, WindowSpec, BASE_ROLE, GUEST_ROLE};
pub use store::{ActorStore, MemoryStore, RateStore};
pub use tracker::{Admission, RateLimitStatus, RateTracker, TrackerSettings};
pub use window::{Admit, Decision, EventLog, Usage};
