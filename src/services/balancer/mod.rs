pub mod circuit_breaker;
pub mod selector;

pub use circuit_breaker::{BreakerConfig, ErrorTracker, WindowVerdict};
pub use selector::{InstanceSelector, select_least_loaded};
