pub mod balancer;
pub mod cache;
pub mod client;
pub mod dispatcher;
pub mod limiter;
pub mod registry;

pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::{RegistrationEndpoint, ServiceInstance, ServiceRegistry};
