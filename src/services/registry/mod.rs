//! Registry module
//!
//! This module contains the service registry split into logical components:
//! - `types`: instance identity and snapshot types
//! - `heartbeat`: last-seen tracking per instance
//! - `service`: live/deleted sets, load reports and the health sweep
//! - `grpc_impl`: discovery endpoint (gRPC trait implementation)
//! - `remote`: client for a discovery endpoint running in another process

pub mod grpc_impl;
pub mod heartbeat;
pub mod remote;
pub mod service;
pub mod types;

// Re-export public types for easier access
pub use grpc_impl::RegistrationEndpoint;
pub use heartbeat::HeartbeatMonitor;
pub use remote::{RemoteRegistry, RemoteRegistryError};
pub use service::ServiceRegistry;
pub use types::{HeartbeatOutcome, InstanceId, InstanceState, RegistryConfig, RegistryError, ServiceInstance};
