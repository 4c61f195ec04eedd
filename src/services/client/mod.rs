pub mod backend;
pub mod channel_pool;
pub mod error;

pub use backend::{BackendClient, GrpcBackendClient};
pub use channel_pool::ChannelPool;
pub use error::BackendError;
