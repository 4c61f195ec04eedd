//! Sharded read-through response cache.

pub mod error;
pub mod keys;
pub mod layer;
pub mod ring;
pub mod shard;

pub use error::CacheError;
pub use keys::{collection_key, point_key};
pub use layer::CacheLayer;
pub use ring::HashRing;
pub use shard::{CacheShard, InMemoryShard};
