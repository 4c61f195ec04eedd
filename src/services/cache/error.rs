/// 缓存错误类型，只在缓存层内部记录，不会返回给调用方
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache shard {endpoint} unavailable: {reason}")]
    ShardUnavailable { endpoint: String, reason: String },
    #[error("Unknown cache shard: {0}")]
    UnknownShard(String),
    #[error("No cache shards configured")]
    NoShards,
}
