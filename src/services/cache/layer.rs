use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::error::CacheError;
use super::ring::HashRing;
use super::shard::{CacheShard, InMemoryShard};

/// 读穿透缓存，按一致性哈希把键分配到各个分片
#[derive(Debug)]
pub struct CacheLayer {
    ring: HashRing,
    shards: HashMap<String, Arc<dyn CacheShard>>,
    ttl: Duration,
    // 同一个键的并发未命中只执行一次回源
    inflight: DashMap<String, Arc<Flight>>,
}

// 正在回源的键；失效时递增代数，旧代数的回源结果不再写回
#[derive(Debug, Default)]
struct Flight {
    lock: Mutex<()>,
    generation: AtomicU64,
}

impl Flight {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

// 离开作用域时清理映射表中的回源记录，请求被取消时同样生效
struct FlightGuard<'a> {
    inflight: &'a DashMap<String, Arc<Flight>>,
    key: &'a str,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // 映射表和当前请求各持有一份引用时说明没有等待者
        self.inflight
            .remove_if(self.key, |_, flight| Arc::strong_count(flight) <= 2);
    }
}

impl CacheLayer {
    pub fn new(
        shards: Vec<Arc<dyn CacheShard>>,
        ttl: Duration,
        virtual_nodes: usize,
    ) -> Result<Self, CacheError> {
        if shards.is_empty() {
            return Err(CacheError::NoShards);
        }

        let shards: HashMap<String, Arc<dyn CacheShard>> = shards
            .into_iter()
            .map(|shard| (shard.endpoint().to_string(), shard))
            .collect();
        let ring = HashRing::new(shards.keys().cloned(), virtual_nodes);

        Ok(Self {
            ring,
            shards,
            ttl,
            inflight: DashMap::new(),
        })
    }

    /// 使用进程内分片构建缓存层
    pub fn in_memory(
        endpoints: &[String],
        ttl: Duration,
        virtual_nodes: usize,
    ) -> Result<Self, CacheError> {
        let shards = endpoints
            .iter()
            .map(|endpoint| Arc::new(InMemoryShard::new(endpoint.clone())) as Arc<dyn CacheShard>)
            .collect();
        Self::new(shards, ttl, virtual_nodes)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn shard_endpoint(&self, key: &str) -> Option<&str> {
        self.ring.route(key)
    }

    fn shard_for(&self, key: &str) -> Result<&Arc<dyn CacheShard>, CacheError> {
        let endpoint = self.ring.route(key).ok_or(CacheError::NoShards)?;
        self.shards
            .get(endpoint)
            .ok_or_else(|| CacheError::UnknownShard(endpoint.to_string()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.shard_for(key)?.get(key).await
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.shard_for(key)?.set(key, value, ttl).await
    }

    /// 删除缓存条目，条目不存在时为空操作
    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        // 先让进行中的回源作废，再删除条目
        if let Some(flight) = self.inflight.get(key) {
            flight.generation.fetch_add(1, Ordering::SeqCst);
        }
        let removed = self.shard_for(key)?.del(key).await?;
        tracing::debug!(cache_key = %key, removed = removed, "Invalidated cache entry");
        Ok(removed)
    }

    // 分片不可用按未命中处理
    async fn lookup(&self, key: &str) -> Option<Bytes> {
        match self.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Cache read failed, falling back to backend");
                None
            }
        }
    }

    async fn populate(&self, key: &str, value: Bytes) {
        if let Err(e) = self.set(key, value, self.ttl).await {
            tracing::warn!(cache_key = %key, error = %e, "Failed to populate cache entry");
        }
    }

    /// 命中直接返回；未命中时调用 `fetch` 回源并写回缓存，失败结果不缓存
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(value) = self.lookup(key).await {
            tracing::debug!(cache_key = %key, "Cache hit");
            return Ok(value);
        }

        let guard = FlightGuard {
            inflight: &self.inflight,
            key,
            flight: self.inflight.entry(key.to_string()).or_default().clone(),
        };
        let generation = guard.flight.generation();
        let _lock = guard.flight.lock.lock().await;

        // 等待期间其他请求可能已经完成回源；期间发生过失效则必须重新回源
        if guard.flight.generation() == generation {
            if let Some(value) = self.lookup(key).await {
                return Ok(value);
            }
        }

        tracing::debug!(cache_key = %key, "Cache miss, fetching from backend");
        let fetched = fetch().await;
        if let Ok(value) = &fetched {
            if guard.flight.generation() == generation {
                self.populate(key, value.clone()).await;
                // 写回与失效并发时以失效为准
                if guard.flight.generation() != generation {
                    self.discard(key).await;
                }
            } else {
                tracing::debug!(cache_key = %key, "Entry invalidated during fetch, not caching");
            }
        }
        fetched
    }

    async fn discard(&self, key: &str) {
        if let Ok(shard) = self.shard_for(key) {
            if let Err(e) = shard.del(key).await {
                tracing::warn!(cache_key = %key, error = %e, "Failed to discard stale cache entry");
            }
        }
    }

    /// 清理所有分片中的过期条目，返回清理数量
    pub async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for shard in self.shards.values() {
            purged += shard.purge_expired().await;
        }
        purged
    }

    /// 周期性清理过期条目，避免不再被读取的键一直占用内存
    pub fn start_expiry_sweep(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                interval.tick().await;
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged = purged, "Purged expired cache entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct UnreachableShard;

    #[tonic::async_trait]
    impl CacheShard for UnreachableShard {
        fn endpoint(&self) -> &str {
            "unreachable"
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Err(CacheError::ShardUnavailable {
                endpoint: "unreachable".into(),
                reason: "connection refused".into(),
            })
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::ShardUnavailable {
                endpoint: "unreachable".into(),
                reason: "connection refused".into(),
            })
        }

        async fn del(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::ShardUnavailable {
                endpoint: "unreachable".into(),
                reason: "connection refused".into(),
            })
        }
    }

    fn cache() -> CacheLayer {
        let endpoints = vec!["shard-0".to_string(), "shard-1".to_string()];
        CacheLayer::in_memory(&endpoints, Duration::from_secs(300), 64).unwrap()
    }

    async fn fetch_counted(calls: &AtomicUsize, value: &'static [u8]) -> Result<Bytes, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(value))
    }

    #[test]
    fn test_requires_shards() {
        let result = CacheLayer::new(Vec::new(), Duration::from_secs(1), 8);
        assert!(matches!(result, Err(CacheError::NoShards)));
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_result() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_fetch("getRecordInfo:42", || fetch_counted(&calls, b"record-42"))
            .await
            .unwrap();
        let second = cache
            .get_or_fetch("getRecordInfo:42", || fetch_counted(&calls, b"other"))
            .await
            .unwrap();

        assert_eq!(first, Bytes::from_static(b"record-42"));
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch("getRecordInfo:42", || fetch_counted(&calls, b"v1"))
            .await
            .unwrap();
        assert!(cache.invalidate("getRecordInfo:42").await.unwrap());
        let value = cache
            .get_or_fetch("getRecordInfo:42", || fetch_counted(&calls, b"v2"))
            .await
            .unwrap();

        assert_eq!(value, Bytes::from_static(b"v2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // 再次删除不存在的键
        assert!(!cache.invalidate("getRecordInfo:7").await.unwrap());
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        let failed: Result<Bytes, String> = cache
            .get_or_fetch("listRecords", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("backend down".to_string())
            })
            .await;
        assert!(failed.is_err());

        cache
            .get_or_fetch("listRecords", || fetch_counted(&calls, b"[]"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetched() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("listRecords", || fetch_counted(&calls, b"[]")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(301)).await;
        cache.get_or_fetch("listRecords", || fetch_counted(&calls, b"[]")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_shard_degrades_to_fetch() {
        let cache = CacheLayer::new(
            vec![Arc::new(UnreachableShard) as Arc<dyn CacheShard>],
            Duration::from_secs(300),
            8,
        )
        .unwrap();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_fetch("getRecordInfo:1", || fetch_counted(&calls, b"r1"))
                .await
                .unwrap();
            assert_eq!(value, Bytes::from_static(b"r1"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.invalidate("getRecordInfo:1").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("listRecords", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(Bytes::from_static(b"[1,2]"))
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), Bytes::from_static(b"[1,2]"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_discards_stale_value() {
        let cache = Arc::new(cache());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let stale = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("GetRecordInfo:42", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, String>(Bytes::from_static(b"old"))
                    })
                    .await
            })
        };
        started_rx.await.unwrap();
        cache.invalidate("GetRecordInfo:42").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let fresh = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("GetRecordInfo:42", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(Bytes::from_static(b"new"))
                    })
                    .await
            })
        };
        // 让第二个请求排到回源锁上
        tokio::time::sleep(Duration::from_millis(20)).await;
        release_tx.send(()).unwrap();

        assert_eq!(stale.await.unwrap().unwrap(), Bytes::from_static(b"old"));
        assert_eq!(fresh.await.unwrap().unwrap(), Bytes::from_static(b"new"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.get("GetRecordInfo:42").await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_inflight_entry() {
        let cache = Arc::new(cache());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("ListRecords", || async move {
                        let _ = started_tx.send(());
                        futures::future::pending::<Result<Bytes, String>>().await
                    })
                    .await
            })
        };
        started_rx.await.unwrap();
        assert_eq!(cache.inflight.len(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_sweep_purges_unread_entries() {
        let shard = InMemoryShard::new("shard-0");
        let cache = Arc::new(
            CacheLayer::new(
                vec![Arc::new(shard.clone()) as Arc<dyn CacheShard>],
                Duration::from_secs(1),
                8,
            )
            .unwrap(),
        );
        let calls = AtomicUsize::new(0);
        for id in 1..=3 {
            cache
                .get_or_fetch(&format!("GetRecordInfo:{id}"), || fetch_counted(&calls, b"r"))
                .await
                .unwrap();
        }
        assert_eq!(shard.len(), 3);

        let handle = cache.start_expiry_sweep(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(shard.is_empty());
        handle.abort();
    }

    #[test]
    fn test_key_routes_to_configured_shard() {
        let cache = cache();
        let endpoint = cache.shard_endpoint("getRecordInfo:42").unwrap();
        assert!(endpoint == "shard-0" || endpoint == "shard-1");
        assert_eq!(cache.shard_endpoint("getRecordInfo:42"), Some(endpoint));
    }
}
