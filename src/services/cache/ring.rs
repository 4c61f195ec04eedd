//! Consistent hash ring mapping cache keys to shard endpoints.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

/// 一致性哈希环，每个分片在环上放置若干虚拟节点
#[derive(Debug, Clone)]
pub struct HashRing {
    ring: BTreeMap<u64, String>,
    shards: BTreeSet<String>,
    virtual_nodes: usize,
}

impl HashRing {
    pub fn new<I, S>(shards: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self {
            ring: BTreeMap::new(),
            shards: BTreeSet::new(),
            virtual_nodes: virtual_nodes.max(1),
        };
        for shard in shards {
            ring.add_shard(shard);
        }
        ring
    }

    pub fn add_shard(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        if !self.shards.insert(endpoint.clone()) {
            return;
        }
        for replica in 0..self.virtual_nodes {
            let position = hash_str(&format!("{endpoint}#{replica}"));
            self.ring.insert(position, endpoint.clone());
        }
    }

    pub fn remove_shard(&mut self, endpoint: &str) {
        if self.shards.remove(endpoint) {
            self.ring.retain(|_, shard| shard != endpoint);
        }
    }

    /// 找到第一个不小于键哈希值的位置，越界时回到环首
    pub fn route(&self, key: &str) -> Option<&str> {
        let position = hash_str(key);
        self.ring
            .range(position..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, shard)| shard.as_str())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> impl Iterator<Item = &str> {
        self.shards.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

fn hash_str(value: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
