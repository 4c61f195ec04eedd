use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::types::InstanceId;

/// 记录每个实例最近一次心跳的时间
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMonitor {
    last_seen: Arc<DashMap<InstanceId, Instant>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, id: &InstanceId) {
        self.beat_at(id, Instant::now());
    }

    pub fn beat_at(&self, id: &InstanceId, at: Instant) {
        self.last_seen.insert(id.clone(), at);
    }

    pub fn last_seen(&self, id: &InstanceId) -> Option<Instant> {
        self.last_seen.get(id).map(|entry| *entry.value())
    }

    /// 距上次心跳经过的时间，从未收到心跳时返回 None
    pub fn elapsed(&self, id: &InstanceId, now: Instant) -> Option<Duration> {
        self.last_seen(id)
            .map(|seen| now.saturating_duration_since(seen))
    }

    // 没有心跳记录同样视为过期
    pub fn is_stale(&self, id: &InstanceId, now: Instant, timeout: Duration) -> bool {
        match self.elapsed(id, now) {
            Some(elapsed) => elapsed > timeout,
            None => true,
        }
    }
}
