use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::heartbeat::HeartbeatMonitor;
use super::types::{
    HeartbeatOutcome, InstanceId, InstanceRecord, InstanceState, RegistryConfig, RegistryError,
    ServiceInstance,
};

/// 服务注册表
///
/// 活跃集合与已删除集合共用一张表，通过 `InstanceState` 区分，
/// 实例在两者之间移动只需在同一个分片锁内修改状态。
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    instances: Arc<DashMap<InstanceId, InstanceRecord>>,
    monitor: HeartbeatMonitor,
    next_seq: Arc<AtomicU64>,
    config: RegistryConfig,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            instances: Arc::new(DashMap::new()),
            monitor: HeartbeatMonitor::new(),
            next_seq: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    // 注册实例：已删除的实例恢复原有状态，已存在的活跃实例保持不变
    pub fn register(&self, name: &str, host: &str, port: u16) -> InstanceId {
        let instance = ServiceInstance::new(name, host, port);
        let id = instance.id.clone();

        match self.instances.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.state == InstanceState::Deleted {
                    record.state = InstanceState::Live;
                    tracing::info!(
                        instance_id = %id,
                        load = record.instance.load,
                        "Restored previously deleted instance on registration"
                    );
                } else {
                    tracing::debug!(instance_id = %id, "Instance already registered");
                }
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                entry.insert(InstanceRecord {
                    instance,
                    state: InstanceState::Live,
                    seq,
                });
                tracing::info!(
                    instance_id = %id,
                    service_name = %name,
                    host = %host,
                    port = port,
                    "Registered service instance"
                );
            }
        }

        // 注册本身算作一次心跳，避免在首个心跳到达前被清理
        self.monitor.beat(&id);
        id
    }

    // 注销：移入已删除集合
    pub fn deregister(&self, id: &InstanceId) -> bool {
        match self.instances.get_mut(id) {
            Some(mut record) if record.state == InstanceState::Live => {
                record.state = InstanceState::Deleted;
                tracing::info!(instance_id = %id, "Deregistered service instance");
                true
            }
            _ => false,
        }
    }

    // 更新负载，后写覆盖
    pub fn update_load(&self, id: &InstanceId, load: u32) -> Result<(), RegistryError> {
        let mut record = self
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownInstance(id.clone()))?;
        record.instance.load = load;
        drop(record);

        tracing::debug!(instance_id = %id, load = load, "Instance load updated");
        self.check_critical_load(id, load);
        Ok(())
    }

    fn check_critical_load(&self, id: &InstanceId, load: u32) {
        if load > self.config.critical_load_threshold {
            tracing::error!(
                instance_id = %id,
                load = load,
                threshold = self.config.critical_load_threshold,
                "Critical load alert: instance is overloaded"
            );
        }
    }

    // 刷新心跳；已删除的实例视为误删，重新加入活跃集合
    pub fn heartbeat(&self, id: &InstanceId) -> HeartbeatOutcome {
        let Some(mut record) = self.instances.get_mut(id) else {
            tracing::warn!(instance_id = %id, "Heartbeat from unknown instance");
            return HeartbeatOutcome::Unknown;
        };

        self.monitor.beat(id);
        if record.state == InstanceState::Deleted {
            record.state = InstanceState::Live;
            tracing::info!(
                instance_id = %id,
                "Instance re-registered due to received heartbeat"
            );
            HeartbeatOutcome::Resurrected
        } else {
            tracing::trace!(instance_id = %id, "Heartbeat received");
            HeartbeatOutcome::Refreshed
        }
    }

    /// 活跃实例快照，按首次注册顺序排列
    pub fn list(&self) -> Vec<ServiceInstance> {
        self.snapshot(InstanceState::Live)
    }

    pub fn deleted(&self) -> Vec<ServiceInstance> {
        self.snapshot(InstanceState::Deleted)
    }

    fn snapshot(&self, state: InstanceState) -> Vec<ServiceInstance> {
        let mut records: Vec<(u64, ServiceInstance)> = self
            .instances
            .iter()
            .filter(|entry| entry.value().state == state)
            .map(|entry| (entry.value().seq, entry.value().instance.clone()))
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, instance)| instance).collect()
    }

    pub fn get(&self, id: &InstanceId) -> Option<(ServiceInstance, InstanceState)> {
        self.instances
            .get(id)
            .map(|record| (record.instance.clone(), record.state))
    }

    pub fn is_live(&self, id: &InstanceId) -> bool {
        self.instances
            .get(id)
            .is_some_and(|record| record.state == InstanceState::Live)
    }

    pub fn sweep(&self) -> Vec<InstanceId> {
        self.sweep_at(Instant::now())
    }

    // 清理心跳超时的活跃实例
    pub fn sweep_at(&self, now: Instant) -> Vec<InstanceId> {
        let timeout = self.config.heartbeat_timeout;
        let mut expired = Vec::new();

        for entry in self.instances.iter() {
            if entry.value().state != InstanceState::Live {
                continue;
            }
            let id = entry.key();
            match self.monitor.elapsed(id, now) {
                Some(elapsed) if elapsed <= timeout => {
                    tracing::trace!(
                        instance_id = %id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Instance is healthy"
                    );
                }
                elapsed => {
                    tracing::warn!(
                        instance_id = %id,
                        elapsed_ms = elapsed.map(|e| e.as_millis() as u64),
                        timeout_ms = timeout.as_millis() as u64,
                        "Instance expired due to heartbeat timeout"
                    );
                    expired.push(id.clone());
                }
            }
        }

        // 迭代结束后再修改，避免持有分片读锁时写入；期间收到心跳的实例保留
        expired.retain(|id| match self.instances.get_mut(id) {
            Some(mut record)
                if record.state == InstanceState::Live
                    && self.monitor.is_stale(id, now, timeout) =>
            {
                record.state = InstanceState::Deleted;
                true
            }
            _ => false,
        });

        if !expired.is_empty() {
            tracing::info!(expired_count = expired.len(), "Health sweep moved instances to deleted set");
        }
        expired
    }

    /// 启动后台健康检查，每个心跳超时周期执行一次
    pub fn start_health_sweep(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.config.heartbeat_timeout;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                interval.tick().await;
                tracing::debug!("Executing instance heartbeat sweep...");
                registry.sweep();
            }
        })
    }
}
