use crate::services::registry::{InstanceId, ServiceInstance};

use super::circuit_breaker::ErrorTracker;

/// 最小负载实例选择器
#[derive(Debug, Clone)]
pub struct InstanceSelector {
    tracker: ErrorTracker,
}

impl InstanceSelector {
    pub fn new(tracker: ErrorTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    /// 从快照中挑选一个未被熔断、负载最小的实例
    pub fn select(&self, instances: &[ServiceInstance], service_type: &str) -> Option<ServiceInstance> {
        select_least_loaded(instances, service_type, |id| self.tracker.is_available(id)).cloned()
    }
}

// 负载相同时取快照中第一个
pub fn select_least_loaded<'a, F>(
    instances: &'a [ServiceInstance],
    service_type: &str,
    mut is_available: F,
) -> Option<&'a ServiceInstance>
where
    F: FnMut(&InstanceId) -> bool,
{
    instances
        .iter()
        .filter(|instance| instance.name == service_type)
        .filter(|instance| is_available(&instance.id))
        .min_by_key(|instance| instance.load)
}
