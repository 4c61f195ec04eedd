use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::services::registry::{InstanceId, ServiceRegistry};

/// 熔断配置
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// 窗口内达到该失败次数即摘除实例
    pub max_errors: u32,
    /// 首次失败后多久进行一次判定
    pub window: Duration,
    /// 摘除后多久重新允许被选中
    pub ejection_cooldown: Duration,
}

impl BreakerConfig {
    // 判定窗口 = 调用超时 × 系数
    pub fn from_call_timeout(
        call_timeout: Duration,
        window_factor: f64,
        max_errors: u32,
        ejection_cooldown: Duration,
    ) -> Self {
        Self {
            max_errors,
            window: call_timeout.mul_f64(window_factor),
            ejection_cooldown,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from_call_timeout(Duration::from_secs(5), 3.5, 3, Duration::from_secs(30))
    }
}

#[derive(Debug, Default, Clone)]
struct ErrorCounter {
    count: u32,
    window_opened: Option<Instant>,
    ejected_until: Option<Instant>,
}

/// 窗口判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    Ejected,
    Forgiven,
    Idle,
}

/// 按实例统计连续失败次数的熔断器
///
/// 第一次失败打开一个判定窗口，窗口到期时只判定一次：
/// 失败数达到阈值则摘除实例并进入冷却期，否则清零。
/// 未被摘除的实例调用成功会立即清零计数。
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    counters: Arc<DashMap<InstanceId, ErrorCounter>>,
    config: BreakerConfig,
    // 本进程内的注册表，摘除时同步移入已删除集合
    registry: Option<ServiceRegistry>,
    task_tracker: TaskTracker,
}

impl ErrorTracker {
    pub fn new(config: BreakerConfig, registry: Option<ServiceRegistry>) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            config,
            registry,
            task_tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// 记录一次失败，返回当前计数
    pub fn record_failure(&self, id: &InstanceId) -> u32 {
        let now = Instant::now();
        let (count, opened) = {
            let mut counter = self.counters.entry(id.clone()).or_default();
            counter.count = counter.count.saturating_add(1);
            let opened = counter.window_opened.is_none();
            if opened {
                counter.window_opened = Some(now);
            }
            (counter.count, opened)
        };

        tracing::warn!(
            instance_id = %id,
            error_count = count,
            max_errors = self.config.max_errors,
            "Recorded backend failure"
        );

        if opened {
            self.schedule_evaluation(id.clone());
        }
        count
    }

    fn schedule_evaluation(&self, id: InstanceId) {
        let tracker = self.clone();
        let window = self.config.window;
        self.task_tracker.spawn(async move {
            tokio::time::sleep(window).await;
            tracker.evaluate(&id);
        });
    }

    pub fn record_success(&self, id: &InstanceId) {
        if let Some(mut counter) = self.counters.get_mut(id) {
            if counter.ejected_until.is_none() && counter.count > 0 {
                tracing::debug!(instance_id = %id, "Backend call succeeded, resetting error count");
                counter.count = 0;
            }
        }
    }

    /// 窗口到期判定；实例已不存在时为空操作
    pub fn evaluate(&self, id: &InstanceId) -> WindowVerdict {
        let verdict = match self.counters.get_mut(id) {
            None => WindowVerdict::Idle,
            Some(mut counter) => {
                counter.window_opened = None;
                if counter.count >= self.config.max_errors {
                    counter.ejected_until = Some(Instant::now() + self.config.ejection_cooldown);
                    WindowVerdict::Ejected
                } else {
                    counter.count = 0;
                    WindowVerdict::Forgiven
                }
            }
        };

        match verdict {
            WindowVerdict::Ejected => {
                tracing::warn!(
                    instance_id = %id,
                    cooldown_ms = self.config.ejection_cooldown.as_millis() as u64,
                    "Ejecting instance after repeated failures"
                );
                if let Some(registry) = &self.registry {
                    registry.deregister(id);
                }
            }
            WindowVerdict::Forgiven => {
                tracing::debug!(instance_id = %id, "Error window closed below threshold, count reset");
            }
            WindowVerdict::Idle => {}
        }
        verdict
    }

    /// 实例是否可被选中；冷却期结束时在此恢复
    pub fn is_available(&self, id: &InstanceId) -> bool {
        let Some(mut counter) = self.counters.get_mut(id) else {
            return true;
        };

        if let Some(until) = counter.ejected_until {
            if Instant::now() < until {
                return false;
            }
            counter.ejected_until = None;
            counter.count = 0;
            counter.window_opened = None;
            tracing::info!(instance_id = %id, "Reinstated instance after ejection cooldown");
        }
        counter.count < self.config.max_errors
    }

    pub fn error_count(&self, id: &InstanceId) -> u32 {
        self.counters.get(id).map(|c| c.count).unwrap_or(0)
    }

    pub fn is_ejected(&self, id: &InstanceId) -> bool {
        self.counters
            .get(id)
            .and_then(|c| c.ejected_until)
            .is_some_and(|until| Instant::now() < until)
    }
}
