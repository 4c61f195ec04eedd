//! Request dispatch: registry lookup, instance selection, bounded execution,
//! error accounting and cache invalidation.

pub mod error;
pub mod grpc_impl;
pub mod operation;
pub mod source;

pub use error::DispatchError;
pub use grpc_impl::GatewayEndpoint;
pub use operation::{Operation, OperationKind, ResourceRoute, RouteAction};
pub use source::InstanceSource;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::Instrument;
use uuid::Uuid;

use crate::services::balancer::InstanceSelector;
use crate::services::cache::CacheLayer;
use crate::services::client::{BackendClient, BackendError};
use crate::services::limiter::{ConcurrencyLimiter, LimiterStats};

// 后端调用未能完成的原因
enum CallFailure {
    // 限流器已关闭
    Rejected,
    Backend(BackendError),
}

/// 分发器本身不持有状态，只编排各个组件
#[derive(Debug, Clone)]
pub struct Dispatcher {
    source: Arc<dyn InstanceSource>,
    selector: InstanceSelector,
    limiter: ConcurrencyLimiter,
    cache: Arc<CacheLayer>,
    client: Arc<dyn BackendClient>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn InstanceSource>,
        selector: InstanceSelector,
        limiter: ConcurrencyLimiter,
        cache: Arc<CacheLayer>,
        client: Arc<dyn BackendClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            source,
            selector,
            limiter,
            cache,
            client,
            call_timeout,
        }
    }

    pub fn limiter_stats(&self) -> LimiterStats {
        self.limiter.stats()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn selector(&self) -> &InstanceSelector {
        &self.selector
    }

    pub async fn dispatch(&self, operation: Operation) -> Result<Bytes, DispatchError> {
        let span = tracing::info_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            service_type = %operation.service_type,
            method = %operation.method,
        );
        self.dispatch_inner(operation).instrument(span).await
    }

    async fn dispatch_inner(&self, operation: Operation) -> Result<Bytes, DispatchError> {
        let Operation {
            service_type,
            method,
            payload,
            kind,
        } = operation;

        // 获取快照并选择实例，没有可用实例时立即失败
        let instances = self.source.snapshot().await?;
        let Some(instance) = self.selector.select(&instances, &service_type) else {
            tracing::warn!(candidates = instances.len(), "No available backend instance");
            return Err(DispatchError::NoAvailableBackend { service_type });
        };

        let address = instance.address();
        tracing::debug!(instance_id = %instance.id, load = instance.load, "Selected backend instance");

        // 缓存命中时没有访问后端，不计入成功；并发名额只在真正调用后端时占用
        let reached_backend = AtomicBool::new(false);
        let call = || {
            reached_backend.store(true, Ordering::Relaxed);
            let request = self.client.call(&address, &method, payload, self.call_timeout);
            async move {
                match self.limiter.run(request).await {
                    Ok(result) => result.map_err(CallFailure::Backend),
                    Err(_) => Err(CallFailure::Rejected),
                }
            }
        };
        let result = match &kind {
            OperationKind::Read {
                cache_key: Some(key),
            } => self.cache.get_or_fetch(key, call).await,
            _ => call().await,
        };

        let tracker = self.selector.tracker();
        match result {
            Ok(response) => {
                if reached_backend.load(Ordering::Relaxed) {
                    tracker.record_success(&instance.id);
                }
                if let OperationKind::Mutate { invalidates } = &kind {
                    self.invalidate(invalidates).await;
                }
                Ok(response)
            }
            Err(CallFailure::Rejected) => Err(DispatchError::Shutdown),
            Err(CallFailure::Backend(e)) => {
                tracker.record_failure(&instance.id);
                tracing::error!(instance_id = %instance.id, error = %e, "Backend call failed");
                Err(DispatchError::BackendCallFailure {
                    instance: instance.id,
                    source: e,
                })
            }
        }
    }

    // 失效失败不影响写操作结果，只记录日志
    async fn invalidate(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.cache.invalidate(key).await {
                tracing::error!(cache_key = %key, error = %e, "Failed to invalidate cache entry");
            }
        }
    }
}
