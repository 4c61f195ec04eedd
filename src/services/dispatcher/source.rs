use std::fmt;

use super::error::DispatchError;
use crate::services::registry::{RemoteRegistry, ServiceInstance, ServiceRegistry};

/// 分发器获取实例快照的来源
#[tonic::async_trait]
pub trait InstanceSource: Send + Sync + fmt::Debug {
    async fn snapshot(&self) -> Result<Vec<ServiceInstance>, DispatchError>;
}

// 本进程内的注册表总是可用
#[tonic::async_trait]
impl InstanceSource for ServiceRegistry {
    async fn snapshot(&self) -> Result<Vec<ServiceInstance>, DispatchError> {
        Ok(self.list())
    }
}

#[tonic::async_trait]
impl InstanceSource for RemoteRegistry {
    async fn snapshot(&self) -> Result<Vec<ServiceInstance>, DispatchError> {
        self.list().await.map_err(|e| {
            tracing::error!(address = %self.address(), error = %e, "Failed to list registered services");
            DispatchError::RegistryUnavailable(e.to_string())
        })
    }
}
