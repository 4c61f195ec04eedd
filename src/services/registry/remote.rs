use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use super::types::{InstanceId, ServiceInstance};
use crate::discovery::{ListRequest, RegisteredInstance, registration_service_client::RegistrationServiceClient};

/// 远程服务发现端点的客户端
#[derive(Debug, Clone)]
pub struct RemoteRegistry {
    address: String,
    client: RegistrationServiceClient<Channel>,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteRegistryError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
}

impl RemoteRegistry {
    /// 延迟建立连接，首次调用时才连接发现端点
    pub fn connect_lazy(address: &str, timeout: Duration) -> Result<Self, RemoteRegistryError> {
        let channel = Endpoint::from_shared(address.to_string())?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();

        Ok(Self {
            address: address.to_string(),
            client: RegistrationServiceClient::new(channel),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn list(&self) -> Result<Vec<ServiceInstance>, RemoteRegistryError> {
        let response = self
            .client
            .clone()
            .list_registered_services(ListRequest::default())
            .await?;

        let instances = response
            .into_inner()
            .instances
            .into_iter()
            .filter_map(|instance| {
                let parsed = ServiceInstance::try_from(instance.clone()).ok();
                if parsed.is_none() {
                    tracing::warn!(instance_id = %instance.id, port = instance.port, "Skipping instance with invalid port");
                }
                parsed
            })
            .collect();
        Ok(instances)
    }
}

impl TryFrom<RegisteredInstance> for ServiceInstance {
    type Error = std::num::TryFromIntError;

    fn try_from(instance: RegisteredInstance) -> Result<Self, Self::Error> {
        let port = u16::try_from(instance.port)?;
        Ok(Self {
            id: InstanceId::new(&instance.name, &instance.host, port),
            name: instance.name,
            host: instance.host,
            port,
            load: instance.load,
        })
    }
}
