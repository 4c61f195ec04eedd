use tonic::Status;

use crate::services::client::BackendError;
use crate::services::registry::InstanceId;

/// 分发错误类型
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No available service for '{service_type}'")]
    NoAvailableBackend { service_type: String },
    #[error("Backend call to {instance} failed: {source}")]
    BackendCallFailure {
        instance: InstanceId,
        #[source]
        source: BackendError,
    },
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("Dispatcher is shutting down")]
    Shutdown,
}

// 转换为返回给调用方的 gRPC 状态，后端错误细节只写日志
impl From<DispatchError> for Status {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::NoAvailableBackend { service_type } => {
                Status::unavailable(format!("No available service for '{service_type}'"))
            }
            DispatchError::BackendCallFailure { .. } => Status::internal("Backend call failed"),
            DispatchError::RegistryUnavailable(_) => {
                Status::unavailable("Service registry unavailable")
            }
            DispatchError::Shutdown => Status::unavailable("Gateway is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let status = Status::from(DispatchError::NoAvailableBackend {
            service_type: "prescriptions".into(),
        });
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(status.message().contains("prescriptions"));

        let status = Status::from(DispatchError::BackendCallFailure {
            instance: InstanceId::new("records", "10.0.0.1", 50051),
            source: BackendError::Timeout(Duration::from_secs(5)),
        });
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(!status.message().contains("10.0.0.1"));

        let status = Status::from(DispatchError::RegistryUnavailable("refused".into()));
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert_eq!(status.message(), "Service registry unavailable");
    }
}
