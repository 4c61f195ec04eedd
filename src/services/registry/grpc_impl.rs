use tonic::{Request, Response, Status};

use super::service::ServiceRegistry;
use super::types::{HeartbeatOutcome, InstanceId, ServiceInstance};
use crate::discovery::{
    Ack, InstanceRef, ListRequest, RegisterRequest, RegisteredInstance, ServiceList,
    StatusUpdate, registration_service_server::RegistrationService,
};

/// 服务发现端点：后端实例通过它注册、上报负载和心跳
#[derive(Debug, Clone)]
pub struct RegistrationEndpoint {
    pub registry: ServiceRegistry,
}

impl RegistrationEndpoint {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self { registry }
    }
}

fn parse_port(port: u32) -> Result<u16, Status> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Status::invalid_argument(format!("Invalid port: {port}")))
}

fn require_name(name: &str) -> Result<(), Status> {
    if name.is_empty() {
        return Err(Status::invalid_argument("Service name must not be empty"));
    }
    Ok(())
}

fn instance_id(service_name: &str, host: &str, port: u32) -> Result<InstanceId, Status> {
    require_name(service_name)?;
    Ok(InstanceId::new(service_name, host, parse_port(port)?))
}

fn ack(message: impl Into<String>) -> Response<Ack> {
    Response::new(Ack {
        success: true,
        message: message.into(),
    })
}

impl From<ServiceInstance> for RegisteredInstance {
    fn from(instance: ServiceInstance) -> Self {
        Self {
            id: instance.id.to_string(),
            name: instance.name,
            host: instance.host,
            port: u32::from(instance.port),
            load: instance.load,
        }
    }
}

// 为结构体实现 gRPC 服务 trait
#[tonic::async_trait]
impl RegistrationService for RegistrationEndpoint {
    async fn register_service(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        require_name(&req.name)?;
        let port = parse_port(req.port)?;

        let id = self.registry.register(&req.name, &req.host, port);
        Ok(ack(format!("Registered {id}")))
    }

    async fn deregister_service(
        &self,
        request: Request<InstanceRef>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let id = instance_id(&req.service_name, &req.host, req.port)?;

        if self.registry.deregister(&id) {
            Ok(ack(format!("Deregistered {id}")))
        } else {
            // 不存在时为空操作
            Ok(Response::new(Ack {
                success: false,
                message: format!("Instance {id} is not live"),
            }))
        }
    }

    async fn update_service_status(
        &self,
        request: Request<StatusUpdate>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let id = instance_id(&req.service_name, &req.host, req.port)?;

        self.registry
            .update_load(&id, req.load)
            .map_err(|e| Status::not_found(e.to_string()))?;
        Ok(ack("Load updated"))
    }

    async fn update_service_heartbeat(
        &self,
        request: Request<InstanceRef>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let id = instance_id(&req.service_name, &req.host, req.port)?;

        match self.registry.heartbeat(&id) {
            HeartbeatOutcome::Refreshed => Ok(ack("Heartbeat received")),
            HeartbeatOutcome::Resurrected => Ok(ack("Instance re-registered")),
            // 未知实例需要重新注册
            HeartbeatOutcome::Unknown => Err(Status::not_found(format!(
                "Instance {id} is not registered"
            ))),
        }
    }

    async fn list_registered_services(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<ServiceList>, Status> {
        let req = request.into_inner();
        let instances = self
            .registry
            .list()
            .into_iter()
            .filter(|instance| req.service_name.is_empty() || instance.name == req.service_name)
            .map(RegisteredInstance::from)
            .collect();

        Ok(Response::new(ServiceList { instances }))
    }
}
