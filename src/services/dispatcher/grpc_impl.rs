use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tonic::{Request, Response, Status};

use super::Dispatcher;
use super::operation::{ResourceRoute, RouteAction};
use crate::gateway::{
    Action, InvokeRequest, InvokeResponse, StatusRequest, StatusResponse,
    gateway_service_server::GatewayService,
};

/// 网关入口：把客户端请求翻译成分发操作
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    dispatcher: Arc<Dispatcher>,
    routes: Arc<HashMap<String, ResourceRoute>>,
}

impl GatewayEndpoint {
    pub fn new(dispatcher: Arc<Dispatcher>, routes: Vec<ResourceRoute>) -> Self {
        let routes = routes
            .into_iter()
            .map(|route| (route.name.clone(), route))
            .collect();
        Self {
            dispatcher,
            routes: Arc::new(routes),
        }
    }
}

impl From<Action> for RouteAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Get => RouteAction::Get,
            Action::List => RouteAction::List,
            Action::Create => RouteAction::Create,
            Action::Update => RouteAction::Update,
            Action::Delete => RouteAction::Delete,
        }
    }
}

#[tonic::async_trait]
impl GatewayService for GatewayEndpoint {
    async fn invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<InvokeResponse>, Status> {
        let req = request.into_inner();

        let route = self
            .routes
            .get(&req.route)
            .ok_or_else(|| Status::not_found(format!("Unknown route '{}'", req.route)))?;
        let action = Action::try_from(req.action)
            .map_err(|_| Status::invalid_argument(format!("Unknown action {}", req.action)))?;
        let action = RouteAction::from(action);

        let needs_id = matches!(action, RouteAction::Get | RouteAction::Update | RouteAction::Delete);
        if needs_id && req.id.is_empty() {
            return Err(Status::invalid_argument("Resource id is required"));
        }

        let operation = route
            .operation(action, &req.id, Bytes::from(req.payload))
            .ok_or_else(|| {
                Status::unimplemented(format!("Route '{}' does not support {action:?}", route.name))
            })?;

        let payload = self.dispatcher.dispatch(operation).await?;
        Ok(Response::new(InvokeResponse {
            payload: payload.to_vec(),
        }))
    }

    // 存活探针
    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let stats = self.dispatcher.limiter_stats();
        Ok(Response::new(StatusResponse {
            status: "OK".to_string(),
            active_calls: stats.active as u64,
            pending_calls: stats.pending as u64,
        }))
    }
}
