use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::discovery::registration_service_server::RegistrationServiceServer;
use crate::gateway::gateway_service_server::GatewayServiceServer;
use crate::services::balancer::{ErrorTracker, InstanceSelector};
use crate::services::cache::CacheLayer;
use crate::services::client::GrpcBackendClient;
use crate::services::dispatcher::{Dispatcher, GatewayEndpoint, InstanceSource};
use crate::services::limiter::ConcurrencyLimiter;
use crate::services::registry::{RegistrationEndpoint, RemoteRegistry, ServiceRegistry};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 组装好的网关组件
#[derive(Debug, Clone)]
pub struct Gateway {
    /// 本进程内的注册表；使用远程服务发现时为 None
    pub registry: Option<ServiceRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Config,
}

impl Gateway {
    pub fn build(config: Config) -> Result<Self, BoxError> {
        let (registry, source): (Option<ServiceRegistry>, Arc<dyn InstanceSource>) =
            match &config.server.registry_addr {
                Some(addr) => {
                    tracing::info!(registry_addr = %addr, "Using remote service discovery");
                    let remote = RemoteRegistry::connect_lazy(addr, config.call_timeout())?;
                    (None, Arc::new(remote))
                }
                None => {
                    let registry = ServiceRegistry::new(config.registry_config());
                    (Some(registry.clone()), Arc::new(registry))
                }
            };

        let tracker = ErrorTracker::new(config.breaker_config(), registry.clone());
        let cache = CacheLayer::in_memory(
            &config.cache.shards,
            config.cache_ttl(),
            config.cache.virtual_nodes,
        )?;

        let dispatcher = Dispatcher::new(
            source,
            InstanceSelector::new(tracker),
            ConcurrencyLimiter::new(config.dispatch.max_concurrent_calls),
            Arc::new(cache),
            Arc::new(GrpcBackendClient::new(config.connect_timeout())),
            config.call_timeout(),
        );

        Ok(Self {
            registry,
            dispatcher: Arc::new(dispatcher),
            config,
        })
    }

    /// 在给定监听器上运行服务，直到 `shutdown` 被取消
    pub async fn serve(
        self,
        discovery_listener: Option<TcpListener>,
        gateway_listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), BoxError> {
        let sweep = self.registry.as_ref().map(ServiceRegistry::start_health_sweep);
        let expiry = self
            .dispatcher
            .cache()
            .start_expiry_sweep(self.config.cache_purge_interval());

        let discovery = {
            let registry = self.registry.clone();
            let shutdown = shutdown.clone();
            async move {
                match (registry, discovery_listener) {
                    (Some(registry), Some(listener)) => {
                        tracing::info!(addr = ?listener.local_addr().ok(), "Discovery endpoint listening");
                        Server::builder()
                            .add_service(RegistrationServiceServer::new(RegistrationEndpoint::new(registry)))
                            .serve_with_incoming_shutdown(
                                TcpListenerStream::new(listener),
                                shutdown.cancelled_owned(),
                            )
                            .await
                    }
                    _ => Ok(()),
                }
            }
        };

        let gateway = {
            let endpoint = GatewayEndpoint::new(self.dispatcher.clone(), self.config.routes.clone());
            let shutdown = shutdown.clone();
            async move {
                tracing::info!(addr = ?gateway_listener.local_addr().ok(), "Gateway endpoint listening");
                Server::builder()
                    .add_service(GatewayServiceServer::new(endpoint))
                    .serve_with_incoming_shutdown(
                        TcpListenerStream::new(gateway_listener),
                        shutdown.cancelled_owned(),
                    )
                    .await
            }
        };

        let result = futures::future::try_join(discovery, gateway).await;

        // 停止接收新的后端调用
        self.dispatcher.limiter().close();
        if let Some(handle) = sweep {
            handle.abort();
        }
        expiry.abort();
        result?;
        Ok(())
    }
}

// 收到信号后取消 `shutdown`；无法监听信号时继续运行，不触发关闭
fn spawn_shutdown_listener<S>(signal: S, shutdown: CancellationToken) -> JoinHandle<()>
where
    S: Future<Output = io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化时忽略
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn start() -> Result<(), BoxError> {
    init_tracing();

    let config = Config::load()?;
    tracing::info!(
        discovery_addr = %config.server.discovery_addr,
        gateway_addr = %config.server.gateway_addr,
        max_concurrent_calls = config.dispatch.max_concurrent_calls,
        "Starting gateway server..."
    );

    let gateway = Gateway::build(config)?;
    let discovery_listener = match gateway.registry {
        Some(_) => Some(TcpListener::bind(&gateway.config.server.discovery_addr).await?),
        None => None,
    };
    let gateway_listener = TcpListener::bind(&gateway.config.server.gateway_addr).await?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(tokio::signal::ctrl_c(), shutdown.clone());

    gateway.serve(discovery_listener, gateway_listener, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_cancels_shutdown() {
        let shutdown = CancellationToken::new();
        spawn_shutdown_listener(async { Ok(()) }, shutdown.clone())
            .await
            .unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_signal_install_failure_keeps_running() {
        let shutdown = CancellationToken::new();
        let failing = async { Err(io::Error::other("signal handler unavailable")) };
        spawn_shutdown_listener(failing, shutdown.clone())
            .await
            .unwrap();
        assert!(!shutdown.is_cancelled());
    }
}
