use std::fmt;
use std::time::Duration;

// 实例唯一标识：服务名 + 主机 + 端口
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(name: &str, host: &str, port: u16) -> Self {
        Self(format!("{name}:{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// 服务实例快照
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub load: u32,
}

impl ServiceInstance {
    pub fn new(name: &str, host: &str, port: u16) -> Self {
        Self {
            id: InstanceId::new(name, host, port),
            name: name.to_string(),
            host: host.to_string(),
            port,
            load: 0,
        }
    }

    pub fn with_load(mut self, load: u32) -> Self {
        self.load = load;
        self
    }

    /// 后端 gRPC 地址
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// 实例所在集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Live,
    Deleted,
}

#[derive(Debug, Clone)]
pub(crate) struct InstanceRecord {
    pub(crate) instance: ServiceInstance,
    pub(crate) state: InstanceState,
    // 首次注册顺序，用于快照排序
    pub(crate) seq: u64,
}

// 心跳处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Refreshed,
    Resurrected,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub heartbeat_timeout: Duration,
    pub critical_load_threshold: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(6000),
            critical_load_threshold: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceId),
}
