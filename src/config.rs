use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::time::Duration;

use crate::services::balancer::BreakerConfig;
use crate::services::dispatcher::ResourceRoute;
use crate::services::registry::RegistryConfig;

const ENV_PREFIX: &str = "GATEWAY_";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistrySection,
    pub breaker: BreakerSection,
    pub dispatch: DispatchSection,
    pub cache: CacheSection,
    pub routes: Vec<ResourceRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务发现端点监听地址
    pub discovery_addr: String,
    /// 网关入口监听地址
    pub gateway_addr: String,
    /// 远程服务发现端点；设置后不再使用本进程内的注册表
    pub registry_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub heartbeat_timeout_ms: u64,
    pub critical_load_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub max_errors: u32,
    pub window_factor: f64,
    pub ejection_cooldown_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_concurrent_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub shards: Vec<String>,
    pub ttl_secs: u64,
    pub virtual_nodes: usize,
    /// 过期条目清理周期
    pub purge_interval_secs: u64,
}

// 环境变量覆盖项，例如 GATEWAY_CALL_TIMEOUT_MS=2000
#[derive(Debug, Default, Deserialize)]
pub struct EnvOverrides {
    pub discovery_addr: Option<String>,
    pub gateway_addr: Option<String>,
    pub registry_addr: Option<String>,
    pub call_timeout_ms: Option<u64>,
    pub max_concurrent_calls: Option<usize>,
    pub heartbeat_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            registry: RegistrySection::default(),
            breaker: BreakerSection::default(),
            dispatch: DispatchSection::default(),
            cache: CacheSection::default(),
            routes: vec![ResourceRoute::records(), ResourceRoute::prescriptions()],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            discovery_addr: "0.0.0.0:50053".to_string(),
            gateway_addr: "0.0.0.0:50050".to_string(),
            registry_addr: None,
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 6000,
            critical_load_threshold: 60,
        }
    }
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            max_errors: 3,
            window_factor: 3.5,
            ejection_cooldown_ms: 30_000,
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5000,
            connect_timeout_ms: 1000,
            max_concurrent_calls: 7,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            shards: vec![
                "shard-0".to_string(),
                "shard-1".to_string(),
                "shard-2".to_string(),
            ],
            ttl_secs: 300,
            virtual_nodes: 128,
            purge_interval_secs: 60,
        }
    }
}

impl Config {
    /// 加载顺序：.env -> 配置文件（不存在时使用默认值）-> GATEWAY_ 前缀的环境变量
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match fs::read_to_string(&path) {
            Ok(config_str) => Self::from_toml_str(&config_str)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "Config file not found, using defaults");
                Self::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        config.apply_env(envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn apply_env(&mut self, overrides: EnvOverrides) {
        if let Some(addr) = overrides.discovery_addr {
            self.server.discovery_addr = addr;
        }
        if let Some(addr) = overrides.gateway_addr {
            self.server.gateway_addr = addr;
        }
        if let Some(addr) = overrides.registry_addr {
            self.server.registry_addr = Some(addr);
        }
        if let Some(ms) = overrides.call_timeout_ms {
            self.dispatch.call_timeout_ms = ms;
        }
        if let Some(n) = overrides.max_concurrent_calls {
            self.dispatch.max_concurrent_calls = n;
        }
        if let Some(ms) = overrides.heartbeat_timeout_ms {
            self.registry.heartbeat_timeout_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid("dispatch.max_concurrent_calls must be > 0".into()));
        }
        if self.dispatch.call_timeout_ms == 0 || self.registry.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if self.cache.shards.is_empty() {
            return Err(ConfigError::Invalid("cache.shards must not be empty".into()));
        }
        if self.cache.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid("cache.purge_interval_secs must be > 0".into()));
        }
        if self.breaker.max_errors == 0 {
            return Err(ConfigError::Invalid("breaker.max_errors must be > 0".into()));
        }
        if !(self.breaker.window_factor.is_finite() && self.breaker.window_factor > 0.0) {
            return Err(ConfigError::Invalid("breaker.window_factor must be positive".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.connect_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.registry.heartbeat_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn cache_purge_interval(&self) -> Duration {
        Duration::from_secs(self.cache.purge_interval_secs)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            heartbeat_timeout: self.heartbeat_timeout(),
            critical_load_threshold: self.registry.critical_load_threshold,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig::from_call_timeout(
            self.call_timeout(),
            self.breaker.window_factor,
            self.breaker.max_errors,
            Duration::from_millis(self.breaker.ejection_cooldown_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(6));
        assert_eq!(config.dispatch.max_concurrent_calls, 7);
        assert_eq!(config.breaker_config().window, Duration::from_millis(17_500));
        assert_eq!(config.routes.len(), 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [dispatch]
            call_timeout_ms = 2000

            [cache]
            shards = ["a", "b"]

            [[routes]]
            name = "records"
            service_type = "records"
            grpc_service = "records.RecordService"
            get_method = "GetRecordInfo"
            "#,
        )
        .unwrap();

        assert_eq!(config.call_timeout(), Duration::from_secs(2));
        assert_eq!(config.dispatch.max_concurrent_calls, 7);
        assert_eq!(config.cache.shards, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.cache_purge_interval(), Duration::from_secs(60));
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].list_method, None);
        assert_eq!(config.server.discovery_addr, "0.0.0.0:50053");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(EnvOverrides {
            registry_addr: Some("http://discovery:50053".into()),
            max_concurrent_calls: Some(16),
            ..Default::default()
        });
        assert_eq!(config.server.registry_addr.as_deref(), Some("http://discovery:50053"));
        assert_eq!(config.dispatch.max_concurrent_calls, 16);
        assert_eq!(config.dispatch.call_timeout_ms, 5000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.dispatch.max_concurrent_calls = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.cache.shards.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.breaker.window_factor = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.purge_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml_str("dispatch = 3"),
            Err(ConfigError::Toml(_))
        ));
    }
}
