use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};

use super::error::BackendError;

/// 按地址复用的后端连接池
#[derive(Debug, Clone)]
pub struct ChannelPool {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
    connect_timeout: Duration,
}

impl ChannelPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            connect_timeout,
        }
    }

    pub async fn get_or_connect(&self, address: &str) -> Result<Channel, BackendError> {
        // 先尝试从缓存获取连接
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(address) {
                return Ok(channel.clone());
            }
        }

        let endpoint = Endpoint::from_shared(address.to_string())
            .map_err(|e| BackendError::InvalidAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to connect to {address}: {e}")))?;

        let mut channels = self.channels.write().await;
        // 并发创建时保留先写入的连接
        let channel = channels
            .entry(address.to_string())
            .or_insert(channel)
            .clone();

        tracing::debug!(address = %address, "Created new backend channel");
        Ok(channel)
    }

    pub async fn remove(&self, address: &str) {
        let mut channels = self.channels.write().await;
        if channels.remove(address).is_some() {
            tracing::debug!(address = %address, "Removed backend channel");
        }
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let pool = ChannelPool::new(Duration::from_millis(100));
        let err = pool.get_or_connect("not a uri").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidAddress { .. }));
        assert_eq!(pool.len().await, 0);
    }
}
