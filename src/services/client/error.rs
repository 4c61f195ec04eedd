use std::time::Duration;

/// 后端调用错误类型
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid backend address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("Backend returned HTTP status {0}")]
    Http(http::StatusCode),
    #[error("Backend returned grpc-status {code}: {message}")]
    Status { code: i32, message: String },
    #[error("Invalid gRPC frame: {0}")]
    InvalidFrame(String),
}

impl BackendError {
    // 连接层面的错误需要丢弃缓存的连接
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BackendError::Transport(_) | BackendError::InvalidAddress { .. })
    }
}
