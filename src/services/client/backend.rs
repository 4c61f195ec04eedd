use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::HeaderMap;
use http_body_util::{BodyExt, Full};
use tower::util::ServiceExt;

use super::channel_pool::ChannelPool;
use super::error::BackendError;

/// 后端 RPC 客户端接口，载荷对网关不透明
#[tonic::async_trait]
pub trait BackendClient: Send + Sync + fmt::Debug {
    async fn call(
        &self,
        address: &str,
        method: &str,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, BackendError>;
}

/// 以原始字节转发 gRPC 一元调用的客户端
#[derive(Debug, Clone)]
pub struct GrpcBackendClient {
    pool: ChannelPool,
}

impl GrpcBackendClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            pool: ChannelPool::new(connect_timeout),
        }
    }

    async fn unary(&self, address: &str, method: &str, payload: Bytes) -> Result<Bytes, BackendError> {
        let channel = self.pool.get_or_connect(address).await?;

        let path = if method.starts_with('/') {
            method.to_string()
        } else {
            format!("/{method}")
        };

        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/grpc")
            .header(http::header::TE, "trailers")
            .body(tonic::body::Body::new(Full::new(encode_frame(&payload))))
            .map_err(|e| BackendError::Transport(format!("Failed to build request: {e}")))?;

        let response = channel
            .oneshot(request)
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to send request: {e}")))?;

        let (parts, body) = response.into_parts();
        if !parts.status.is_success() {
            return Err(BackendError::Http(parts.status));
        }

        let collected = body
            .collect()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to read response body: {e}")))?;

        // 只有 header 的响应把 grpc-status 放在头部
        match collected.trailers() {
            Some(trailers) if trailers.contains_key("grpc-status") => check_grpc_status(trailers)?,
            _ => check_grpc_status(&parts.headers)?,
        }

        decode_frame(collected.to_bytes())
    }
}

#[tonic::async_trait]
impl BackendClient for GrpcBackendClient {
    async fn call(
        &self,
        address: &str,
        method: &str,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<Bytes, BackendError> {
        let result = tokio::time::timeout(deadline, self.unary(address, method, payload))
            .await
            .map_err(|_| BackendError::Timeout(deadline))
            .and_then(|inner| inner);

        if let Err(e) = &result {
            if e.is_connection_error() {
                self.pool.remove(address).await;
            }
        }
        result
    }
}

// gRPC 消息帧：1 字节压缩标记 + 4 字节大端长度 + 消息体
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 5);
    buf.put_u8(0);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn decode_frame(mut frame: Bytes) -> Result<Bytes, BackendError> {
    if frame.len() < 5 {
        return Err(BackendError::InvalidFrame(format!(
            "expected at least 5 bytes, got {}",
            frame.len()
        )));
    }

    let compressed = frame.get_u8();
    if compressed != 0 {
        return Err(BackendError::InvalidFrame("compressed messages are not supported".into()));
    }

    let len = frame.get_u32() as usize;
    if frame.remaining() < len {
        return Err(BackendError::InvalidFrame(format!(
            "declared length {len} exceeds {} remaining bytes",
            frame.remaining()
        )));
    }
    Ok(frame.split_to(len))
}

pub fn check_grpc_status(headers: &HeaderMap) -> Result<(), BackendError> {
    let Some(value) = headers.get("grpc-status") else {
        return Err(BackendError::InvalidFrame("missing grpc-status".into()));
    };

    let code = value
        .to_str()
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
        .ok_or_else(|| BackendError::InvalidFrame("malformed grpc-status".into()))?;

    if code == 0 {
        return Ok(());
    }

    let message = headers
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Err(BackendError::Status { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(b"abc");
        assert_eq!(&frame[..], &[0, 0, 0, 0, 3, b'a', b'b', b'c']);
        assert_eq!(decode_frame(frame).unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let err = decode_frame(Bytes::from_static(&[0, 0, 0, 0, 9, 1])).unwrap_err();
        assert!(matches!(err, BackendError::InvalidFrame(_)));
        assert!(decode_frame(Bytes::from_static(&[0, 0])).is_err());
    }

    #[test]
    fn test_decode_rejects_compressed_frame() {
        assert!(decode_frame(Bytes::from_static(&[1, 0, 0, 0, 0])).is_err());
    }

    #[test]
    fn test_grpc_status_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", HeaderValue::from_static("0"));
        assert!(check_grpc_status(&headers).is_ok());

        headers.insert("grpc-status", HeaderValue::from_static("5"));
        headers.insert("grpc-message", HeaderValue::from_static("record not found"));
        match check_grpc_status(&headers) {
            Err(BackendError::Status { code, message }) => {
                assert_eq!(code, 5);
                assert_eq!(message, "record not found");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(check_grpc_status(&HeaderMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_within_deadline() {
        let client = GrpcBackendClient::new(Duration::from_millis(200));
        let result = client
            .call(
                "http://127.0.0.1:1",
                "records.RecordsService/getRecordInfo",
                Bytes::new(),
                Duration::from_millis(500),
            )
            .await;
        assert!(result.is_err());
    }
}
