//! 读取策略
//!
//! 每个策略把选择器返回的资源句柄读成二进制数据。某些来源的句柄
//! 直接读取时会得到零字节，此时由后续策略接手。

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use ctscan_core::AcquisitionError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::picker::PickedAsset;

/// 策略读到的原始数据
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub bytes: Bytes,
    /// 读取机制自带的类型标记，可能与实际 MIME 不一致
    pub declared_type: Option<String>,
}

/// 读取策略接口
#[async_trait]
pub trait ReadStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn read(&self, asset: &PickedAsset) -> Result<RawPayload, AcquisitionError>;
}

/// 把 URI 解析为本地路径；非本地 URI 返回 None
fn local_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if uri.contains("://") || uri.starts_with("data:") {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// 远程资源的默认下载超时
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// 直接按二进制读取资源句柄
#[derive(Debug, Clone)]
pub struct UriFetch {
    http: reqwest::Client,
    timeout: Duration,
}

impl UriFetch {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for UriFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadStrategy for UriFetch {
    fn name(&self) -> &str {
        "uri-fetch"
    }

    async fn read(&self, asset: &PickedAsset) -> Result<RawPayload, AcquisitionError> {
        if asset.uri.starts_with("http://") || asset.uri.starts_with("https://") {
            let response = self
                .http
                .get(&asset.uri)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| AcquisitionError::PlatformReadFailure(e.to_string()))?;
            if !response.status().is_success() {
                return Err(AcquisitionError::PlatformReadFailure(format!(
                    "Failed to fetch image: {}",
                    response.status()
                )));
            }
            let declared_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AcquisitionError::PlatformReadFailure(e.to_string()))?;
            return Ok(RawPayload { bytes, declared_type });
        }

        let path = local_path(&asset.uri).ok_or_else(|| {
            AcquisitionError::PlatformReadFailure(format!("unsupported resource handle: {}", asset.uri))
        })?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| AcquisitionError::PlatformReadFailure(format!("{}: {}", path.display(), e)))?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(RawPayload {
            bytes: Bytes::from(data),
            declared_type: None,
        })
    }
}

/// 以 base64 文本读取资源并解码
///
/// 支持 `data:<mime>;base64,<payload>` URI 与内容为 base64 文本的文件。
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Decode;

impl Base64Decode {
    fn decode(text: &str) -> Result<Bytes, AcquisitionError> {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map(Bytes::from)
            .map_err(|e| AcquisitionError::PlatformReadFailure(format!("invalid base64: {}", e)))
    }
}

#[async_trait]
impl ReadStrategy for Base64Decode {
    fn name(&self) -> &str {
        "base64-decode"
    }

    async fn read(&self, asset: &PickedAsset) -> Result<RawPayload, AcquisitionError> {
        if let Some(rest) = asset.uri.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                AcquisitionError::PlatformReadFailure("malformed data URI".to_string())
            })?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                AcquisitionError::PlatformReadFailure("data URI is not base64 encoded".to_string())
            })?;
            return Ok(RawPayload {
                bytes: Self::decode(payload)?,
                declared_type: Some(mime.to_string()).filter(|m| !m.is_empty()),
            });
        }

        let path = local_path(&asset.uri).ok_or_else(|| {
            AcquisitionError::PlatformReadFailure(format!("unsupported resource handle: {}", asset.uri))
        })?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AcquisitionError::PlatformReadFailure(format!("{}: {}", path.display(), e)))?;
        debug!("Base64 length: {}", text.len());

        Ok(RawPayload {
            bytes: Self::decode(&text)?,
            declared_type: Some("image/jpeg".to_string()),
        })
    }
}
