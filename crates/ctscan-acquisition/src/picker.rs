//! 影像选择器

use async_trait::async_trait;
use ctscan_core::AcquisitionError;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// 选择器返回的资源描述
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PickedAsset {
    /// 资源句柄：文件路径、`file://`、`http(s)://` 或 `data:` URI
    pub uri: String,
    pub mime_type: Option<String>,
    pub type_hint: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

impl PickedAsset {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// 影像选择器接口
///
/// `Ok(None)` 表示用户取消。
#[async_trait]
pub trait ImagePicker: Send + Sync {
    async fn pick(&self) -> Result<Option<PickedAsset>, AcquisitionError>;
}

/// 从本地文件选择
#[derive(Debug, Clone)]
pub struct FilePicker {
    path: PathBuf,
    mime_hint: Option<String>,
}

impl FilePicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_hint: None,
        }
    }

    pub fn with_mime_hint(mut self, mime: Option<String>) -> Self {
        self.mime_hint = mime;
        self
    }
}

#[async_trait]
impl ImagePicker for FilePicker {
    async fn pick(&self) -> Result<Option<PickedAsset>, AcquisitionError> {
        let file_size = tokio::fs::metadata(&self.path).await.ok().map(|m| m.len());
        let asset = PickedAsset {
            uri: self.path.to_string_lossy().to_string(),
            mime_type: self.mime_hint.clone(),
            type_hint: None,
            file_name: self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            file_size,
        };
        debug!("Picked {} ({:?} bytes)", asset.uri, asset.file_size);
        Ok(Some(asset))
    }
}

/// 按顺序返回预置结果的选择器，`None` 项表示取消
#[derive(Debug, Default)]
pub struct QueuedPicker {
    outcomes: Mutex<VecDeque<Option<PickedAsset>>>,
}

impl QueuedPicker {
    pub fn new(outcomes: impl IntoIterator<Item = Option<PickedAsset>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
        }
    }

    pub async fn push(&self, outcome: Option<PickedAsset>) {
        self.outcomes.lock().await.push_back(outcome);
    }
}

#[async_trait]
impl ImagePicker for QueuedPicker {
    async fn pick(&self) -> Result<Option<PickedAsset>, AcquisitionError> {
        Ok(self.outcomes.lock().await.pop_front().flatten())
    }
}
