//! 影像采集器

use ctscan_core::utils::resolve_image_type;
use ctscan_core::{AcquisitionError, CapturedImage};
use tracing::{debug, info, warn};

use crate::picker::{ImagePicker, PickedAsset};
use crate::strategy::{Base64Decode, RawPayload, ReadStrategy, UriFetch};

/// 影像采集器
///
/// 读取策略按顺序尝试，第一个得到非空数据的策略胜出。
pub struct ImageAcquirer {
    strategies: Vec<Box<dyn ReadStrategy>>,
}

impl ImageAcquirer {
    /// 默认策略：直接读取，其次 base64 解码
    pub fn new() -> Self {
        Self::with_strategies(vec![Box::new(UriFetch::new()), Box::new(Base64Decode)])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ReadStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// 请求一张影像；`Ok(None)` 表示用户取消
    pub async fn acquire(&self, picker: &dyn ImagePicker) -> Result<Option<CapturedImage>, AcquisitionError> {
        let Some(asset) = picker.pick().await? else {
            debug!("Image selection cancelled");
            return Ok(None);
        };
        self.normalize(&asset).await.map(Some)
    }

    /// 把选中的资源统一成二进制数据与 MIME 类型
    pub async fn normalize(&self, asset: &PickedAsset) -> Result<CapturedImage, AcquisitionError> {
        let payload = self.read_first_non_empty(asset).await?;

        let resolved = resolve_image_type(
            asset.mime_type.as_deref(),
            asset.type_hint.as_deref(),
            asset.file_name.as_deref(),
            &asset.uri,
        );

        if let Some(declared) = payload.declared_type.as_deref() {
            if !declared.eq_ignore_ascii_case(&resolved.mime_type) {
                debug!("Correcting MIME type from {} to {}", declared, resolved.mime_type);
            }
        }

        let image = CapturedImage::new(payload.bytes, resolved.mime_type, resolved.file_extension, asset.uri.clone());
        info!(
            "Acquired image {} ({} bytes, {})",
            image.id,
            image.len(),
            image.mime_type
        );
        Ok(image)
    }

    async fn read_first_non_empty(&self, asset: &PickedAsset) -> Result<RawPayload, AcquisitionError> {
        let mut saw_empty = false;
        let mut last_error = None;

        for strategy in &self.strategies {
            match strategy.read(asset).await {
                Ok(payload) if !payload.bytes.is_empty() => {
                    debug!("Strategy {} produced {} bytes", strategy.name(), payload.bytes.len());
                    return Ok(payload);
                }
                Ok(_) => {
                    warn!("Strategy {} returned zero bytes, trying next", strategy.name());
                    saw_empty = true;
                }
                Err(e) => {
                    warn!("Strategy {} failed: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }

        if saw_empty {
            return Err(AcquisitionError::EmptyOrCorrupt);
        }
        Err(last_error.unwrap_or_else(|| {
            AcquisitionError::PlatformReadFailure("no read strategy configured".to_string())
        }))
    }
}

impl Default for ImageAcquirer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::QueuedPicker;
    use async_trait::async_trait;
    use bytes::Bytes;

    /// 返回固定结果的策略
    struct FixedStrategy {
        name: &'static str,
        outcome: Result<RawPayload, AcquisitionError>,
    }

    impl FixedStrategy {
        fn bytes(name: &'static str, data: &'static [u8], declared: Option<&str>) -> Box<dyn ReadStrategy> {
            Box::new(Self {
                name,
                outcome: Ok(RawPayload {
                    bytes: Bytes::from_static(data),
                    declared_type: declared.map(str::to_string),
                }),
            })
        }

        fn failing(name: &'static str) -> Box<dyn ReadStrategy> {
            Box::new(Self {
                name,
                outcome: Err(AcquisitionError::PlatformReadFailure(format!("{} unavailable", name))),
            })
        }
    }

    #[async_trait]
    impl ReadStrategy for FixedStrategy {
        fn name(&self) -> &str {
            self.name
        }

        async fn read(&self, _asset: &PickedAsset) -> Result<RawPayload, AcquisitionError> {
            self.outcome.clone()
        }
    }

    fn asset_with_png_hint() -> PickedAsset {
        PickedAsset::from_uri("ph://asset/77").with_mime_type("image/png")
    }

    #[tokio::test]
    async fn test_empty_primary_falls_back_with_picker_mime() {
        let acquirer = ImageAcquirer::with_strategies(vec![
            FixedStrategy::bytes("primary", b"", Some("image/png")),
            FixedStrategy::bytes("fallback", b"\x89PNG-data", Some("image/jpeg")),
        ]);

        let image = acquirer.normalize(&asset_with_png_hint()).await.unwrap();
        assert_eq!(image.bytes.as_ref(), b"\x89PNG-data");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.file_extension, "png");
    }

    #[tokio::test]
    async fn test_all_empty_is_empty_or_corrupt() {
        let acquirer = ImageAcquirer::with_strategies(vec![
            FixedStrategy::bytes("primary", b"", None),
            FixedStrategy::bytes("fallback", b"", None),
        ]);

        let result = acquirer.normalize(&asset_with_png_hint()).await;
        assert_eq!(result, Err(AcquisitionError::EmptyOrCorrupt));
    }

    #[tokio::test]
    async fn test_empty_then_error_is_empty_or_corrupt() {
        let acquirer = ImageAcquirer::with_strategies(vec![
            FixedStrategy::bytes("primary", b"", None),
            FixedStrategy::failing("fallback"),
        ]);

        let result = acquirer.normalize(&asset_with_png_hint()).await;
        assert_eq!(result, Err(AcquisitionError::EmptyOrCorrupt));
    }

    #[tokio::test]
    async fn test_all_errors_is_platform_failure() {
        let acquirer = ImageAcquirer::with_strategies(vec![
            FixedStrategy::failing("primary"),
            FixedStrategy::failing("fallback"),
        ]);

        let result = acquirer.normalize(&asset_with_png_hint()).await;
        assert_eq!(
            result,
            Err(AcquisitionError::PlatformReadFailure("fallback unavailable".to_string()))
        );
    }

    #[tokio::test]
    async fn test_first_non_empty_wins() {
        let acquirer = ImageAcquirer::with_strategies(vec![
            FixedStrategy::bytes("primary", b"first", None),
            FixedStrategy::bytes("fallback", b"second", None),
        ]);

        let image = acquirer.normalize(&PickedAsset::from_uri("/tmp/scan.bmp")).await.unwrap();
        assert_eq!(image.bytes.as_ref(), b"first");
        assert_eq!(image.mime_type, "image/bmp");
    }

    #[tokio::test]
    async fn test_cancelled_pick() {
        let picker = QueuedPicker::new([None]);
        let acquired = ImageAcquirer::new().acquire(&picker).await.unwrap();
        assert!(acquired.is_none());
    }

    #[tokio::test]
    async fn test_default_strategies_read_zero_byte_file_then_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jpg");
        std::fs::write(&path, b"").unwrap();

        let acquirer = ImageAcquirer::new();
        assert_eq!(acquirer.strategy_names(), vec!["uri-fetch", "base64-decode"]);

        let picker = QueuedPicker::new([Some(PickedAsset::from_uri(path.to_string_lossy()))]);
        let result = acquirer.acquire(&picker).await;
        assert_eq!(result, Err(AcquisitionError::EmptyOrCorrupt));
    }
}
