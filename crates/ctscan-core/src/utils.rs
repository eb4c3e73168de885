//! 通用工具函数

use chrono::Utc;

/// 默认扩展名与 MIME 类型
pub const DEFAULT_EXTENSION: &str = "jpg";
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// 解析出的影像类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub mime_type: String,
    pub file_extension: String,
}

/// 按优先级解析 MIME 类型：MIME 提示 → 类型提示 → 文件扩展名 → 默认 jpg
///
/// 类型提示只有形如 `image/png` 时才被采用。
pub fn resolve_image_type(
    mime_hint: Option<&str>,
    type_hint: Option<&str>,
    file_name: Option<&str>,
    uri: &str,
) -> ResolvedType {
    let from_mime = |value: &str| {
        let mime = value.split(';').next().unwrap_or("").trim().to_lowercase();
        let subtype = mime.split_once('/').map(|(_, s)| s.to_string()).unwrap_or_default();
        let file_extension = if subtype.is_empty() { DEFAULT_EXTENSION.to_string() } else { subtype };
        ResolvedType { mime_type: mime, file_extension }
    };

    if let Some(mime) = mime_hint.filter(|m| m.contains('/')) {
        return from_mime(mime);
    }
    if let Some(hint) = type_hint.filter(|t| t.contains('/')) {
        return from_mime(hint);
    }

    let file_extension = file_name
        .and_then(extension_of)
        .or_else(|| extension_of(uri))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let mime_type = mime_for_extension(&file_extension);
    ResolvedType { mime_type, file_extension }
}

/// 取路径或 URI 最后一段的扩展名（小写）
pub fn extension_of(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let last_segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (_, ext) = last_segment.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// 扩展名对应的 MIME 类型
pub fn mime_for_extension(ext: &str) -> String {
    match ext {
        "jpg" | "jpeg" => DEFAULT_MIME_TYPE.to_string(),
        "tif" => "image/tiff".to_string(),
        other => format!("image/{}", other),
    }
}

/// 日志中遮蔽患者标识
pub fn mask_pii(patient_id: &str) -> String {
    let prefix: String = patient_id.chars().take(4).collect();
    if patient_id.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", prefix)
    }
}

/// 当前毫秒时间戳
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_hint_wins() {
        let resolved = resolve_image_type(Some("image/png"), Some("image/gif"), Some("a.bmp"), "file:///x.jpg");
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.file_extension, "png");
    }

    #[test]
    fn test_type_hint_without_slash_is_ignored() {
        let resolved = resolve_image_type(None, Some("image"), None, "file:///tmp/scan.PNG");
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.file_extension, "png");
    }

    #[test]
    fn test_default_when_nothing_known() {
        let resolved = resolve_image_type(None, None, None, "content://media/42");
        assert_eq!(resolved.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(resolved.file_extension, DEFAULT_EXTENSION);

        let resolved = resolve_image_type(None, None, Some("scan.jpg"), "blob:xyz");
        assert_eq!(resolved.mime_type, "image/jpeg");
        assert_eq!(resolved.file_extension, "jpg");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("/a/b.c/photo.JPEG?x=1"), Some("jpeg".to_string()));
        assert_eq!(extension_of("C:\\scans\\lung.bmp"), Some("bmp".to_string()));
        assert_eq!(extension_of("/a/b.c/photo"), None);
    }

    #[test]
    fn test_mask_pii() {
        assert_eq!(mask_pii("P1"), "****");
        assert_eq!(mask_pii("PATIENT-42"), "PATI****");
    }
}
