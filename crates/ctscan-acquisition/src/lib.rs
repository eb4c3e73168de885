//! # CT Scan 影像采集
//!
//! 从输入源获取单张影像，并把不同来源的交付方式统一成
//! 一块二进制数据加 MIME 类型：
//! - 选择器：文件选择、预置队列
//! - 读取策略：按顺序尝试，直到某个策略得到非空数据
//! - 类型解析：MIME 提示 → 类型提示 → 扩展名 → 默认 jpg

pub mod acquirer;
pub mod picker;
pub mod strategy;

pub use acquirer::ImageAcquirer;
pub use picker::{FilePicker, ImagePicker, PickedAsset, QueuedPicker};
pub use strategy::{Base64Decode, RawPayload, ReadStrategy, UriFetch, DEFAULT_FETCH_TIMEOUT};
