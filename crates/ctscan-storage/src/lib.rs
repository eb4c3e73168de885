//! # CT Scan 本地存储
//!
//! 设备本地的键值状态，其他界面依赖这些键：
//! - 键值存储：内存实现与 JSON 文件实现
//! - 会话存储：登录令牌与医生资料
//! - 患者选择缓存：下一次扫描使用的患者
//! - 报告交接：一次写入、一次读取的报告草稿

pub mod handoff;
pub mod keys;
pub mod selection;
pub mod session;
pub mod store;

pub use handoff::ReportHandoff;
pub use selection::PatientSelection;
pub use session::SessionStore;
pub use store::{FileStore, KeyValueStore, MemoryStore, SharedStore};
