//! # CT Scan 后端客户端
//!
//! 与外部推理与记录服务通信：
//! - 分类：上传影像，取得结构化的分类结果
//! - 保存：上传影像、分类结果与临床备注
//! - 记录：登录、医生资料、历史记录、患者名册、健康检查
//!
//! 响应体在边界处按显式结构校验，不符合时报告格式错误。

pub mod client;
pub mod config;
pub mod response;

pub use client::{check_save_prerequisites, prediction_field, routes, ApiClient, ScanApi};
pub use config::{ClientConfig, ConfigValidator, API_URL_ENV, DEFAULT_API_URL};
