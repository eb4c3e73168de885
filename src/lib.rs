//! # CT Scan 影像分诊客户端
//!
//! 汇总各子模块，便于演示程序与下游使用：
//! - [`domain`]：数据模型、错误定义、通用工具
//! - [`storage`]：本地键值状态
//! - [`acquisition`]：影像采集
//! - [`client`]：后端客户端与配置
//! - [`workflow`]：扫描状态机与工作流控制器

pub use ctscan_acquisition as acquisition;
pub use ctscan_client as client;
pub use ctscan_core as domain;
pub use ctscan_storage as storage;
pub use ctscan_workflow as workflow;
