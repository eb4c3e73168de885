//! # CT Scan 扫描工作流
//!
//! 把采集、分类、保存串成一条线性流程：
//! - 扫描状态机：Idle → Ready → Captured → Classified → Saved
//! - 工作流控制器：协调会话、患者选择、采集器与后端客户端

pub mod controller;
pub mod state_machine;

pub use controller::{ImageSummary, Operation, ScanWorkflow, WorkflowSnapshot};
pub use state_machine::{ScanEvent, ScanState, ScanStateMachine};
