//! # CT Scan Core
//!
//! 影像分诊客户端的核心模块，提供基础数据结构、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{
    AcquisitionError, ApiError, ClassificationError, CtScanError, PersistenceError, Result,
};
pub use models::*;
