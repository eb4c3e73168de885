//! 错误定义模块

use thiserror::Error;

const SESSION_EXPIRED: &str = "Your session has expired. Please log in again.";

/// 图像采集错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("图像为空或已损坏")]
    EmptyOrCorrupt,

    #[error("读取图像失败: {0}")]
    PlatformReadFailure(String),
}

impl AcquisitionError {
    /// 面向用户的提示文本
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyOrCorrupt => "Selected image is empty or corrupted.".to_string(),
            Self::PlatformReadFailure(_) => "Failed to select image. Please try again.".to_string(),
        }
    }
}

/// 分类请求错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("未认证或会话已过期")]
    Unauthenticated,

    #[error("无效的影像输入: {0}")]
    InvalidInput(String),

    #[error("请求超时")]
    Timeout,

    #[error("服务器错误: {0}")]
    ServerError(String),

    #[error("响应格式错误: {0}")]
    MalformedResponse(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl ClassificationError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// 面向用户的阻塞提示文本
    pub fn user_message(&self) -> String {
        let prefix = "Failed to upload image. ";
        match self {
            Self::Unauthenticated => SESSION_EXPIRED.to_string(),
            Self::InvalidInput(msg) => {
                format!("{}{}", prefix, or_default(msg, "Please ensure the image is a valid CT scan."))
            }
            Self::ServerError(msg) => format!("{}{}", prefix, or_default(msg, "Server error occurred.")),
            Self::Timeout => format!("{}Request timed out.", prefix),
            Self::MalformedResponse(msg) | Self::Unknown(msg) => {
                format!("{}{}", prefix, or_default(msg, "Please try again."))
            }
        }
    }
}

/// 保存记录错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("缺少保存前置条件: {0}")]
    MissingPrerequisite(String),

    #[error("未认证或会话已过期")]
    Unauthenticated,

    #[error("服务器拒绝保存: {0}")]
    Rejected(String),

    #[error("请求超时")]
    Timeout,

    #[error("服务器错误: {0}")]
    ServerError(String),

    #[error("响应格式错误: {0}")]
    MalformedResponse(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl PersistenceError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// 面向用户的阻塞提示文本
    pub fn user_message(&self) -> String {
        let prefix = "Failed to save record. ";
        match self {
            Self::MissingPrerequisite(_) => {
                "Please ensure you have selected an image and processed it.".to_string()
            }
            Self::Unauthenticated => SESSION_EXPIRED.to_string(),
            Self::Timeout => format!("{}Request timed out.", prefix),
            Self::Rejected(msg)
            | Self::ServerError(msg)
            | Self::MalformedResponse(msg)
            | Self::Unknown(msg) => format!("{}{}", prefix, or_default(msg, "Please try again.")),
        }
    }
}

/// 其他后端接口（登录、历史、患者列表等）的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("未认证或会话已过期")]
    Unauthenticated,

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("请求被拒绝: {0}")]
    Rejected(String),

    #[error("请求超时")]
    Timeout,

    #[error("HTTP错误 {status}: {message}")]
    Status { status: u16, message: String },

    #[error("响应格式错误: {0}")]
    MalformedResponse(String),

    #[error("网络错误: {0}")]
    Network(String),
}

impl ApiError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated => SESSION_EXPIRED.to_string(),
            Self::Timeout => "Request timed out.".to_string(),
            Self::NotFound(msg) | Self::Rejected(msg) | Self::MalformedResponse(msg) | Self::Network(msg) => {
                or_default(msg, "Failed to load").to_string()
            }
            Self::Status { message, .. } => or_default(message, "Failed to fetch").to_string(),
        }
    }
}

/// 客户端统一错误类型
#[derive(Error, Debug)]
pub enum CtScanError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("本地存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("图像采集错误: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("分类错误: {0}")]
    Classification(#[from] ClassificationError),

    #[error("保存错误: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("接口错误: {0}")]
    Api(#[from] ApiError),

    #[error("未选择患者")]
    NoActivePatient,

    #[error("未登录")]
    NotSignedIn,

    #[error("已有操作正在进行: {0}")]
    OperationInFlight(String),

    #[error("结果已过期，工作流已变化")]
    StaleResult,

    #[error("无效状态转换: 从 {from} 经 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl CtScanError {
    /// 是否应当强制登出并回到登录页
    pub fn is_unauthenticated(&self) -> bool {
        match self {
            Self::Classification(e) => e.is_unauthenticated(),
            Self::Persistence(e) => e.is_unauthenticated(),
            Self::Api(e) => e.is_unauthenticated(),
            Self::NotSignedIn => true,
            _ => false,
        }
    }

    /// 面向用户的阻塞提示文本
    pub fn user_message(&self) -> String {
        match self {
            Self::Acquisition(e) => e.user_message(),
            Self::Classification(e) => e.user_message(),
            Self::Persistence(e) => e.user_message(),
            Self::Api(e) => e.user_message(),
            Self::NoActivePatient => "Please select a patient before proceeding.".to_string(),
            Self::NotSignedIn => "You must be logged in to use this feature.".to_string(),
            other => other.to_string(),
        }
    }
}

fn or_default<'a>(msg: &'a str, default: &'a str) -> &'a str {
    if msg.trim().is_empty() {
        default
    } else {
        msg
    }
}

/// 客户端统一结果类型
pub type Result<T> = std::result::Result<T, CtScanError>;
