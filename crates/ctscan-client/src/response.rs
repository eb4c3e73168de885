//! 响应解析
//!
//! 把 HTTP 状态码与响应体映射成各组件的结果或错误，不涉及网络。

use ctscan_core::{
    ApiError, ClassificationError, DoctorProfile, PatientDetail, PatientSummary, PersistenceError,
    PredictionResult, SavedRecordAck,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// 从 `{error}` 或 `{message}` 响应体中提取错误信息
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_default()
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// 映射分类接口的响应
pub fn map_classification(status: u16, body: &str) -> Result<PredictionResult, ClassificationError> {
    match status {
        s if is_success(s) => {
            if body.trim().is_empty() {
                return Err(ClassificationError::Unknown("Empty response from server".to_string()));
            }
            let prediction: PredictionResult = serde_json::from_str(body)
                .map_err(|e| ClassificationError::MalformedResponse(e.to_string()))?;
            for issue in prediction.consistency_issues() {
                warn!("Suspicious prediction from server: {}", issue);
            }
            Ok(prediction)
        }
        401 => Err(ClassificationError::Unauthenticated),
        400 => Err(ClassificationError::InvalidInput(error_message(body))),
        500 => Err(ClassificationError::ServerError(error_message(body))),
        other => {
            let message = error_message(body);
            Err(ClassificationError::Unknown(if message.is_empty() {
                format!("HTTP {}", other)
            } else {
                message
            }))
        }
    }
}

/// 映射保存接口的响应
///
/// 2xx 但 `success` 不为 true 时视为服务器拒绝。
pub fn map_save(status: u16, body: &str) -> Result<SavedRecordAck, PersistenceError> {
    match status {
        s if is_success(s) => {
            if body.trim().is_empty() {
                return Err(PersistenceError::Unknown("Empty response from server".to_string()));
            }
            let value: Value = serde_json::from_str(body)
                .map_err(|e| PersistenceError::MalformedResponse(e.to_string()))?;
            let Some(object) = value.as_object() else {
                return Err(PersistenceError::MalformedResponse(
                    "expected a JSON object".to_string(),
                ));
            };

            let message = object.get("message").and_then(Value::as_str).map(str::to_string);
            if object.get("success").and_then(Value::as_bool) != Some(true) {
                let reason = object
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(message)
                    .unwrap_or_else(|| "Server did not confirm the save".to_string());
                return Err(PersistenceError::Rejected(reason));
            }

            let record_id = object.get("recordId").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            Ok(SavedRecordAck {
                success: true,
                message,
                record_id,
            })
        }
        401 => Err(PersistenceError::Unauthenticated),
        400 => Err(PersistenceError::Rejected(error_message(body))),
        500 => Err(PersistenceError::ServerError(error_message(body))),
        other => {
            let message = error_message(body);
            Err(PersistenceError::Unknown(if message.is_empty() {
                format!("HTTP {}", other)
            } else {
                message
            }))
        }
    }
}

/// 映射其他接口的错误状态
pub fn map_api_status(status: u16, body: &str) -> ApiError {
    let message = error_message(body);
    match status {
        401 => ApiError::Unauthenticated,
        404 => ApiError::NotFound(message),
        400 => ApiError::Rejected(message),
        status => ApiError::Status { status, message },
    }
}

/// 映射登录与注册接口的状态码
///
/// 这两个接口的 401（密码错误）与 409（邮箱已注册）是凭据被拒，
/// 不代表已有会话失效。
pub fn map_credentials_status(status: u16, body: &str) -> ApiError {
    match status {
        401 | 409 => ApiError::Rejected(error_message(body)),
        status => map_api_status(status, body),
    }
}

/// 解析登录与注册接口的响应体
pub(crate) fn parse_credentials(status: u16, body: &str) -> Result<LoginResponse, ApiError> {
    if !is_success(status) {
        return Err(map_credentials_status(status, body));
    }
    serde_json::from_str(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}

/// 解析其他接口的响应体
pub fn parse_api<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ApiError> {
    if !is_success(status) {
        return Err(map_api_status(status, body));
    }
    serde_json::from_str(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}

/// 带 `success` 标记的响应需要显式确认
pub(crate) fn ensure_success(success: Option<bool>, message: Option<String>, error: Option<String>) -> Result<(), ApiError> {
    if success == Some(false) {
        return Err(ApiError::Rejected(error.or(message).unwrap_or_default()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub doctor: Option<DoctorProfile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub doctor: Option<DoctorProfile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PatientsResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub patients: Vec<PatientSummary>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddPatientResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub patient: Option<PatientSummary>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PatientResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub patient: Option<PatientDetail>,
}
