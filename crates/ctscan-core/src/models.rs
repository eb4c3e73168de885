//! 核心数据模型定义

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 医生资料（登录后缓存）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DoctorProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// 登录会话
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub profile: DoctorProfile,
}

/// 医生资料的本地扩展字段
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileExtras {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub department: String,
}

/// 当前扫描工作流的患者上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivePatient {
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub doctor_notes: String,
}

impl ActivePatient {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.patient_name = Some(name.into());
        self
    }

    pub fn with_notes(mut self, medical_history: impl Into<String>, doctor_notes: impl Into<String>) -> Self {
        self.medical_history = medical_history.into();
        self.doctor_notes = doctor_notes.into();
        self
    }

    pub fn has_id(&self) -> bool {
        !self.patient_id.trim().is_empty()
    }
}

/// 已采集的影像
///
/// 创建后不可变；更换影像时整体替换。`id` 标识一次采集，
/// 预测结果以它为键，避免把旧预测带到新影像上。
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub id: Uuid,
    pub bytes: Bytes,
    pub mime_type: String,
    pub file_extension: String,
    /// 来源描述（URI 或文件路径）
    pub source: String,
}

impl CapturedImage {
    pub fn new(bytes: Bytes, mime_type: impl Into<String>, file_extension: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            mime_type: mime_type.into(),
            file_extension: file_extension.into(),
            source: source.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 分类请求使用的文件名
    pub fn upload_file_name(&self) -> String {
        format!("scan.{}", self.file_extension)
    }

    /// 保存记录使用的文件名：患者ID + 客户端时间戳
    pub fn record_file_name(&self, patient_id: &str, epoch_millis: i64) -> String {
        format!("{}_{}.{}", patient_id, epoch_millis, self.file_extension)
    }
}

/// 分类结果类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PredictedClass {
    #[serde(alias = "normal", alias = "NORMAL")]
    Normal,
    #[serde(alias = "benign", alias = "BENIGN")]
    Benign,
    #[serde(alias = "malignant", alias = "MALIGNANT")]
    Malignant,
}

impl PredictedClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Benign => "Benign",
            Self::Malignant => "Malignant",
        }
    }
}

impl fmt::Display for PredictedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 各类别概率
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Probabilities {
    pub normal: f64,
    pub malignant: f64,
    pub benign: f64,
}

impl Probabilities {
    pub fn sum(&self) -> f64 {
        self.normal + self.malignant + self.benign
    }
}

/// 推理服务返回的分类结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub predicted_class: PredictedClass,
    pub confidence: f64,
    pub probabilities: Probabilities,
}

impl PredictionResult {
    /// 列出与约定不一致的数值（置信度越界、概率和偏离1）
    ///
    /// 只用于记录告警，结果本身不做修正。
    pub fn consistency_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !(0.0..=1.0).contains(&self.confidence) {
            issues.push(format!("confidence {} outside [0, 1]", self.confidence));
        }
        for (label, value) in [
            ("normal", self.probabilities.normal),
            ("malignant", self.probabilities.malignant),
            ("benign", self.probabilities.benign),
        ] {
            if !(0.0..=1.0).contains(&value) {
                issues.push(format!("probability {} = {} outside [0, 1]", label, value));
            }
        }
        let sum = self.probabilities.sum();
        if (sum - 1.0).abs() > 0.05 {
            issues.push(format!("probabilities sum to {:.3}", sum));
        }
        issues
    }

    /// 置信度百分比，保留一位小数
    pub fn confidence_percent(&self) -> String {
        format!("{:.1}", self.confidence * 100.0)
    }
}

/// 与某次采集绑定的分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPrediction {
    pub image_id: Uuid,
    pub result: PredictionResult,
}

impl ScanPrediction {
    pub fn belongs_to(&self, image: &CapturedImage) -> bool {
        self.image_id == image.id
    }
}

/// 保存成功的确认
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecordAck {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
}

/// 历史记录中的部分概率（字段可能缺失）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordProbabilities {
    #[serde(default)]
    pub benign: Option<f64>,
    #[serde(default)]
    pub malignant: Option<f64>,
    #[serde(default)]
    pub normal: Option<f64>,
}

/// 服务器保存的扫描记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    pub diagnosis: String,
    pub confidence: f64,
    #[serde(default)]
    pub probabilities: Option<RecordProbabilities>,
    #[serde(default)]
    pub medical_history: Option<String>,
    #[serde(default)]
    pub doctor_notes: Option<String>,
}

impl ScanRecord {
    /// 按患者姓名、诊断、患者ID做不区分大小写的子串匹配
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        self.patient_name.as_deref().unwrap_or("").to_lowercase().contains(&q)
            || self.diagnosis.to_lowercase().contains(&q)
            || self.patient_id.to_lowercase().contains(&q)
    }

    /// 影像的访问地址
    pub fn image_url(&self, api_url: &str) -> Option<String> {
        self.image_path.as_ref().map(|path| {
            format!("{}/{}", api_url.trim_end_matches('/'), path).replace('\\', "/")
        })
    }

    pub fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round() as i64
    }
}

/// 过滤历史记录
pub fn filter_records<'a>(records: &'a [ScanRecord], query: &str) -> Vec<&'a ScanRecord> {
    records.iter().filter(|r| r.matches(query)).collect()
}

/// 交给报告编辑流程的草稿
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    pub patient_id: String,
    pub patient_name: String,
    pub diagnosis: String,
    pub confidence: String,
    pub timestamp: String,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub doctor_notes: String,
}

impl ReportDraft {
    /// 由刚保存的扫描生成，置信度保留一位小数
    pub fn from_saved_scan(patient: &ActivePatient, prediction: &PredictionResult, at: DateTime<Utc>) -> Self {
        Self {
            patient_id: patient.patient_id.clone(),
            patient_name: patient.patient_name.clone().unwrap_or_default(),
            diagnosis: prediction.predicted_class.to_string(),
            confidence: prediction.confidence_percent(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            medical_history: patient.medical_history.clone(),
            doctor_notes: patient.doctor_notes.clone(),
        }
    }

    /// 由历史记录生成，置信度取整
    pub fn from_history_record(record: &ScanRecord, now: DateTime<Utc>) -> Self {
        Self {
            patient_id: record.patient_id.clone(),
            patient_name: record.patient_name.clone().unwrap_or_else(|| "Unknown".to_string()),
            diagnosis: record.diagnosis.clone(),
            confidence: record.confidence_percent().to_string(),
            timestamp: record
                .timestamp
                .clone()
                .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            medical_history: record.medical_history.clone().unwrap_or_default(),
            doctor_notes: record.doctor_notes.clone().unwrap_or_default(),
        }
    }
}

/// 患者列表条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: Option<serde_json::Value>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub doctor_notes: String,
    #[serde(default)]
    pub scan_count: u64,
    #[serde(default)]
    pub last_scan: Option<String>,
}

impl PatientSummary {
    /// 选为当前扫描的患者
    pub fn to_active_patient(&self) -> ActivePatient {
        ActivePatient {
            patient_id: self.id.clone(),
            patient_name: Some(self.name.clone()),
            medical_history: self.medical_history.clone(),
            doctor_notes: self.doctor_notes.clone(),
        }
    }
}

/// 新增患者请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub name: String,
    pub age: u32,
    pub gender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub doctor_notes: String,
}

/// 服务健康状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// 与前 30 天相比的变化
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub value: f64,
    pub is_positive: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StatValue {
    pub value: f64,
    #[serde(default)]
    pub trend: Option<Trend>,
}

/// 当前医生的工作量统计
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_scans: StatValue,
    pub detected_cases: StatValue,
    /// 高置信度（>90%）扫描所占百分比
    pub success_rate: StatValue,
    pub active_patients: StatValue,
}

/// 患者详情中的一次扫描
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientScan {
    pub diagnosis: String,
    pub confidence: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// 单个患者的详情与扫描历史
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientDetail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: Option<serde_json::Value>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default, rename = "medical_history")]
    pub medical_history: String,
    #[serde(default)]
    pub scan_count: u64,
    #[serde(default)]
    pub last_scan: Option<String>,
    #[serde(default)]
    pub scans: Vec<PatientScan>,
}

impl PatientDetail {
    pub fn to_active_patient(&self) -> ActivePatient {
        ActivePatient {
            patient_id: self.id.clone(),
            patient_name: Some(self.name.clone()),
            medical_history: self.medical_history.clone(),
            doctor_notes: String::new(),
        }
    }
}
