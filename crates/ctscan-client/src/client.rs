//! 后端 HTTP 客户端

use async_trait::async_trait;
use ctscan_core::utils::{epoch_millis, mask_pii};
use ctscan_core::{
    ActivePatient, ApiError, CapturedImage, ClassificationError, CtScanError, DashboardStats,
    DoctorProfile, HealthStatus, NewPatient, PatientDetail, PatientSummary, PersistenceError,
    PredictionResult, Result, SavedRecordAck, ScanPrediction, ScanRecord, Session,
};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Url};
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::response::{
    ensure_success, map_classification, map_save, parse_api, parse_credentials,
    AddPatientResponse, LoginResponse, PatientResponse, PatientsResponse, ProfileResponse,
};

/// 后端路由
pub mod routes {
    pub const PREDICT: &str = "predict";
    pub const SAVE_RECORD: &str = "save-record";
    pub const HISTORY: &str = "history";
    pub const LOGIN: &str = "login";
    pub const SIGNUP: &str = "signup";
    pub const STATS: &str = "stats";
    pub const DOCTOR_PROFILE: &[&str] = &["doctor", "profile"];
    pub const PATIENTS: &str = "patients";
    pub const HEALTH: &str = "health";
}

/// 扫描工作流依赖的后端接口
#[async_trait]
pub trait ScanApi: Send + Sync {
    /// 上传影像并取得分类结果
    async fn classify(&self, image: &CapturedImage, token: &str) -> std::result::Result<PredictionResult, ClassificationError>;

    /// 保存影像、分类结果与临床备注
    async fn save_record(
        &self,
        image: Option<&CapturedImage>,
        prediction: Option<&ScanPrediction>,
        patient: &ActivePatient,
        token: &str,
    ) -> std::result::Result<SavedRecordAck, PersistenceError>;

    /// 查询某个患者的历史记录
    async fn patient_history(&self, patient_id: &str, token: &str) -> std::result::Result<Vec<ScanRecord>, ApiError>;
}

/// 检查保存的前置条件：影像、与之对应的预测、患者ID
pub fn check_save_prerequisites<'a>(
    image: Option<&'a CapturedImage>,
    prediction: Option<&'a ScanPrediction>,
    patient: &ActivePatient,
) -> std::result::Result<(&'a CapturedImage, &'a PredictionResult), PersistenceError> {
    let image = image.ok_or_else(|| PersistenceError::MissingPrerequisite("no captured image".to_string()))?;
    let prediction = prediction
        .ok_or_else(|| PersistenceError::MissingPrerequisite("no prediction for the image".to_string()))?;
    if !prediction.belongs_to(image) {
        return Err(PersistenceError::MissingPrerequisite(
            "prediction belongs to a different image".to_string(),
        ));
    }
    if !patient.has_id() {
        return Err(PersistenceError::MissingPrerequisite("no patient id".to_string()));
    }
    Ok((image, &prediction.result))
}

/// `prediction` 表单字段的内容
pub fn prediction_field(prediction: &PredictionResult, patient: &ActivePatient) -> String {
    json!({
        "predicted_class": prediction.predicted_class.as_str(),
        "confidence": prediction.confidence,
        "probabilities": {
            "normal": prediction.probabilities.normal,
            "malignant": prediction.probabilities.malignant,
            "benign": prediction.probabilities.benign,
        },
        "medicalHistory": patient.medical_history,
        "doctorNotes": patient.doctor_notes,
    })
    .to_string()
}

/// 后端客户端
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| CtScanError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = Url::parse(config.base_url())
            .map_err(|e| CtScanError::Config(format!("Invalid API URL {}: {}", config.api_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CtScanError::Config(format!("Invalid API URL {}", config.api_url)));
        }

        info!("API client targeting {}", base_url);
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// 拼接接口地址，各段会做路径转义
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// 历史记录影像的访问地址
    pub fn image_url(&self, record: &ScanRecord) -> Option<String> {
        record.image_url(self.base_url())
    }

    fn image_part(image: &CapturedImage, file_name: String) -> std::result::Result<Part, reqwest::Error> {
        Part::bytes(image.bytes.to_vec())
            .file_name(file_name)
            .mime_str(&image.mime_type)
    }

    async fn send(request: RequestBuilder) -> std::result::Result<(u16, String), reqwest::Error> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn send_api(request: RequestBuilder) -> std::result::Result<(u16, String), ApiError> {
        Self::send(request).await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Network(e.to_string())
            }
        })
    }

    pub async fn classify(&self, image: &CapturedImage, token: &str) -> std::result::Result<PredictionResult, ClassificationError> {
        if token.trim().is_empty() {
            return Err(ClassificationError::Unauthenticated);
        }

        let part = Self::image_part(image, image.upload_file_name())
            .map_err(|e| ClassificationError::InvalidInput(e.to_string()))?;
        let request = self
            .http
            .post(self.endpoint(&[routes::PREDICT]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token)
            .multipart(Form::new().part("file", part));

        debug!(
            "Uploading {} ({} bytes, {}) for classification",
            image.upload_file_name(),
            image.len(),
            image.mime_type
        );

        let (status, body) = Self::send(request).await.map_err(|e| {
            if e.is_timeout() {
                ClassificationError::Timeout
            } else {
                ClassificationError::Unknown(e.to_string())
            }
        })?;

        match map_classification(status, &body) {
            Ok(prediction) => {
                info!(
                    "Classified image {} as {} ({})",
                    image.id,
                    prediction.predicted_class,
                    prediction.confidence_percent()
                );
                Ok(prediction)
            }
            Err(e) => {
                error!("Classification failed with status {}: {}", status, e);
                Err(e)
            }
        }
    }

    pub async fn save_record(
        &self,
        image: Option<&CapturedImage>,
        prediction: Option<&ScanPrediction>,
        patient: &ActivePatient,
        token: &str,
    ) -> std::result::Result<SavedRecordAck, PersistenceError> {
        let (image, prediction) = check_save_prerequisites(image, prediction, patient)?;
        if token.trim().is_empty() {
            return Err(PersistenceError::Unauthenticated);
        }

        let file_name = image.record_file_name(&patient.patient_id, epoch_millis());
        let part = Self::image_part(image, file_name.clone())
            .map_err(|e| PersistenceError::Unknown(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("patientId", patient.patient_id.clone())
            .text("prediction", prediction_field(prediction, patient));

        let request = self
            .http
            .post(self.endpoint(&[routes::SAVE_RECORD]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token)
            .multipart(form);

        debug!(
            "Saving record {} for patient {}",
            file_name,
            mask_pii(&patient.patient_id)
        );

        let (status, body) = Self::send(request).await.map_err(|e| {
            if e.is_timeout() {
                PersistenceError::Timeout
            } else {
                PersistenceError::Unknown(e.to_string())
            }
        })?;

        match map_save(status, &body) {
            Ok(ack) => {
                info!(
                    "Saved record {} for patient {}",
                    ack.record_id.as_deref().unwrap_or("-"),
                    mask_pii(&patient.patient_id)
                );
                Ok(ack)
            }
            Err(e) => {
                error!("Save failed with status {}: {}", status, e);
                Err(e)
            }
        }
    }

    /// 登录并返回会话
    ///
    /// 密码错误返回 `Rejected`，不是 `Unauthenticated`。
    pub async fn login(&self, email: &str, password: &str) -> std::result::Result<Session, ApiError> {
        let request = self
            .http
            .post(self.endpoint(&[routes::LOGIN]))
            .header(ACCEPT, "application/json")
            .json(&json!({ "email": email, "password": password }));

        let (status, body) = Self::send_api(request).await?;
        let session = Self::session_from(parse_credentials(status, &body)?)?;
        info!("Login succeeded for {}", email);
        Ok(session)
    }

    /// 注册医生账号，成功后直接返回会话
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> std::result::Result<Session, ApiError> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Rejected("Name, email and password are required".to_string()));
        }

        let request = self
            .http
            .post(self.endpoint(&[routes::SIGNUP]))
            .header(ACCEPT, "application/json")
            .json(&json!({ "name": name, "email": email, "password": password }));

        let (status, body) = Self::send_api(request).await?;
        let session = Self::session_from(parse_credentials(status, &body)?)?;
        info!("Registered account for {}", email);
        Ok(session)
    }

    fn session_from(response: LoginResponse) -> std::result::Result<Session, ApiError> {
        ensure_success(response.success, response.message, response.error)?;
        let token = response
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::MalformedResponse("login response has no token".to_string()))?;
        Ok(Session {
            token,
            profile: response.doctor.unwrap_or_default(),
        })
    }

    pub async fn doctor_profile(&self, token: &str) -> std::result::Result<DoctorProfile, ApiError> {
        let request = self
            .http
            .get(self.endpoint(routes::DOCTOR_PROFILE))
            .header(ACCEPT, "application/json")
            .bearer_auth(token);

        let (status, body) = Self::send_api(request).await?;
        let response: ProfileResponse = parse_api(status, &body)?;
        ensure_success(response.success, response.message, response.error)?;
        response
            .doctor
            .ok_or_else(|| ApiError::MalformedResponse("profile response has no doctor".to_string()))
    }

    /// 全部历史记录
    pub async fn history(&self, token: &str) -> std::result::Result<Vec<ScanRecord>, ApiError> {
        let request = self
            .http
            .get(self.endpoint(&[routes::HISTORY]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token);

        let (status, body) = Self::send_api(request).await?;
        let records: Vec<ScanRecord> = parse_api(status, &body)?;
        debug!("Fetched {} history records", records.len());
        Ok(records)
    }

    pub async fn patient_history(&self, patient_id: &str, token: &str) -> std::result::Result<Vec<ScanRecord>, ApiError> {
        let request = self
            .http
            .get(self.endpoint(&[routes::HISTORY, patient_id]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token);

        let (status, body) = Self::send_api(request).await?;
        let records: Vec<ScanRecord> = parse_api(status, &body)?;
        debug!(
            "Fetched {} history records for patient {}",
            records.len(),
            mask_pii(patient_id)
        );
        Ok(records)
    }

    pub async fn patients(&self, token: &str) -> std::result::Result<Vec<PatientSummary>, ApiError> {
        let request = self
            .http
            .get(self.endpoint(&[routes::PATIENTS]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token);

        let (status, body) = Self::send_api(request).await?;
        let response: PatientsResponse = parse_api(status, &body)?;
        ensure_success(response.success, response.message, response.error)?;
        Ok(response.patients)
    }

    /// 新增患者，返回服务器分配的患者
    pub async fn add_patient(&self, patient: &NewPatient, token: &str) -> std::result::Result<PatientSummary, ApiError> {
        if patient.name.trim().is_empty() || patient.gender.trim().is_empty() {
            return Err(ApiError::Rejected("Name, age and gender are required".to_string()));
        }

        let request = self
            .http
            .post(self.endpoint(&[routes::PATIENTS]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token)
            .json(patient);

        let (status, body) = Self::send_api(request).await?;
        let response: AddPatientResponse = parse_api(status, &body)?;
        ensure_success(response.success, response.message, response.error)?;

        let created = response
            .patient
            .ok_or_else(|| ApiError::MalformedResponse("response has no patient".to_string()))?;
        info!("Added patient {}", mask_pii(&created.id));
        Ok(created)
    }

    /// 单个患者的详情与扫描列表
    pub async fn patient(&self, patient_id: &str, token: &str) -> std::result::Result<PatientDetail, ApiError> {
        let request = self
            .http
            .get(self.endpoint(&[routes::PATIENTS, patient_id]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token);

        let (status, body) = Self::send_api(request).await?;
        let response: PatientResponse = parse_api(status, &body)?;
        ensure_success(response.success, response.message, response.error)?;
        response
            .patient
            .ok_or_else(|| ApiError::MalformedResponse("response has no patient".to_string()))
    }

    pub async fn stats(&self, token: &str) -> std::result::Result<DashboardStats, ApiError> {
        let request = self
            .http
            .get(self.endpoint(&[routes::STATS]))
            .header(ACCEPT, "application/json")
            .bearer_auth(token);

        let (status, body) = Self::send_api(request).await?;
        parse_api(status, &body)
    }

    /// 服务健康检查，不需要令牌
    pub async fn health(&self) -> std::result::Result<HealthStatus, ApiError> {
        let request = self
            .http
            .get(self.endpoint(&[routes::HEALTH]))
            .header(ACCEPT, "application/json");

        let (status, body) = Self::send_api(request).await?;
        parse_api(status, &body)
    }
}

#[async_trait]
impl ScanApi for ApiClient {
    async fn classify(&self, image: &CapturedImage, token: &str) -> std::result::Result<PredictionResult, ClassificationError> {
        ApiClient::classify(self, image, token).await
    }

    async fn save_record(
        &self,
        image: Option<&CapturedImage>,
        prediction: Option<&ScanPrediction>,
        patient: &ActivePatient,
        token: &str,
    ) -> std::result::Result<SavedRecordAck, PersistenceError> {
        ApiClient::save_record(self, image, prediction, patient, token).await
    }

    async fn patient_history(&self, patient_id: &str, token: &str) -> std::result::Result<Vec<ScanRecord>, ApiError> {
        ApiClient::patient_history(self, patient_id, token).await
    }
}
