//! 扫描工作流演示程序
//!
//! 使用内存存储和本地模拟的分类服务，走一遍
//! 选择患者 → 采集 → 分类 → 保存 → 报告交接 → 新扫描 的完整流程

use async_trait::async_trait;
use chrono::Utc;
use ctscan::acquisition::{ImageAcquirer, PickedAsset, QueuedPicker};
use ctscan::client::{check_save_prerequisites, ScanApi};
use ctscan::domain::{
    ActivePatient, ApiError, CapturedImage, ClassificationError, DoctorProfile, PersistenceError,
    PredictedClass, PredictionResult, Probabilities, SavedRecordAck, ScanPrediction, ScanRecord,
};
use ctscan::storage::{MemoryStore, PatientSelection, ReportHandoff, SessionStore};
use ctscan::workflow::ScanWorkflow;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 本地模拟的后端：按影像大小给出确定的分类结果
#[derive(Default)]
struct SimulatedBackend {
    records: Mutex<Vec<ScanRecord>>,
}

#[async_trait]
impl ScanApi for SimulatedBackend {
    async fn classify(&self, image: &CapturedImage, _token: &str) -> Result<PredictionResult, ClassificationError> {
        let (predicted_class, probabilities) = match image.len() % 3 {
            0 => (PredictedClass::Normal, Probabilities { normal: 0.91, malignant: 0.03, benign: 0.06 }),
            1 => (PredictedClass::Benign, Probabilities { normal: 0.05, malignant: 0.08, benign: 0.87 }),
            _ => (PredictedClass::Malignant, Probabilities { normal: 0.02, malignant: 0.94, benign: 0.04 }),
        };
        let confidence = match predicted_class {
            PredictedClass::Normal => probabilities.normal,
            PredictedClass::Benign => probabilities.benign,
            PredictedClass::Malignant => probabilities.malignant,
        };
        Ok(PredictionResult { predicted_class, confidence, probabilities })
    }

    async fn save_record(
        &self,
        image: Option<&CapturedImage>,
        prediction: Option<&ScanPrediction>,
        patient: &ActivePatient,
        _token: &str,
    ) -> Result<SavedRecordAck, PersistenceError> {
        let (_, prediction) = check_save_prerequisites(image, prediction, patient)?;
        let mut records = self.records.lock().await;
        records.push(ScanRecord {
            patient_id: patient.patient_id.clone(),
            patient_name: patient.patient_name.clone(),
            timestamp: Some(Utc::now().to_rfc3339()),
            image_path: None,
            diagnosis: prediction.predicted_class.to_string(),
            confidence: prediction.confidence,
            probabilities: None,
            medical_history: Some(patient.medical_history.clone()),
            doctor_notes: Some(patient.doctor_notes.clone()),
        });
        Ok(SavedRecordAck {
            success: true,
            message: Some("Record saved successfully".to_string()),
            record_id: Some(format!("demo-{}", records.len())),
        })
    }

    async fn patient_history(&self, patient_id: &str, _token: &str) -> Result<Vec<ScanRecord>, ApiError> {
        let records = self.records.lock().await;
        Ok(records.iter().filter(|r| r.patient_id == patient_id).cloned().collect())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("CT 扫描工作流演示\n");

    // 1. 登录并选择患者
    let store = MemoryStore::shared();
    let session = SessionStore::new(store.clone());
    session
        .sign_in(
            "demo-token",
            &DoctorProfile {
                id: "d-1".to_string(),
                name: "Dr. Chen".to_string(),
                email: "chen@clinic.org".to_string(),
            },
        )
        .await?;
    let selection = PatientSelection::new(store.clone());
    selection
        .select(&ActivePatient::new("P1").with_name("Jane Doe").with_notes("Former smoker", ""))
        .await?;

    let backend = Arc::new(SimulatedBackend::default());
    let workflow = ScanWorkflow::new(
        backend.clone(),
        ImageAcquirer::new(),
        session,
        selection,
        ReportHandoff::new(store.clone()),
    );

    let patient = workflow.enter().await?;
    println!("患者: {} ({})", patient.patient_name.as_deref().unwrap_or("Unknown"), patient.patient_id);

    // 2. 两次扫描：第一次保存并生成报告，第二次只保存
    let scans = ["data:image/png;base64,iVBORw0KGgoAAA==", "data:image/jpeg;base64,/9j/4AAQSkZJRgA="];
    for (i, uri) in scans.iter().enumerate() {
        let picker = QueuedPicker::new([Some(PickedAsset::from_uri(*uri))]);
        let Some(image) = workflow.acquire(&picker).await? else {
            continue;
        };
        println!("\n扫描 {}: {} 字节, {}", i + 1, image.len(), image.mime_type);

        workflow
            .update_notes(None, Some(format!("Scan {} reviewed", i + 1)))
            .await?;

        let prediction = workflow.classify().await?;
        println!("   分类结果: {} ({}%)", prediction.predicted_class, prediction.confidence_percent());

        let ack = workflow.save().await?;
        println!("   已保存: {}", ack.record_id.as_deref().unwrap_or("-"));

        if i == 0 {
            let draft = workflow.hand_off_report().await?;
            println!("   报告草稿: {} / {} / {}%", draft.patient_name, draft.diagnosis, draft.confidence);
        }

        let history = workflow.view_history().await?;
        println!("   历史记录: {} 条", history.len());

        workflow.new_scan().await?;
    }

    // 3. 读取交接的报告草稿
    if let Some(draft) = ReportHandoff::new(store).take().await? {
        println!("\n待编辑报告:\n{}", serde_json::to_string_pretty(&draft)?);
    }

    println!("\n最终状态: {}", workflow.state().await);
    Ok(())
}
