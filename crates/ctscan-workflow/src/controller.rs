//! 扫描工作流控制器
//!
//! 把影像采集、分类、保存串成一条线性流程。控制器自身保证同一时刻
//! 最多只有一个进行中的操作（采集、分类、保存），状态锁不会跨越
//! 网络等待持有。操作完成时若工作流已经变化（更换或移除影像、登出），
//! 结果被丢弃。

use chrono::Utc;
use ctscan_acquisition::{ImageAcquirer, ImagePicker};
use ctscan_client::{check_save_prerequisites, ScanApi};
use ctscan_core::utils::mask_pii;
use ctscan_core::{
    ActivePatient, CapturedImage, ClassificationError, CtScanError, PersistenceError,
    PredictionResult, ReportDraft, Result, SavedRecordAck, ScanPrediction, ScanRecord,
};
use ctscan_storage::{PatientSelection, ReportHandoff, SessionStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state_machine::{ScanEvent, ScanState, ScanStateMachine};

/// 需要互斥执行的操作
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Operation {
    Acquire,
    Classify,
    Save,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 当前影像的摘要
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageSummary {
    pub id: Uuid,
    pub mime_type: String,
    pub file_extension: String,
    pub size: usize,
}

impl From<&CapturedImage> for ImageSummary {
    fn from(image: &CapturedImage) -> Self {
        Self {
            id: image.id,
            mime_type: image.mime_type.clone(),
            file_extension: image.file_extension.clone(),
            size: image.len(),
        }
    }
}

/// 工作流状态快照
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowSnapshot {
    pub state: ScanState,
    pub patient: Option<ActivePatient>,
    pub image: Option<ImageSummary>,
    pub prediction: Option<PredictionResult>,
    pub saved: Option<SavedRecordAck>,
    pub pending: Option<Operation>,
}

#[derive(Debug, Clone, Copy)]
struct PendingOp {
    operation: Operation,
    ticket: u64,
}

#[derive(Debug)]
struct WorkflowInner {
    state: ScanState,
    patient: Option<ActivePatient>,
    image: Option<CapturedImage>,
    prediction: Option<ScanPrediction>,
    saved: Option<SavedRecordAck>,
    pending: Option<PendingOp>,
    next_ticket: u64,
    /// 影像、患者或会话变化时递增，用于识别过期结果
    generation: u64,
}

impl WorkflowInner {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            patient: None,
            image: None,
            prediction: None,
            saved: None,
            pending: None,
            next_ticket: 0,
            generation: 0,
        }
    }

    fn ensure_idle_slot(&self) -> Result<()> {
        match self.pending {
            Some(pending) => Err(CtScanError::OperationInFlight(pending.operation.to_string())),
            None => Ok(()),
        }
    }

    fn begin(&mut self, operation: Operation) -> Ticket {
        self.next_ticket += 1;
        self.pending = Some(PendingOp {
            operation,
            ticket: self.next_ticket,
        });
        Ticket {
            id: self.next_ticket,
            generation: self.generation,
        }
    }

    /// 结束操作；工作流在操作期间发生变化时返回 `StaleResult`
    fn finish(&mut self, ticket: Ticket) -> Result<()> {
        if self.pending.map(|p| p.ticket) == Some(ticket.id) {
            self.pending = None;
        }
        if self.generation != ticket.generation {
            return Err(CtScanError::StaleResult);
        }
        Ok(())
    }

    fn clear_scan(&mut self) {
        self.image = None;
        self.prediction = None;
        self.saved = None;
        self.generation += 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    id: u64,
    generation: u64,
}

/// 扫描工作流控制器
pub struct ScanWorkflow {
    api: Arc<dyn ScanApi>,
    acquirer: ImageAcquirer,
    session: SessionStore,
    selection: PatientSelection,
    handoff: ReportHandoff,
    state_machine: ScanStateMachine,
    inner: Mutex<WorkflowInner>,
}

impl ScanWorkflow {
    pub fn new(
        api: Arc<dyn ScanApi>,
        acquirer: ImageAcquirer,
        session: SessionStore,
        selection: PatientSelection,
        handoff: ReportHandoff,
    ) -> Self {
        Self {
            api,
            acquirer,
            session,
            selection,
            handoff,
            state_machine: ScanStateMachine::new(),
            inner: Mutex::new(WorkflowInner::new()),
        }
    }

    pub async fn state(&self) -> ScanState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let inner = self.inner.lock().await;
        WorkflowSnapshot {
            state: inner.state,
            patient: inner.patient.clone(),
            image: inner.image.as_ref().map(ImageSummary::from),
            prediction: inner.prediction.as_ref().map(|p| p.result.clone()),
            saved: inner.saved.clone(),
            pending: inner.pending.map(|p| p.operation),
        }
    }

    /// 进入工作流：读取选中的患者
    pub async fn enter(&self) -> Result<ActivePatient> {
        if !self.session.is_signed_in().await? {
            return Err(CtScanError::NotSignedIn);
        }
        let patient = self.selection.load().await?.ok_or(CtScanError::NoActivePatient)?;

        let mut inner = self.inner.lock().await;
        inner.state = self.state_machine.transition(inner.state, ScanEvent::PatientLoaded)?;
        inner.patient = Some(patient.clone());
        inner.clear_scan();

        info!("Scan workflow ready for patient {}", mask_pii(&patient.patient_id));
        Ok(patient)
    }

    /// 采集影像；已有影像时视为更换影像并丢弃旧的预测
    ///
    /// 用户取消时返回 `Ok(None)`，状态不变。
    pub async fn acquire(&self, picker: &dyn ImagePicker) -> Result<Option<CapturedImage>> {
        let ticket = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            if inner.patient.is_none() {
                return Err(CtScanError::NoActivePatient);
            }
            let event = Self::acquire_event(inner.state);
            self.state_machine.transition(inner.state, event)?;
            inner.begin(Operation::Acquire)
        };

        let outcome = self.acquirer.acquire(picker).await;

        let mut inner = self.inner.lock().await;
        inner.finish(ticket)?;
        let Some(image) = outcome? else {
            debug!("Acquisition cancelled, state stays {}", inner.state);
            return Ok(None);
        };

        let event = Self::acquire_event(inner.state);
        inner.state = self.state_machine.transition(inner.state, event)?;
        inner.clear_scan();
        inner.image = Some(image.clone());

        info!("Captured image {} ({} bytes)", image.id, image.len());
        Ok(Some(image))
    }

    fn acquire_event(state: ScanState) -> ScanEvent {
        match state {
            ScanState::Captured | ScanState::Classified => ScanEvent::ImageChanged,
            _ => ScanEvent::ImageAcquired,
        }
    }

    /// 移除当前影像与预测
    pub async fn remove_image(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = self.state_machine.transition(inner.state, ScanEvent::ImageRemoved)?;
        inner.clear_scan();
        info!("Image removed, workflow back to {}", inner.state);
        Ok(())
    }

    /// 编辑既往病史与医生备注，`None` 表示保持不变
    pub async fn update_notes(
        &self,
        medical_history: Option<String>,
        doctor_notes: Option<String>,
    ) -> Result<ActivePatient> {
        let patient = {
            let mut inner = self.inner.lock().await;
            let patient = inner.patient.as_mut().ok_or(CtScanError::NoActivePatient)?;
            if let Some(history) = medical_history {
                patient.medical_history = history;
            }
            if let Some(notes) = doctor_notes {
                patient.doctor_notes = notes;
            }
            patient.clone()
        };

        self.selection.select(&patient).await?;
        Ok(patient)
    }

    /// 分类当前影像
    pub async fn classify(&self) -> Result<PredictionResult> {
        let (ticket, image) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            self.state_machine.transition(inner.state, ScanEvent::Classified)?;
            let image = inner
                .image
                .clone()
                .ok_or_else(|| CtScanError::Validation("no captured image".to_string()))?;
            (inner.begin(Operation::Classify), image)
        };

        let token = match self.session.token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.inner.lock().await.finish(ticket)?;
                return Err(self.expire_session(ClassificationError::Unauthenticated.into()).await);
            }
            Err(e) => {
                let _ = self.inner.lock().await.finish(ticket);
                return Err(e);
            }
        };

        let outcome = self.api.classify(&image, &token).await;

        let mut inner = self.inner.lock().await;
        let fresh = inner.finish(ticket);
        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_unauthenticated() => {
                // 过期的 401 属于旧会话，不能清掉新会话
                fresh?;
                drop(inner);
                return Err(self.expire_session(e.into()).await);
            }
            Err(e) => {
                fresh?;
                warn!("Classification failed, image kept: {}", e);
                return Err(e.into());
            }
        };
        fresh?;

        inner.state = self.state_machine.transition(inner.state, ScanEvent::Classified)?;
        inner.prediction = Some(ScanPrediction {
            image_id: image.id,
            result: result.clone(),
        });

        info!("Image {} classified as {}", image.id, result.predicted_class);
        Ok(result)
    }

    /// 保存影像、预测与备注
    pub async fn save(&self) -> Result<SavedRecordAck> {
        let (ticket, image, prediction, patient) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            let patient = inner.patient.clone().unwrap_or_default();
            check_save_prerequisites(inner.image.as_ref(), inner.prediction.as_ref(), &patient)?;
            self.state_machine.transition(inner.state, ScanEvent::Saved)?;

            let image = inner.image.clone();
            let prediction = inner.prediction.clone();
            (inner.begin(Operation::Save), image, prediction, patient)
        };

        let token = match self.session.token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.inner.lock().await.finish(ticket)?;
                return Err(self.expire_session(PersistenceError::Unauthenticated.into()).await);
            }
            Err(e) => {
                let _ = self.inner.lock().await.finish(ticket);
                return Err(e);
            }
        };

        let outcome = self
            .api
            .save_record(image.as_ref(), prediction.as_ref(), &patient, &token)
            .await;

        let mut inner = self.inner.lock().await;
        let fresh = inner.finish(ticket);
        let ack = match outcome {
            Ok(ack) => ack,
            Err(e) if e.is_unauthenticated() => {
                // 过期的 401 属于旧会话，不能清掉新会话
                fresh?;
                drop(inner);
                return Err(self.expire_session(e.into()).await);
            }
            Err(e) => {
                fresh?;
                warn!("Save failed, retry allowed: {}", e);
                return Err(e.into());
            }
        };
        fresh?;

        inner.state = self.state_machine.transition(inner.state, ScanEvent::Saved)?;
        inner.saved = Some(ack.clone());

        info!("Scan saved for patient {}", mask_pii(&patient.patient_id));
        Ok(ack)
    }

    /// 开始新的扫描，保留当前患者
    pub async fn new_scan(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = self.state_machine.transition(inner.state, ScanEvent::NewScan)?;
        inner.clear_scan();
        info!("Starting new scan");
        Ok(())
    }

    /// 生成报告草稿并写入交接槽
    pub async fn hand_off_report(&self) -> Result<ReportDraft> {
        let draft = {
            let inner = self.inner.lock().await;
            self.state_machine.transition(inner.state, ScanEvent::ReportHandedOff)?;
            let patient = inner.patient.as_ref().ok_or(CtScanError::NoActivePatient)?;
            let prediction = inner.prediction.as_ref().ok_or_else(|| {
                CtScanError::Validation("no prediction to report".to_string())
            })?;
            ReportDraft::from_saved_scan(patient, &prediction.result, Utc::now())
        };

        self.handoff.write(&draft).await?;
        info!("Report draft handed off for patient {}", mask_pii(&draft.patient_id));
        Ok(draft)
    }

    /// 查看当前患者的历史记录
    pub async fn view_history(&self) -> Result<Vec<ScanRecord>> {
        let patient_id = {
            let inner = self.inner.lock().await;
            self.state_machine.transition(inner.state, ScanEvent::HistoryViewed)?;
            inner
                .patient
                .as_ref()
                .map(|p| p.patient_id.clone())
                .ok_or(CtScanError::NoActivePatient)?
        };

        let Some(token) = self.session.token().await? else {
            return Err(self.expire_session(CtScanError::NotSignedIn).await);
        };

        match self.api.patient_history(&patient_id, &token).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_unauthenticated() => Err(self.expire_session(e.into()).await),
            Err(e) => Err(e.into()),
        }
    }

    /// 显式登出：清除会话与工作流状态
    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await?;
        self.selection.clear().await?;
        self.reset().await;
        Ok(())
    }

    /// 会话失效：强制登出并回到初始状态，返回原错误
    async fn expire_session(&self, cause: CtScanError) -> CtScanError {
        warn!("Session rejected by server, signing out: {}", cause);
        if let Err(e) = self.sign_out().await {
            warn!("Failed to clear session: {}", e);
            self.reset().await;
        }
        cause
    }

    async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = self
            .state_machine
            .transition(inner.state, ScanEvent::SignedOut)
            .unwrap_or(ScanState::Idle);
        inner.patient = None;
        inner.pending = None;
        inner.clear_scan();
        info!("Workflow reset to {}", inner.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ctscan_acquisition::{FilePicker, PickedAsset, QueuedPicker};
    use ctscan_core::{ApiError, DoctorProfile, PredictedClass, Probabilities};
    use ctscan_storage::{MemoryStore, SharedStore};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// 记录调用并按预置结果应答的后端
    #[derive(Default)]
    struct FakeApi {
        classify_replies: Mutex<VecDeque<std::result::Result<PredictionResult, ClassificationError>>>,
        save_replies: Mutex<VecDeque<std::result::Result<SavedRecordAck, PersistenceError>>>,
        classify_calls: AtomicUsize,
        save_calls: AtomicUsize,
        classified_images: Mutex<Vec<Uuid>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeApi {
        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Default::default()
            }
        }

        async fn reply_classify(&self, reply: std::result::Result<PredictionResult, ClassificationError>) {
            self.classify_replies.lock().await.push_back(reply);
        }

        async fn reply_save(&self, reply: std::result::Result<SavedRecordAck, PersistenceError>) {
            self.save_replies.lock().await.push_back(reply);
        }
    }

    #[async_trait]
    impl ScanApi for FakeApi {
        async fn classify(
            &self,
            image: &CapturedImage,
            _token: &str,
        ) -> std::result::Result<PredictionResult, ClassificationError> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            self.classified_images.lock().await.push(image.id);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.classify_replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(benign()))
        }

        async fn save_record(
            &self,
            image: Option<&CapturedImage>,
            prediction: Option<&ScanPrediction>,
            patient: &ActivePatient,
            _token: &str,
        ) -> std::result::Result<SavedRecordAck, PersistenceError> {
            check_save_prerequisites(image, prediction, patient)?;
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            self.save_replies.lock().await.pop_front().unwrap_or_else(|| {
                Ok(SavedRecordAck {
                    success: true,
                    message: Some("Record saved successfully".to_string()),
                    record_id: Some("r-1".to_string()),
                })
            })
        }

        async fn patient_history(&self, patient_id: &str, _token: &str) -> std::result::Result<Vec<ScanRecord>, ApiError> {
            Ok(vec![ScanRecord {
                patient_id: patient_id.to_string(),
                patient_name: Some("Jane Doe".to_string()),
                timestamp: None,
                image_path: None,
                diagnosis: "Benign".to_string(),
                confidence: 0.87,
                probabilities: None,
                medical_history: None,
                doctor_notes: None,
            }])
        }
    }

    fn benign() -> PredictionResult {
        PredictionResult {
            predicted_class: PredictedClass::Benign,
            confidence: 0.87,
            probabilities: Probabilities { normal: 0.05, malignant: 0.08, benign: 0.87 },
        }
    }

    struct Harness {
        workflow: Arc<ScanWorkflow>,
        api: Arc<FakeApi>,
        store: SharedStore,
        session: SessionStore,
    }

    async fn harness_with(api: FakeApi) -> Harness {
        let store = MemoryStore::shared();
        let session = SessionStore::new(store.clone());
        session
            .sign_in(
                "tok-1",
                &DoctorProfile {
                    id: "d-1".to_string(),
                    name: "Dr. Chen".to_string(),
                    email: "chen@clinic.org".to_string(),
                },
            )
            .await
            .unwrap();
        let selection = PatientSelection::new(store.clone());
        selection
            .select(&ActivePatient::new("P1").with_name("Jane Doe").with_notes("smoker", ""))
            .await
            .unwrap();

        let api = Arc::new(api);
        let workflow = Arc::new(ScanWorkflow::new(
            api.clone(),
            ImageAcquirer::new(),
            session.clone(),
            selection,
            ReportHandoff::new(store.clone()),
        ));
        Harness { workflow, api, store, session }
    }

    async fn harness() -> Harness {
        harness_with(FakeApi::default()).await
    }

    fn png_picker() -> QueuedPicker {
        QueuedPicker::new([Some(
            PickedAsset::from_uri("data:image/png;base64,iVBORw0KGgo=").with_mime_type("image/png"),
        )])
    }

    async fn wait_for_pending(workflow: &ScanWorkflow) {
        for _ in 0..200 {
            if workflow.snapshot().await.pending.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operation never started");
    }

    #[tokio::test]
    async fn test_end_to_end_save_then_new_scan() {
        let h = harness().await;
        let wf = &h.workflow;

        let patient = wf.enter().await.unwrap();
        assert_eq!(patient.patient_name.as_deref(), Some("Jane Doe"));
        assert_eq!(wf.state().await, ScanState::Ready);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chest.jpg");
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.resize(12 * 1024, 0);
        std::fs::write(&path, &jpeg).unwrap();

        let image = wf.acquire(&FilePicker::new(&path)).await.unwrap().unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.len(), 12 * 1024);
        assert_eq!(wf.state().await, ScanState::Captured);

        let prediction = wf.classify().await.unwrap();
        assert_eq!(prediction.predicted_class, PredictedClass::Benign);
        assert_eq!(wf.state().await, ScanState::Classified);

        let ack = wf.save().await.unwrap();
        assert!(ack.success);
        assert_eq!(wf.state().await, ScanState::Saved);

        let draft = wf.hand_off_report().await.unwrap();
        assert_eq!(draft.confidence, "87.0");
        assert_eq!(draft.diagnosis, "Benign");
        assert_eq!(draft.medical_history, "smoker");
        let handed = ReportHandoff::new(h.store.clone()).take().await.unwrap().unwrap();
        assert_eq!(handed, draft);

        let history = wf.view_history().await.unwrap();
        assert_eq!(history[0].patient_id, "P1");
        assert_eq!(wf.state().await, ScanState::Saved);

        wf.new_scan().await.unwrap();
        let snapshot = wf.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Ready);
        assert_eq!(snapshot.patient.unwrap().patient_id, "P1");
        assert!(snapshot.image.is_none());
        assert!(snapshot.prediction.is_none());
        assert!(snapshot.saved.is_none());
    }

    #[tokio::test]
    async fn test_enter_requires_session_and_patient() {
        let h = harness().await;
        h.session.sign_out().await.unwrap();
        assert!(matches!(h.workflow.enter().await, Err(CtScanError::NotSignedIn)));

        let h = harness().await;
        PatientSelection::new(h.store.clone()).clear().await.unwrap();
        assert!(matches!(h.workflow.enter().await, Err(CtScanError::NoActivePatient)));
        assert_eq!(h.workflow.state().await, ScanState::Idle);
    }

    #[tokio::test]
    async fn test_acquire_without_patient_is_refused() {
        let h = harness().await;
        let result = h.workflow.acquire(&png_picker()).await;
        assert!(matches!(result, Err(CtScanError::NoActivePatient)));
    }

    #[tokio::test]
    async fn test_save_without_prediction_is_missing_prerequisite() {
        let h = harness().await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();

        let result = h.workflow.save().await;
        assert!(matches!(
            result,
            Err(CtScanError::Persistence(PersistenceError::MissingPrerequisite(_)))
        ));
        assert_eq!(h.api.save_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changing_or_removing_image_clears_prediction() {
        let h = harness().await;
        let wf = &h.workflow;
        wf.enter().await.unwrap();
        wf.acquire(&png_picker()).await.unwrap();
        wf.classify().await.unwrap();

        let replacement = wf.acquire(&png_picker()).await.unwrap().unwrap();
        let snapshot = wf.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Captured);
        assert_eq!(snapshot.image.unwrap().id, replacement.id);
        assert!(snapshot.prediction.is_none());

        wf.classify().await.unwrap();
        wf.remove_image().await.unwrap();
        let snapshot = wf.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Ready);
        assert!(snapshot.image.is_none());
        assert!(snapshot.prediction.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_keeps_state() {
        let h = harness().await;
        h.workflow.enter().await.unwrap();

        let cancelled = h.workflow.acquire(&QueuedPicker::new([None])).await.unwrap();
        assert!(cancelled.is_none());
        assert_eq!(h.workflow.state().await, ScanState::Ready);
    }

    #[tokio::test]
    async fn test_empty_image_never_reaches_network() {
        let h = harness().await;
        h.workflow.enter().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.png");
        std::fs::write(&path, b"").unwrap();
        let picker = QueuedPicker::new([Some(PickedAsset::from_uri(path.to_string_lossy()))]);

        let result = h.workflow.acquire(&picker).await;
        assert!(matches!(
            result,
            Err(CtScanError::Acquisition(ctscan_core::AcquisitionError::EmptyOrCorrupt))
        ));
        assert_eq!(h.workflow.state().await, ScanState::Ready);
        assert!(h.workflow.classify().await.is_err());
        assert_eq!(h.api.classify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_classify_signs_out() {
        let h = harness().await;
        h.api.reply_classify(Err(ClassificationError::Unauthenticated)).await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();

        let err = h.workflow.classify().await.unwrap_err();
        assert!(err.is_unauthenticated());

        let snapshot = h.workflow.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Idle);
        assert!(snapshot.patient.is_none());
        assert!(snapshot.image.is_none());
        assert!(!h.session.is_signed_in().await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthenticated_save_signs_out() {
        let h = harness().await;
        h.api.reply_save(Err(PersistenceError::Unauthenticated)).await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();
        h.workflow.classify().await.unwrap();

        let err = h.workflow.save().await.unwrap_err();
        assert_eq!(err.user_message(), "Your session has expired. Please log in again.");
        assert_eq!(h.workflow.state().await, ScanState::Idle);
        assert!(h.session.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timeout_keeps_capture_and_retry_resends_same_image() {
        let h = harness().await;
        h.api.reply_classify(Err(ClassificationError::Timeout)).await;
        h.workflow.enter().await.unwrap();
        let image = h.workflow.acquire(&png_picker()).await.unwrap().unwrap();

        let err = h.workflow.classify().await.unwrap_err();
        assert!(matches!(err, CtScanError::Classification(ClassificationError::Timeout)));
        let snapshot = h.workflow.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Captured);
        assert!(snapshot.prediction.is_none());

        h.workflow.classify().await.unwrap();
        assert_eq!(*h.api.classified_images.lock().await, vec![image.id, image.id]);
        assert_eq!(h.workflow.state().await, ScanState::Classified);
    }

    #[tokio::test]
    async fn test_failed_save_allows_retry_and_saved_refuses_second_save() {
        let h = harness().await;
        h.api.reply_save(Err(PersistenceError::ServerError("disk full".to_string()))).await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();
        h.workflow.classify().await.unwrap();

        assert!(h.workflow.save().await.is_err());
        assert_eq!(h.workflow.state().await, ScanState::Classified);

        h.workflow.save().await.unwrap();
        assert!(matches!(
            h.workflow.save().await,
            Err(CtScanError::InvalidStateTransition { .. })
        ));
        assert_eq!(h.api.save_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_operation_while_classifying_is_rejected() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeApi::gated(gate.clone())).await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();

        let wf = h.workflow.clone();
        let running = tokio::spawn(async move { wf.classify().await });
        wait_for_pending(&h.workflow).await;

        assert!(matches!(
            h.workflow.classify().await,
            Err(CtScanError::OperationInFlight(_))
        ));
        assert!(matches!(
            h.workflow.acquire(&png_picker()).await,
            Err(CtScanError::OperationInFlight(_))
        ));

        gate.notify_one();
        running.await.unwrap().unwrap();
        assert_eq!(h.workflow.state().await, ScanState::Classified);
        assert_eq!(h.api.classify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_result_after_image_removed_is_discarded() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(FakeApi::gated(gate.clone())).await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();

        let wf = h.workflow.clone();
        let running = tokio::spawn(async move { wf.classify().await });
        wait_for_pending(&h.workflow).await;

        h.workflow.remove_image().await.unwrap();
        gate.notify_one();

        assert!(matches!(running.await.unwrap(), Err(CtScanError::StaleResult)));
        let snapshot = h.workflow.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Ready);
        assert!(snapshot.prediction.is_none());
        assert!(snapshot.pending.is_none());
    }

    #[tokio::test]
    async fn test_late_unauthenticated_keeps_new_session() {
        let gate = Arc::new(Notify::new());
        let api = FakeApi::gated(gate.clone());
        api.reply_classify(Err(ClassificationError::Unauthenticated)).await;
        let h = harness_with(api).await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();

        let wf = h.workflow.clone();
        let running = tokio::spawn(async move { wf.classify().await });
        wait_for_pending(&h.workflow).await;

        h.workflow.sign_out().await.unwrap();
        h.session
            .sign_in(
                "tok-2",
                &DoctorProfile {
                    id: "d-2".to_string(),
                    name: "Dr. Wong".to_string(),
                    email: "wong@clinic.org".to_string(),
                },
            )
            .await
            .unwrap();
        PatientSelection::new(h.store.clone())
            .select(&ActivePatient::new("P2").with_name("John Roe"))
            .await
            .unwrap();
        h.workflow.enter().await.unwrap();
        gate.notify_one();

        assert!(matches!(running.await.unwrap(), Err(CtScanError::StaleResult)));
        assert_eq!(h.session.token().await.unwrap().as_deref(), Some("tok-2"));
        let snapshot = h.workflow.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Ready);
        assert_eq!(snapshot.patient.unwrap().patient_id, "P2");
    }

    #[tokio::test]
    async fn test_notes_editable_and_saved_with_record() {
        let h = harness().await;
        assert!(matches!(
            h.workflow.update_notes(None, Some("x".into())).await,
            Err(CtScanError::NoActivePatient)
        ));

        h.workflow.enter().await.unwrap();
        let patient = h
            .workflow
            .update_notes(None, Some("Follow up in 3 months".to_string()))
            .await
            .unwrap();
        assert_eq!(patient.medical_history, "smoker");
        assert_eq!(patient.doctor_notes, "Follow up in 3 months");

        let cached = PatientSelection::new(h.store.clone()).load().await.unwrap().unwrap();
        assert_eq!(cached.doctor_notes, "Follow up in 3 months");
    }

    #[tokio::test]
    async fn test_sign_out_resets_everything() {
        let h = harness().await;
        h.workflow.enter().await.unwrap();
        h.workflow.acquire(&png_picker()).await.unwrap();

        h.workflow.sign_out().await.unwrap();
        let snapshot = h.workflow.snapshot().await;
        assert_eq!(snapshot.state, ScanState::Idle);
        assert!(snapshot.patient.is_none());
        assert!(snapshot.image.is_none());
        assert!(!h.session.is_signed_in().await.unwrap());
        assert!(PatientSelection::new(h.store.clone()).load().await.unwrap().is_none());
    }
}
