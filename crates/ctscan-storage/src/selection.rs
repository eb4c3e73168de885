//! 患者选择缓存

use crate::keys;
use crate::store::SharedStore;
use ctscan_core::{utils::mask_pii, ActivePatient, Result};
use tracing::debug;

/// 下一次扫描使用的患者
#[derive(Clone)]
pub struct PatientSelection {
    store: SharedStore,
}

impl PatientSelection {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// 记录选中的患者
    pub async fn select(&self, patient: &ActivePatient) -> Result<()> {
        self.store.set_item(keys::SELECTED_PATIENT_ID, &patient.patient_id).await?;
        match &patient.patient_name {
            Some(name) => self.store.set_item(keys::SELECTED_PATIENT_NAME, name).await?,
            None => self.store.remove_item(keys::SELECTED_PATIENT_NAME).await?,
        }
        self.store
            .set_item(keys::SELECTED_PATIENT_MEDICAL_HISTORY, &patient.medical_history)
            .await?;
        self.store
            .set_item(keys::SELECTED_PATIENT_DOCTOR_NOTES, &patient.doctor_notes)
            .await?;

        debug!("Selected patient {}", mask_pii(&patient.patient_id));
        Ok(())
    }

    /// 读取选中的患者；没有患者ID时返回 None
    pub async fn load(&self) -> Result<Option<ActivePatient>> {
        let Some(patient_id) = self
            .store
            .get_item(keys::SELECTED_PATIENT_ID)
            .await?
            .filter(|id| !id.trim().is_empty())
        else {
            return Ok(None);
        };

        Ok(Some(ActivePatient {
            patient_id,
            patient_name: self.store.get_item(keys::SELECTED_PATIENT_NAME).await?,
            medical_history: self
                .store
                .get_item(keys::SELECTED_PATIENT_MEDICAL_HISTORY)
                .await?
                .unwrap_or_default(),
            doctor_notes: self
                .store
                .get_item(keys::SELECTED_PATIENT_DOCTOR_NOTES)
                .await?
                .unwrap_or_default(),
        }))
    }

    pub async fn clear(&self) -> Result<()> {
        for key in [
            keys::SELECTED_PATIENT_ID,
            keys::SELECTED_PATIENT_NAME,
            keys::SELECTED_PATIENT_MEDICAL_HISTORY,
            keys::SELECTED_PATIENT_DOCTOR_NOTES,
        ] {
            self.store.remove_item(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_select_and_load() {
        let selection = PatientSelection::new(MemoryStore::shared());
        assert!(selection.load().await.unwrap().is_none());

        let patient = ActivePatient::new("P1").with_name("Jane Doe").with_notes("smoker", "");
        selection.select(&patient).await.unwrap();
        assert_eq!(selection.load().await.unwrap().unwrap(), patient);

        selection.clear().await.unwrap();
        assert!(selection.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_notes_default_to_empty() {
        let store = MemoryStore::shared();
        store.set_item("selectedPatientId", "P9").await.unwrap();

        let patient = PatientSelection::new(store).load().await.unwrap().unwrap();
        assert_eq!(patient.patient_id, "P9");
        assert_eq!(patient.patient_name, None);
        assert_eq!(patient.medical_history, "");
        assert_eq!(patient.doctor_notes, "");
    }
}
