//! 报告草稿交接

use crate::keys;
use crate::store::SharedStore;
use ctscan_core::{ReportDraft, Result};
use tracing::info;

/// `reportData` 槽位：发送方写入一次，接收方读取一次
#[derive(Clone)]
pub struct ReportHandoff {
    store: SharedStore,
}

impl ReportHandoff {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn write(&self, draft: &ReportDraft) -> Result<()> {
        self.store
            .set_item(keys::REPORT_DATA, &serde_json::to_string(draft)?)
            .await?;
        info!("Report draft for {} handed off", draft.diagnosis);
        Ok(())
    }

    /// 读取但不移除
    pub async fn peek(&self) -> Result<Option<ReportDraft>> {
        match self.store.get_item(keys::REPORT_DATA).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// 读取并移除
    pub async fn take(&self) -> Result<Option<ReportDraft>> {
        let draft = self.peek().await?;
        if draft.is_some() {
            self.store.remove_item(keys::REPORT_DATA).await?;
        }
        Ok(draft)
    }
}
