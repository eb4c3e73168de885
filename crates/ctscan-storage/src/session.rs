//! 会话存储
//!
//! 进程启动时创建一次，显式传给需要它的组件。登录写入令牌与资料，
//! 登出同时清除两者。

use crate::keys;
use crate::store::SharedStore;
use ctscan_core::{DoctorProfile, ProfileExtras, Result, Session};
use tracing::info;

/// 会话上下文
#[derive(Clone)]
pub struct SessionStore {
    store: SharedStore,
}

impl SessionStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// 登录：保存令牌与医生资料
    pub async fn sign_in(&self, token: &str, profile: &DoctorProfile) -> Result<()> {
        self.store.set_item(keys::AUTH_TOKEN, token).await?;
        self.store
            .set_item(keys::DOCTOR_PROFILE, &serde_json::to_string(profile)?)
            .await?;
        info!("Signed in as {}", profile.email);
        Ok(())
    }

    /// 登出：清除令牌与资料
    pub async fn sign_out(&self) -> Result<()> {
        self.store.remove_item(keys::AUTH_TOKEN).await?;
        self.store.remove_item(keys::DOCTOR_PROFILE).await?;
        info!("Signed out");
        Ok(())
    }

    /// 当前令牌，空串视为未登录
    pub async fn token(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get_item(keys::AUTH_TOKEN)
            .await?
            .filter(|t| !t.trim().is_empty()))
    }

    pub async fn profile(&self) -> Result<Option<DoctorProfile>> {
        match self.store.get_item(keys::DOCTOR_PROFILE).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// 当前会话；有令牌即视为已登录
    pub async fn current(&self) -> Result<Option<Session>> {
        let Some(token) = self.token().await? else {
            return Ok(None);
        };
        let profile = self.profile().await?.unwrap_or_default();
        Ok(Some(Session { token, profile }))
    }

    pub async fn is_signed_in(&self) -> Result<bool> {
        Ok(self.token().await?.is_some())
    }

    /// 保存资料扩展字段，并同步缓存资料中的姓名
    pub async fn save_extras(&self, extras: &ProfileExtras) -> Result<DoctorProfile> {
        self.store
            .set_item(keys::DOCTOR_PROFILE_EXTRAS, &serde_json::to_string(extras)?)
            .await?;

        let mut profile = self.profile().await?.unwrap_or_default();
        profile.name = extras.name.clone();
        self.store
            .set_item(keys::DOCTOR_PROFILE, &serde_json::to_string(&profile)?)
            .await?;
        Ok(profile)
    }

    pub async fn extras(&self) -> Result<Option<ProfileExtras>> {
        match self.store.get_item(keys::DOCTOR_PROFILE_EXTRAS).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
