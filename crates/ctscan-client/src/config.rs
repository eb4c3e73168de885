//! 客户端配置
//!
//! 分层加载：内置默认值 → 可选配置文件 → `CTSCAN_*` 环境变量 →
//! `EXPO_PUBLIC_API_URL`（只覆盖后端地址，优先级最高）。

use config::{Config, Environment, File};
use ctscan_core::{CtScanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// 默认后端地址
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// 覆盖后端地址的环境变量
pub const API_URL_ENV: &str = "EXPO_PUBLIC_API_URL";

const ENV_PREFIX: &str = "CTSCAN";

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// 后端基础地址
    pub api_url: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 建立连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 本地状态目录
    pub state_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            state_dir: PathBuf::from("./.ctscan"),
        }
    }
}

impl ClientConfig {
    /// 从进程环境与可选配置文件加载
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// 使用给定的环境变量表加载，`None` 时读取进程环境
    pub fn load_from(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let defaults = Self::default();
        let expo_url = match &env {
            Some(vars) => vars.get(API_URL_ENV).cloned(),
            None => std::env::var(API_URL_ENV).ok(),
        }
        .filter(|url| !url.trim().is_empty());

        let mut builder = Config::builder()
            .set_default("api_url", defaults.api_url.as_str())
            .and_then(|b| b.set_default("request_timeout_secs", defaults.request_timeout_secs as i64))
            .and_then(|b| b.set_default("connect_timeout_secs", defaults.connect_timeout_secs as i64))
            .and_then(|b| b.set_default("state_dir", defaults.state_dir.to_string_lossy().as_ref()))
            .map_err(config_error)?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(&path.to_string_lossy()));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true).source(env))
            .set_override_option("api_url", expo_url)
            .map_err(config_error)?
            .build()
            .map_err(config_error)?;

        let config: ClientConfig = settings.try_deserialize().map_err(config_error)?;
        ConfigValidator::new().validate(&config)?;

        match path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// 去掉末尾斜杠的后端地址
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

fn config_error(e: config::ConfigError) -> CtScanError {
    CtScanError::Config(e.to_string())
}

/// 验证规则
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&ClientConfig) -> std::result::Result<(), String>,
}

/// 配置验证器
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "api_url",
                validator: |config| {
                    let url = config.api_url.trim();
                    if url.is_empty() {
                        return Err("API URL cannot be empty".to_string());
                    }
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return Err(format!("API URL must use http or https: {}", url));
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "request_timeout_secs",
                validator: |config| {
                    if config.request_timeout_secs == 0 {
                        Err("Request timeout cannot be 0".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "connect_timeout_secs",
                validator: |config| {
                    if config.connect_timeout_secs == 0 {
                        Err("Connect timeout cannot be 0".to_string())
                    } else {
                        Ok(())
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ClientConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(CtScanError::Config(format!("{}: {}", rule.field_path, e)));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::load_from(None, env(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_file_then_env_layering() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "api_url = \"http://file-host:5000\"\nrequest_timeout_secs = 12").unwrap();

        let config = ClientConfig::load_from(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.api_url, "http://file-host:5000");
        assert_eq!(config.request_timeout_secs, 12);
        assert_eq!(config.connect_timeout_secs, 10);

        let config = ClientConfig::load_from(
            Some(file.path()),
            env(&[("CTSCAN_API_URL", "https://env-host"), ("CTSCAN_REQUEST_TIMEOUT_SECS", "5")]),
        )
        .unwrap();
        assert_eq!(config.api_url, "https://env-host");
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_expo_url_has_highest_precedence() {
        let config = ClientConfig::load_from(
            None,
            env(&[("CTSCAN_API_URL", "https://env-host"), (API_URL_ENV, "http://10.0.2.2:5000/")]),
        )
        .unwrap();
        assert_eq!(config.api_url, "http://10.0.2.2:5000/");
        assert_eq!(config.base_url(), "http://10.0.2.2:5000");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let result = ClientConfig::load_from(None, env(&[("CTSCAN_API_URL", "ftp://host")]));
        assert!(matches!(result, Err(CtScanError::Config(_))));

        let mut config = ClientConfig::default();
        config.request_timeout_secs = 0;
        assert!(ConfigValidator::new().validate(&config).is_err());
    }
}
