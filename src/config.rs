//! Application configuration module / 应用配置模块
//!
//! Reads config.json from the working directory.
//! Writes a template on first run / 首次运行时生成配置模板

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::drivers::s3::{S3Config, KIND as S3_KIND};
use crate::error::{Result, StorageError};
use crate::storage::StorageConfig;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend kind: `s3` or `memory` / 后端类型
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Adapter configuration / 存储适配器配置
    pub storage: StorageConfig,
    /// S3 connection / S3连接配置
    #[serde(default)]
    pub s3: Option<S3Config>,
}

fn default_backend() -> String {
    S3_KIND.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            storage: StorageConfig::new(""),
            s3: Some(S3Config::default()),
        }
    }
}

/// Get the config file path / 获取配置文件路径
pub fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from `path`; a missing file gets a template written / 加载配置文件
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        save_config(path, &AppConfig::default())?;
        tracing::info!("Created configuration template at {:?}", path);
        return Err(StorageError::Configuration(format!(
            "fill in bucket and credentials in {:?}",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)
        .map_err(|e| StorageError::Configuration(format!("Failed to parse config file: {}", e)))?;

    tracing::info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| StorageError::Configuration(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
