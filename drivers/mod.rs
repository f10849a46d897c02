// Backend package / 存储后端
pub mod memory;
pub mod s3;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Result, StorageError};
use crate::storage::ObjectStorageBackend;

/// Build the backend named by `config.backend` / 按配置创建存储后端
pub fn create_backend(config: &AppConfig) -> Result<Arc<dyn ObjectStorageBackend>> {
    let bucket = &config.storage.bucket;
    match config.backend.as_str() {
        s3::KIND => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                StorageError::Configuration("backend \"s3\" requires an \"s3\" section".into())
            })?;
            Ok(Arc::new(s3::S3Backend::new(bucket, s3_config)?))
        }
        memory::KIND => Ok(Arc::new(memory::MemoryBackend::new(bucket, "local"))),
        other => Err(StorageError::Configuration(format!("unknown backend: {}", other))),
    }
}
