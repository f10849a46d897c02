//! Storage error types / 存储错误类型

use serde::Serialize;

/// A batch-delete chunk the backend rejected / 删除失败的分批
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedChunk {
    /// Position of the chunk in the original request / 分批序号
    pub index: usize,
    /// Keys (or ids) carried by the chunk / 分批中的键
    pub keys: Vec<String>,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Network failure or backend unavailable. Never retried by the adapter.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// Credentials lack the rights for the request.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Raised eagerly while constructing an adapter or backend.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Some chunks of a batch delete failed; the others were still attempted.
    #[error("{} of {total_chunks} delete chunks failed", failed.len())]
    PartialBatchFailure {
        failed: Vec<FailedChunk>,
        total_chunks: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    /// Map a backend HTTP status onto the error taxonomy / 按HTTP状态码归类错误
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            404 => StorageError::NotFound(context),
            401 | 403 => StorageError::Permission(context),
            _ => StorageError::Transport(format!("HTTP {}: {}", status, context)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => StorageError::from_status(status.as_u16(), e.to_string()),
            None => StorageError::Transport(e.to_string()),
        }
    }
}
