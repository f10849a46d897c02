//! Attachment storage on S3-compatible object stores / 对象存储附件适配器

pub mod config;
pub mod error;
pub mod storage;
pub mod utils;

// Backend modules (point to project root drivers via path attribute) / 后端模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use error::{Result, StorageError};
pub use storage::{
    DownloadedFile, FileMetadata, ObjectStore, PresignMethod, PresignOptions, PresignedCredential,
    StorageConfig, TransferMode, TransferPlan, TransferSource, UploadOptions, UrlOptions,
};
