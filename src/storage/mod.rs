use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// Maximum keys per batch-delete request (S3 DeleteObjects limit) / 单次批量删除上限
pub const MAX_BATCH_DELETE: usize = 1000;

/// Which backend an object lives in, and under which credentials / 后端身份
///
/// Two backends with equal identities can copy objects server-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendIdentity {
    /// Backend kind, e.g. `s3` / 后端类型
    pub kind: String,
    /// Account or credential identity (access key id for S3) / 凭证身份
    pub account: String,
}

impl BackendIdentity {
    pub fn new(kind: &str, account: &str) -> Self {
        Self {
            kind: kind.to_string(),
            account: account.to_string(),
        }
    }
}

/// Reference to an object already resident in a backend / 已存储对象的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObjectRef {
    pub backend: BackendIdentity,
    pub bucket: String,
    /// Resolved object path (prefix included) / 完整对象路径
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Where the bytes of an upload come from / 上传数据来源
pub enum TransferSource {
    /// Local file / 本地文件
    File(PathBuf),
    /// In-memory bytes / 内存数据
    Bytes(Bytes),
    /// Arbitrary reader with an optional known size / 任意读取流
    Reader {
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        size: Option<u64>,
    },
    /// An object held by some backend; `origin` serves its bytes when a
    /// server-side copy is not possible / 已存储对象
    Stored {
        object: StoredObjectRef,
        origin: Arc<dyn ObjectStorageBackend>,
    },
}

impl TransferSource {
    pub fn reader(reader: impl AsyncRead + Send + Sync + Unpin + 'static, size: Option<u64>) -> Self {
        TransferSource::Reader {
            reader: Box::new(reader),
            size,
        }
    }

    /// Backend identity for stored objects, `None` for byte sources / 源后端身份
    pub fn backend(&self) -> Option<&BackendIdentity> {
        match self {
            TransferSource::Stored { object, .. } => Some(&object.backend),
            _ => None,
        }
    }

    /// Size in bytes when it can be known without reading the body / 源大小
    pub async fn size(&self) -> Result<Option<u64>> {
        Ok(match self {
            TransferSource::File(path) => Some(tokio::fs::metadata(path).await?.len()),
            TransferSource::Bytes(bytes) => Some(bytes.len() as u64),
            TransferSource::Reader { size, .. } => *size,
            TransferSource::Stored { object, .. } => object.size,
        })
    }
}

impl std::fmt::Debug for TransferSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferSource::File(path) => f.debug_tuple("File").field(path).finish(),
            TransferSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            TransferSource::Reader { size, .. } => f.debug_struct("Reader").field("size", size).finish(),
            TransferSource::Stored { object, .. } => f.debug_tuple("Stored").field(object).finish(),
        }
    }
}

/// Body handed to a backend write / 写入数据
pub enum WriteBody {
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl WriteBody {
    /// Buffer the whole body / 读取全部数据
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            WriteBody::Bytes(bytes) => Ok(bytes),
            WriteBody::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// How a multipart transfer is cut up / 分片计划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartPlan {
    pub part_size: u64,
    /// Parts in flight at once / 并发数
    pub concurrency: usize,
}

impl MultipartPlan {
    pub fn part_count(&self, size: u64) -> u64 {
        if size == 0 {
            1
        } else {
            size.div_ceil(self.part_size)
        }
    }
}

/// Object metadata from a HEAD request / 对象元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub etag: Option<String>,
}

/// One deletable object version; `None` addresses the current version / 对象版本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: Option<String>,
}

impl ObjectVersion {
    pub fn current(key: &str) -> Self {
        Self {
            key: key.to_string(),
            version_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMethod {
    Get,
    Put,
}

/// Signed POST policy: form target plus fields / 预签名POST表单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

/// Capabilities the adapter needs from an object-storage backend / 对象存储后端接口
///
/// Implementations surface their own failures unchanged: no retries, no
/// timeouts beyond what the underlying client does.
#[async_trait]
pub trait ObjectStorageBackend: Send + Sync {
    fn identity(&self) -> BackendIdentity;

    fn bucket(&self) -> &str;

    /// Write bytes to `path`; `multipart` selects the chunked parallel path.
    /// Options become request headers (content type, disposition, acl...).
    async fn write(
        &self,
        path: &str,
        body: WriteBody,
        size: Option<u64>,
        options: &UploadOptions,
        multipart: Option<MultipartPlan>,
    ) -> Result<()>;

    /// Server-side copy from an object of a compatible backend, replacing metadata.
    async fn copy(
        &self,
        source: &StoredObjectRef,
        path: &str,
        options: &UploadOptions,
        multipart: Option<MultipartPlan>,
    ) -> Result<()>;

    /// Metadata only, `None` when the object does not exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectHead>>;

    /// Stream the whole object into `file`.
    async fn read_to_file(&self, path: &str, file: &mut tokio::fs::File) -> Result<()>;

    /// Remove one object. Missing objects are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Remove up to [`MAX_BATCH_DELETE`] objects in one request.
    async fn batch_delete(&self, objects: &[ObjectVersion]) -> Result<()>;

    /// Every object version whose key starts with `prefix` (all keys for `""`).
    async fn list_versions(&self, prefix: &str) -> Result<Vec<ObjectVersion>>;

    /// Time-bounded signed URL; `query` is passed to the signer untouched.
    async fn sign(
        &self,
        method: SignMethod,
        path: &str,
        expires_in: u32,
        query: &BTreeMap<String, String>,
    ) -> Result<String>;

    /// Unsigned URL; only usable when the object is publicly readable.
    fn public_url(&self, path: &str) -> String;

    /// Signed POST policy restricted to `path` and the given fields.
    async fn presign_post(
        &self,
        path: &str,
        fields: &UploadOptions,
        expires_in: u32,
        content_length_range: Option<(u64, u64)>,
    ) -> Result<PresignedPost>;
}

pub mod config;
pub mod options;
pub mod strategy;
pub mod store;
mod presign;
mod url_builder;

pub use config::{MultipartThreshold, StorageConfig};
pub use options::{FileMetadata, PresignMethod, PresignOptions, UploadOptions, UrlOptions};
pub use presign::PresignedCredential;
pub use strategy::{TransferMode, TransferPlan};
pub use store::{DownloadedFile, ObjectStore};
