//! Object operations of the storage adapter / 存储适配器对象操作

use std::ops::Range;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncRead, AsyncSeekExt, ReadBuf};

use crate::error::{FailedChunk, Result, StorageError};
use crate::utils::{content_disposition, object_path};
use super::config::StorageConfig;
use super::options::{FileMetadata, UploadOptions, UrlOptions, ACL, CONTENT_DISPOSITION, CONTENT_TYPE};
use super::strategy::{self, TransferMode, TransferPlan};
use super::{
    ObjectStorageBackend, ObjectVersion, StoredObjectRef, TransferSource, WriteBody, MAX_BATCH_DELETE,
};

/// Storage adapter: one bucket (plus optional prefix) behind a backend / 存储适配器
pub struct ObjectStore {
    pub(super) backend: Arc<dyn ObjectStorageBackend>,
    pub(super) config: StorageConfig,
    http: reqwest::Client,
}

impl ObjectStore {
    /// Build an adapter; configuration errors surface here, not on first use / 创建适配器
    pub fn new(backend: Arc<dyn ObjectStorageBackend>, config: StorageConfig) -> Result<Self> {
        let config = config.validated()?;
        if backend.bucket() != config.bucket {
            return Err(StorageError::Configuration(format!(
                "backend bucket {} does not match configured bucket {}",
                backend.bucket(),
                config.bucket
            )));
        }
        Ok(Self {
            backend,
            config,
            http: reqwest::Client::new(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ObjectStorageBackend> {
        &self.backend
    }

    /// Backend path for an id / 对象路径
    pub fn path(&self, id: &str) -> String {
        object_path(self.config.prefix.as_deref(), id)
    }

    /// Reference to one of this adapter's objects, for copying elsewhere / 对象引用
    pub fn reference(&self, id: &str, size: Option<u64>) -> StoredObjectRef {
        StoredObjectRef {
            backend: self.backend.identity(),
            bucket: self.config.bucket.clone(),
            path: self.path(id),
            size,
        }
    }

    /// Transfer source reading one of this adapter's objects / 以本适配器对象为上传源
    pub fn source(&self, id: &str, size: Option<u64>) -> TransferSource {
        TransferSource::Stored {
            object: self.reference(id, size),
            origin: self.backend.clone(),
        }
    }

    /// Headers for an upload: metadata defaults < acl < adapter options < call options
    fn upload_options(&self, metadata: &FileMetadata, options: &UploadOptions) -> UploadOptions {
        let mut merged = UploadOptions::new();
        if let Some(mime_type) = &metadata.mime_type {
            merged.insert(CONTENT_TYPE, mime_type.as_str());
        }
        if let Some(filename) = &metadata.filename {
            merged.insert(CONTENT_DISPOSITION, content_disposition("inline", filename));
        }
        if self.config.public {
            merged.insert(ACL, "public-read");
        }
        merged.merge(&self.config.upload_options);
        merged.merge(options);
        merged.encode_disposition();
        merged
    }

    /// Upload `source` as `id` / 上传对象
    ///
    /// Copies server-side when the source already lives in a compatible
    /// backend, otherwise writes the bytes. Returns the plan that was used.
    pub async fn upload(
        &self,
        source: TransferSource,
        id: &str,
        metadata: &FileMetadata,
        options: &UploadOptions,
    ) -> Result<TransferPlan> {
        let path = self.path(id);
        let options = self.upload_options(metadata, options);
        let size = source.size().await?;
        let plan = strategy::decide(
            source.backend(),
            size,
            &self.backend.identity(),
            &self.config.multipart_threshold,
        );
        let multipart = match (plan.multipart, size) {
            (true, Some(size)) => Some(strategy::part_plan(size, &self.config)),
            _ => None,
        };

        tracing::debug!(
            "upload: path={}, size={:?}, mode={:?}, multipart={:?}",
            path,
            size,
            plan.mode,
            multipart
        );

        match (plan.mode, source) {
            (TransferMode::Copy, TransferSource::Stored { object, .. }) => {
                self.backend.copy(&object, &path, &options, multipart).await?;
            }
            (_, TransferSource::Stored { object, origin }) => {
                // Different backend or credentials: pull the bytes through a temp file.
                let (file, temp) = fetch_to_temp(origin.as_ref(), &object.path).await?;
                let body = WriteBody::Reader(Box::new(file));
                self.backend.write(&path, body, size, &options, multipart).await?;
                drop(temp);
            }
            (_, TransferSource::File(file_path)) => {
                let file = tokio::fs::File::open(&file_path).await?;
                self.backend
                    .write(&path, WriteBody::Reader(Box::new(file)), size, &options, multipart)
                    .await?;
            }
            (_, TransferSource::Bytes(bytes)) => {
                self.backend
                    .write(&path, WriteBody::Bytes(bytes), size, &options, multipart)
                    .await?;
            }
            (_, TransferSource::Reader { reader, .. }) => {
                self.backend
                    .write(&path, WriteBody::Reader(reader), size, &options, multipart)
                    .await?;
            }
        }

        tracing::info!("uploaded {} ({:?})", path, plan.mode);
        Ok(plan)
    }

    /// Download into a temporary file, removed when the handle is dropped / 下载到临时文件
    pub async fn download(&self, id: &str) -> Result<DownloadedFile> {
        let path = self.path(id);
        let head = self
            .backend
            .head(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.clone()))?;
        let (file, temp) = fetch_to_temp(self.backend.as_ref(), &path).await?;
        tracing::debug!("downloaded {} to {:?}", path, &*temp);
        Ok(DownloadedFile {
            file,
            temp,
            content_type: head.content_type,
            size: head.size,
        })
    }

    /// Stream the object over HTTP from its URL, optionally a byte range / 流式读取
    ///
    /// Bytes are pulled as the stream is polled; a fresh call re-opens.
    pub async fn open_stream(
        &self,
        id: &str,
        range: Option<Range<u64>>,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        if range.as_ref().map_or(false, |r| r.is_empty()) {
            return Ok(stream::empty().boxed());
        }
        let url = self.url(id, &UrlOptions::default()).await?;
        let mut request = self.http.get(&url);
        if let Some(range) = &range {
            request = request.header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", range.start, range.end - 1),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::from_status(status.as_u16(), format!("GET {}", self.path(id))));
        }
        Ok(response.bytes_stream().map_err(StorageError::from).boxed())
    }

    /// HEAD only, no body transfer / 对象是否存在
    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.backend.head(&self.path(id)).await?.is_some())
    }

    /// Delete one object; missing objects are fine / 删除对象
    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path(id);
        self.backend.delete(&path).await?;
        tracing::debug!("deleted {}", path);
        Ok(())
    }

    /// Delete many objects, one batch request per 1000 ids / 批量删除
    ///
    /// Every chunk is attempted; failed chunks are reported together.
    pub async fn delete_all<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        let objects = ids
            .iter()
            .map(|id| ObjectVersion::current(&self.path(id.as_ref())))
            .collect();
        let labels = ids.iter().map(|id| id.as_ref().to_string()).collect();
        self.delete_in_chunks(objects, labels).await
    }

    /// Delete every object below `prefix` (relative to the namespace) / 按前缀删除
    pub async fn delete_prefixed(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return self.clear().await;
        }
        self.delete_listed(&format!("{}/", self.path(prefix))).await
    }

    /// Delete everything in the namespace, all versions included / 清空命名空间
    pub async fn clear(&self) -> Result<()> {
        let prefix = match &self.config.prefix {
            Some(prefix) => format!("{}/", prefix),
            None => String::new(),
        };
        self.delete_listed(&prefix).await
    }

    async fn delete_listed(&self, prefix: &str) -> Result<()> {
        let mut previous: Option<Vec<ObjectVersion>> = None;
        loop {
            let objects = self.backend.list_versions(prefix).await?;
            if objects.is_empty() {
                return Ok(());
            }
            if previous.as_ref() == Some(&objects) {
                return Err(StorageError::Transport(format!(
                    "{} objects under {:?} survived deletion",
                    objects.len(),
                    prefix
                )));
            }
            let labels = objects.iter().map(|o| o.key.clone()).collect();
            self.delete_in_chunks(objects.clone(), labels).await?;
            previous = Some(objects);
        }
    }

    async fn delete_in_chunks(&self, objects: Vec<ObjectVersion>, labels: Vec<String>) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let total_chunks = objects.len().div_ceil(MAX_BATCH_DELETE);

        let mut failed: Vec<FailedChunk> = stream::iter(
            objects
                .chunks(MAX_BATCH_DELETE)
                .zip(labels.chunks(MAX_BATCH_DELETE))
                .enumerate(),
        )
        .map(|(index, (chunk, keys))| async move {
            match self.backend.batch_delete(chunk).await {
                Ok(()) => {
                    tracing::debug!("delete chunk {} ({} keys) done", index, chunk.len());
                    None
                }
                Err(e) => {
                    tracing::warn!("delete chunk {} ({} keys) failed: {}", index, chunk.len(), e);
                    Some(FailedChunk {
                        index,
                        keys: keys.to_vec(),
                        error: e.to_string(),
                    })
                }
            }
        })
        .buffer_unordered(self.config.delete_concurrency)
        .filter_map(|failure| async move { failure })
        .collect()
        .await;

        if failed.is_empty() {
            tracing::info!("deleted {} objects in {} chunks", objects.len(), total_chunks);
            return Ok(());
        }
        failed.sort_by_key(|f| f.index);
        Err(StorageError::PartialBatchFailure { failed, total_chunks })
    }
}

/// Read an object into a fresh temp file, rewound to the start / 读取到临时文件
async fn fetch_to_temp(
    backend: &dyn ObjectStorageBackend,
    path: &str,
) -> Result<(tokio::fs::File, TempPath)> {
    let (file, temp) = NamedTempFile::new()?.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    backend.read_to_file(path, &mut file).await?;
    file.rewind().await?;
    Ok((file, temp))
}

/// A downloaded object: a readable temp file plus its content type / 下载结果
///
/// The file is deleted when this value is dropped, on every exit path.
#[derive(Debug)]
pub struct DownloadedFile {
    file: tokio::fs::File,
    temp: TempPath,
    content_type: Option<String>,
    size: u64,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        &self.temp
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Keep the file past this handle; the caller owns cleanup from here / 持久化临时文件
    pub fn persist(self, target: &Path) -> Result<()> {
        self.temp
            .persist(target)
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

impl AsyncRead for DownloadedFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}
