//! S3分片传输 / S3 multipart transfers
//!
//! 分片按顺序切分、并发上传，全部成功后才提交；任一分片失败则中止上传。

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use s3::bucket::Bucket;
use s3::serde_types::Part;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::error::{Result, StorageError};
use crate::storage::MultipartPlan;
use super::driver::{check_status, s3_error};

const PART_CONTENT_TYPE: &str = "application/octet-stream";

/// 分片数据来源
pub(super) enum PartSource {
    /// 顺序读取的数据流
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// 已存在的对象，按范围读取后写入（跨桶复制）
    Object { bucket: Arc<Bucket>, key: String },
}

/// 一次分片上传的参数
pub(super) struct MultipartUpload<'a> {
    /// 用于初始化上传的客户端（携带对象元数据请求头）
    pub init_bucket: &'a Bucket,
    /// 上传分片与提交使用的客户端
    pub bucket: Arc<Bucket>,
    pub key: &'a str,
    pub content_type: &'a str,
    pub size: u64,
    pub plan: MultipartPlan,
}

impl MultipartUpload<'_> {
    /// 执行分片上传，失败时中止并清理服务端状态
    pub async fn run(self, source: PartSource) -> Result<()> {
        let init = self
            .init_bucket
            .initiate_multipart_upload(self.key, self.content_type)
            .await
            .map_err(s3_error("初始化分片上传失败"))?;
        let upload_id = init.upload_id;

        tracing::debug!(
            "S3分片上传开始: key={}, upload_id={}, size={}, part_size={}",
            self.key,
            upload_id,
            self.size,
            self.plan.part_size
        );

        let parts = match self.upload_parts(&upload_id, source).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!("S3分片上传失败，中止: key={}, error={}", self.key, e);
                if let Err(abort_err) = self.bucket.abort_upload(self.key, &upload_id).await {
                    tracing::warn!("S3中止分片上传失败: key={}, error={}", self.key, abort_err);
                }
                return Err(e);
            }
        };

        let response = self
            .bucket
            .complete_multipart_upload(self.key, &upload_id, parts)
            .await
            .map_err(s3_error("完成分片上传失败"))?;
        check_status(response.status_code(), self.key)?;

        tracing::debug!("S3分片上传完成: key={}", self.key);
        Ok(())
    }

    async fn upload_parts(&self, upload_id: &str, mut source: PartSource) -> Result<Vec<Part>> {
        let part_count = self.plan.part_count(self.size);
        let concurrency = self.plan.concurrency.max(1);
        let mut completed: Vec<Part> = Vec::with_capacity(part_count as usize);
        let mut pending: FuturesUnordered<JoinHandle<Result<Part>>> = FuturesUnordered::new();

        for index in 0..part_count {
            // 并发数已满，等待一个分片完成
            if pending.len() >= concurrency {
                if let Some(joined) = pending.next().await {
                    completed.push(joined_part(joined)?);
                }
            }

            let part_number = u32::try_from(index + 1)
                .map_err(|_| StorageError::Configuration(format!("too many parts: {}", part_count)))?;
            let start = index * self.plan.part_size;
            let end = (start + self.plan.part_size).min(self.size);

            let bucket = self.bucket.clone();
            let key = self.key.to_string();
            let upload_id = upload_id.to_string();

            let task = match &mut source {
                PartSource::Reader(reader) => {
                    // 读取必须按顺序进行，上传并发
                    let mut data = vec![0u8; (end - start) as usize];
                    reader.read_exact(&mut data).await?;
                    tokio::spawn(async move { put_part(&bucket, &key, &upload_id, part_number, data).await })
                }
                PartSource::Object { bucket: source_bucket, key: source_key } => {
                    let source_bucket = source_bucket.clone();
                    let source_key = source_key.clone();
                    tokio::spawn(async move {
                        let data = if end > start {
                            let response = source_bucket
                                .get_object_range(&source_key, start, Some(end - 1))
                                .await
                                .map_err(s3_error("读取源对象分片失败"))?;
                            check_status(response.status_code(), &source_key)?;
                            response.bytes().to_vec()
                        } else {
                            Vec::new()
                        };
                        put_part(&bucket, &key, &upload_id, part_number, data).await
                    })
                }
            };
            pending.push(task);
        }

        while let Some(joined) = pending.next().await {
            completed.push(joined_part(joined)?);
        }

        completed.sort_by_key(|p| p.part_number);
        Ok(completed)
    }
}

async fn put_part(bucket: &Bucket, key: &str, upload_id: &str, part_number: u32, data: Vec<u8>) -> Result<Part> {
    tracing::debug!("S3上传分片: key={}, part={}, size={}", key, part_number, data.len());
    bucket
        .put_multipart_chunk(data, key, part_number, upload_id, PART_CONTENT_TYPE)
        .await
        .map_err(|e| StorageError::Transport(format!("上传分片失败: part={}, error={}", part_number, e)))
}

fn joined_part(joined: std::result::Result<Result<Part>, tokio::task::JoinError>) -> Result<Part> {
    joined.map_err(|e| StorageError::Transport(format!("分片任务执行失败: {}", e)))?
}
