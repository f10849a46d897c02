//! Adapter configuration / 存储适配器配置

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::utils::normalize_prefix;
use super::options::UploadOptions;

pub const MIB: u64 = 1024 * 1024;
/// Smallest part S3-compatible backends accept (except the last one) / 最小分片
pub const MIN_PART_SIZE: u64 = 5 * MIB;
/// Longest validity a SigV4 presigned URL may have (7 days) / 签名最长有效期
pub const MAX_EXPIRES_IN: u32 = 604_800;

/// Size thresholds (bytes) at which transfers switch to multipart / 分片阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartThreshold {
    #[serde(default = "default_upload_threshold")]
    pub upload: u64,
    #[serde(default = "default_copy_threshold")]
    pub copy: u64,
}

fn default_upload_threshold() -> u64 {
    15 * MIB
}

fn default_copy_threshold() -> u64 {
    100 * MIB
}

impl Default for MultipartThreshold {
    fn default() -> Self {
        Self {
            upload: default_upload_threshold(),
            copy: default_copy_threshold(),
        }
    }
}

/// Storage adapter configuration, immutable once the adapter is built / 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket name / 存储桶名称
    pub bucket: String,
    /// Logical namespace inside the bucket / 前缀
    #[serde(default)]
    pub prefix: Option<String>,
    /// Custom public host (CDN) / 自定义域名
    #[serde(default)]
    pub host: Option<String>,
    /// Upload as public-read and serve unsigned URLs / 公共读
    #[serde(default)]
    pub public: bool,
    /// Default upload options / 默认上传选项
    #[serde(default)]
    pub upload_options: UploadOptions,
    #[serde(default)]
    pub multipart_threshold: MultipartThreshold,
    /// Upper bound on parts per multipart transfer / 最大分片数
    #[serde(default = "default_max_parts")]
    pub max_multipart_parts: u64,
    /// Preferred part size (bytes) / 分片大小
    #[serde(default = "default_part_size")]
    pub multipart_part_size: u64,
    /// Parts transferred in parallel / 并发分片数
    #[serde(default = "default_concurrency")]
    pub multipart_concurrency: usize,
    /// Delete chunks issued in parallel / 并发删除批次数
    #[serde(default = "default_concurrency")]
    pub delete_concurrency: usize,
    /// Default validity of signed URLs and presigns (seconds) / 签名有效期（秒）
    #[serde(default = "default_expires_in")]
    pub url_expires_in: u32,
}

fn default_max_parts() -> u64 {
    10_000
}

fn default_part_size() -> u64 {
    8 * MIB
}

fn default_concurrency() -> usize {
    4
}

fn default_expires_in() -> u32 {
    900
}

impl StorageConfig {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: None,
            host: None,
            public: false,
            upload_options: UploadOptions::default(),
            multipart_threshold: MultipartThreshold::default(),
            max_multipart_parts: default_max_parts(),
            multipart_part_size: default_part_size(),
            multipart_concurrency: default_concurrency(),
            delete_concurrency: default_concurrency(),
            url_expires_in: default_expires_in(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn with_upload_options(mut self, options: UploadOptions) -> Self {
        self.upload_options = options;
        self
    }

    pub fn with_multipart_threshold(mut self, upload: Option<u64>, copy: Option<u64>) -> Self {
        if let Some(upload) = upload {
            self.multipart_threshold.upload = upload;
        }
        if let Some(copy) = copy {
            self.multipart_threshold.copy = copy;
        }
        self
    }

    /// Validate and normalize; run once when the adapter is constructed / 校验配置
    pub fn validated(mut self) -> Result<Self> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::Configuration("bucket is required".into()));
        }
        if self.multipart_threshold.upload == 0 || self.multipart_threshold.copy == 0 {
            return Err(StorageError::Configuration(
                "multipart thresholds must be positive".into(),
            ));
        }
        if self.multipart_part_size < MIN_PART_SIZE {
            return Err(StorageError::Configuration(format!(
                "multipart_part_size must be at least {} bytes",
                MIN_PART_SIZE
            )));
        }
        if self.max_multipart_parts == 0 {
            return Err(StorageError::Configuration("max_multipart_parts must be positive".into()));
        }
        if self.multipart_concurrency == 0 || self.delete_concurrency == 0 {
            return Err(StorageError::Configuration("concurrency must be positive".into()));
        }
        if self.url_expires_in == 0 || self.url_expires_in > MAX_EXPIRES_IN {
            return Err(StorageError::Configuration(format!(
                "url_expires_in must be within 1..={}",
                MAX_EXPIRES_IN
            )));
        }
        self.host = self.host.filter(|h| !h.trim().is_empty());
        if let Some(host) = &self.host {
            url::Url::parse(host)
                .map_err(|e| StorageError::Configuration(format!("invalid host {}: {}", host, e)))?;
        }

        self.prefix = normalize_prefix(self.prefix.as_deref());
        Ok(self)
    }
}
