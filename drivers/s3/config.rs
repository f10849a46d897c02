//! S3驱动配置 / S3 backend configuration

use serde::{Deserialize, Serialize};

/// S3连接配置（存储桶名称在 `StorageConfig` 中）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// 阿里云OSS: https://oss-{region}.aliyuncs.com
    /// 腾讯云COS: https://cos.{region}.myqcloud.com
    /// MinIO: http://localhost:9000
    #[serde(default)]
    pub endpoint: String,
    /// 区域
    #[serde(default = "default_region")]
    pub region: String,
    /// Access Key ID
    pub access_key_id: String,
    /// Secret Access Key
    pub secret_access_key: String,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    /// 实际使用的端点，未配置时使用AWS默认端点
    pub fn resolved_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", self.region)
        } else {
            self.endpoint.trim_end_matches('/').to_string()
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            force_path_style: false,
        }
    }
}
