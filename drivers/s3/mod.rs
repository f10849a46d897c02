//! S3兼容对象存储后端 / S3-compatible backend
//!
//! 支持 AWS S3、MinIO、阿里云OSS、腾讯云COS 等S3兼容服务

mod config;
mod driver;
mod multipart;
mod versions;
#[cfg(test)]
mod fake;

pub use config::S3Config;
pub use driver::{S3Backend, KIND};
