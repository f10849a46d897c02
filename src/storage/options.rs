//! Per-call option types / 调用参数类型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::encode_content_disposition;

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_DISPOSITION: &str = "content-disposition";
pub const ACL: &str = "acl";
pub const RESPONSE_CONTENT_DISPOSITION: &str = "response-content-disposition";

/// Transport metadata sent with an object (content type, disposition, acl...) / 上传选项
///
/// Keys are normalized to lower-case kebab form, so `content_type`,
/// `Content-Type` and `content-type` address the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct UploadOptions(BTreeMap<String, String>);

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('_', "-")
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(normalize_key(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(&normalize_key(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&normalize_key(key))
    }

    /// Merge `other` over `self`; entries from `other` win / 合并，后者覆盖前者
    pub fn merge(&mut self, other: &UploadOptions) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    pub fn content_disposition(&self) -> Option<&str> {
        self.get(CONTENT_DISPOSITION)
    }

    /// Encode the filename in the content disposition, if any / 编码文件名
    pub fn encode_disposition(&mut self) {
        if let Some(value) = self.0.get_mut(CONTENT_DISPOSITION) {
            *value = encode_content_disposition(value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<BTreeMap<String, String>> for UploadOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map.into_iter().map(|(k, v)| (normalize_key(&k), v)).collect())
    }
}

impl From<UploadOptions> for BTreeMap<String, String> {
    fn from(options: UploadOptions) -> Self {
        options.0
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for UploadOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = UploadOptions::new();
        for (k, v) in iter {
            options.insert(k.as_ref(), v);
        }
        options
    }
}

/// File metadata recognized by `upload` / 上传时识别的文件元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl FileMetadata {
    pub fn new(mime_type: Option<&str>, filename: Option<&str>) -> Self {
        Self {
            mime_type: mime_type.map(str::to_string),
            filename: filename.map(str::to_string),
        }
    }
}

/// Options for building an access URL / 生成访问链接的参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOptions {
    /// Force `response-content-disposition: attachment` unless one is given
    pub download: bool,
    /// Unsigned URL; falls back to the adapter's `public` flag when unset
    pub public: Option<bool>,
    /// CDN host, overrides the configured host
    pub host: Option<String>,
    pub expires_in: Option<u32>,
    /// Forwarded to the signer untouched (e.g. `response-content-type`)
    pub params: BTreeMap<String, String>,
}

impl UrlOptions {
    pub fn download() -> Self {
        Self { download: true, ..Default::default() }
    }

    pub fn public() -> Self {
        Self { public: Some(true), ..Default::default() }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn expires_in(mut self, secs: u32) -> Self {
        self.expires_in = Some(secs);
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

/// Direct-upload method / 直传方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresignMethod {
    /// HTML form upload with a signed policy
    #[default]
    Post,
    /// Signed PUT URL
    Put,
}

/// Options for issuing a presigned upload / 预签名上传参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresignOptions {
    pub method: PresignMethod,
    pub expires_in: Option<u32>,
    /// Call-level upload fields, merged over the adapter defaults
    pub fields: UploadOptions,
    /// Accepted body size range in bytes (POST only)
    pub content_length_range: Option<(u64, u64)>,
}

impl PresignOptions {
    pub fn put() -> Self {
        Self { method: PresignMethod::Put, ..Default::default() }
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key, value);
        self
    }
}
