//! Presigned direct uploads / 预签名直传

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Result, StorageError};
use super::options::{PresignMethod, PresignOptions, UploadOptions, ACL};
use super::store::ObjectStore;
use super::url_builder::expiry;
use super::SignMethod;

/// Everything a client needs to upload one object directly / 预签名凭证
///
/// Authorizes exactly one object path; nothing is kept on the adapter side.
#[derive(Debug, Clone, Serialize)]
pub struct PresignedCredential {
    pub method: PresignMethod,
    pub url: String,
    /// Resolved object path the credential is bound to / 对象路径
    pub path: String,
    /// Form fields to submit with a POST upload / 表单字段
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Headers the client must send with a PUT upload / 请求头
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub expires_in: u32,
    pub expires_at: DateTime<Utc>,
}

impl ObjectStore {
    /// Issue a time-bounded upload credential for `id` / 生成预签名上传凭证
    pub async fn presign(&self, id: &str, options: &PresignOptions) -> Result<PresignedCredential> {
        let path = self.path(id);
        let expires_in = expiry(options.expires_in, self.config.url_expires_in)?;

        let mut fields = UploadOptions::new();
        if self.config.public {
            fields.insert(ACL, "public-read");
        }
        fields.merge(&self.config.upload_options);
        fields.merge(&options.fields);
        fields.encode_disposition();

        let (url, form, headers) = match options.method {
            PresignMethod::Post => {
                if let Some((min, max)) = options.content_length_range {
                    if min > max {
                        return Err(StorageError::Configuration(format!(
                            "invalid content length range {}..{}",
                            min, max
                        )));
                    }
                }
                let post = self
                    .backend
                    .presign_post(&path, &fields, expires_in, options.content_length_range)
                    .await?;
                (post.url, post.fields, BTreeMap::new())
            }
            PresignMethod::Put => {
                if options.content_length_range.is_some() {
                    return Err(StorageError::Configuration(
                        "content_length_range requires a POST presign".into(),
                    ));
                }
                let (query, headers) = split_put_fields(&fields);
                let url = self.backend.sign(SignMethod::Put, &path, expires_in, &query).await?;
                (url, BTreeMap::new(), headers)
            }
        };

        tracing::debug!("presign: path={}, method={:?}, expires_in={}", path, options.method, expires_in);

        Ok(PresignedCredential {
            method: options.method,
            url,
            path,
            fields: form,
            headers,
            expires_in,
            expires_at: Utc::now() + Duration::seconds(i64::from(expires_in)),
        })
    }
}

/// acl and `x-amz-*` fields are signed into the PUT query, the rest are headers
fn split_put_fields(fields: &UploadOptions) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut query = BTreeMap::new();
    let mut headers = BTreeMap::new();
    for (key, value) in fields.iter() {
        if key == ACL {
            query.insert("x-amz-acl".to_string(), value.to_string());
        } else if key.starts_with("x-amz-") {
            query.insert(key.to_string(), value.to_string());
        } else {
            headers.insert(key.to_string(), value.to_string());
        }
    }
    (query, headers)
}
