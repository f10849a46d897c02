//! S3驱动核心实现 / S3-compatible object storage backend
//!
//! - 单次上传与分片上传（分片并发，失败即中止）
//! - 同桶服务端复制（CopyObject，5GiB以内），超限或跨桶时按范围读取后分片写入
//! - 批量删除（DeleteObjects）与全版本列举
//! - 预签名GET/PUT链接与POST表单

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderName;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::post_policy::{PostPolicy, PostPolicyField, PostPolicyValue};
use s3::serde_types::ObjectIdentifier;
use s3::Region;

use crate::error::{Result, StorageError};
use crate::storage::options::{ACL, CONTENT_TYPE};
use crate::storage::{
    BackendIdentity, MultipartPlan, ObjectHead, ObjectStorageBackend, ObjectVersion, PresignedPost,
    SignMethod, StoredObjectRef, UploadOptions, WriteBody, MAX_BATCH_DELETE,
};
use crate::utils::encode_key;
use super::config::S3Config;
use super::multipart::{MultipartUpload, PartSource};
use super::versions;

pub const KIND: &str = "s3";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// CopyObject 单次复制上限
const MAX_COPY_OBJECT: u64 = 5 * 1024 * 1024 * 1024;
/// 中转复制未给出分片计划时的分片大小
const RELAY_PART_SIZE: u64 = 64 * 1024 * 1024;

/// S3后端
pub struct S3Backend {
    config: S3Config,
    bucket_name: String,
    bucket: Arc<Bucket>,
    /// 版本列举使用的HTTP客户端
    http: reqwest::Client,
}

impl S3Backend {
    /// 创建新的S3后端实例
    pub fn new(bucket: &str, config: S3Config) -> Result<Self> {
        if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
            return Err(StorageError::Configuration("S3 access key is required".into()));
        }
        let client = create_bucket(&config, bucket)?;
        Ok(Self {
            config,
            bucket_name: bucket.to_string(),
            bucket: Arc::from(client),
            http: reqwest::Client::new(),
        })
    }

    /// 带对象元数据请求头的客户端副本
    fn bucket_with_headers(&self, headers: &BTreeMap<String, String>) -> Bucket {
        let mut bucket = (*self.bucket).clone();
        for (name, value) in headers {
            bucket.add_header(name, value);
        }
        bucket
    }

    /// 源对象所在桶的客户端（同一凭证）
    fn source_bucket(&self, name: &str) -> Result<Arc<Bucket>> {
        if name == self.bucket_name {
            return Ok(self.bucket.clone());
        }
        Ok(Arc::from(create_bucket(&self.config, name)?))
    }

}

/// 创建S3 Bucket客户端
fn create_bucket(config: &S3Config, name: &str) -> Result<Box<Bucket>> {
    let credentials = Credentials::new(
        Some(&config.access_key_id),
        Some(&config.secret_access_key),
        if config.session_token.is_empty() { None } else { Some(&config.session_token) },
        None,
        None,
    )
    .map_err(|e| StorageError::Configuration(format!("创建S3凭证失败: {}", e)))?;

    let region = Region::Custom {
        region: config.region.clone(),
        endpoint: config.resolved_endpoint(),
    };

    let bucket = Bucket::new(name, region, credentials)
        .map_err(|e| StorageError::Configuration(format!("创建S3 Bucket失败: {}", e)))?;

    let bucket = if config.force_path_style {
        bucket.with_path_style()
    } else {
        bucket
    };

    Ok(bucket)
}

/// 将上传选项转换为S3请求头；content-type 单独返回
pub(super) fn request_headers(options: &UploadOptions) -> Result<(String, BTreeMap<String, String>)> {
    let content_type = options.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
    let mut headers = BTreeMap::new();
    for (key, value) in options.iter() {
        if key == CONTENT_TYPE {
            continue;
        }
        let name = if key == ACL { "x-amz-acl" } else { key };
        // 非法请求头在发送前拒绝
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StorageError::Configuration(format!("invalid header {}: {}", name, e)))?;
        if !value.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b)) {
            return Err(StorageError::Configuration(format!(
                "header {} must be visible ASCII: {}",
                name, value
            )));
        }
        headers.insert(name.to_string(), value.to_string());
    }
    Ok((content_type, headers))
}

/// 检查S3响应状态码
pub(super) fn check_status(code: u16, key: &str) -> Result<()> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(StorageError::from_status(code, key.to_string()))
    }
}

/// rust-s3 错误转换；带状态码的失败按状态码归类
pub(super) fn s3_error(context: &'static str) -> impl Fn(S3Error) -> StorageError {
    move |e| match e {
        S3Error::HttpFailWithBody(code, body) => StorageError::from_status(code, format!("{}: {}", context, body)),
        other => StorageError::Transport(format!("{}: {}", context, other)),
    }
}

#[async_trait]
impl ObjectStorageBackend for S3Backend {
    fn identity(&self) -> BackendIdentity {
        // 同一端点、同一凭证才能服务端复制
        let account = format!("{}@{}", self.config.access_key_id, self.config.resolved_endpoint());
        BackendIdentity::new(KIND, &account)
    }

    fn bucket(&self) -> &str {
        &self.bucket_name
    }

    async fn write(
        &self,
        path: &str,
        body: WriteBody,
        size: Option<u64>,
        options: &UploadOptions,
        multipart: Option<MultipartPlan>,
    ) -> Result<()> {
        let (content_type, headers) = request_headers(options)?;
        let bucket = self.bucket_with_headers(&headers);

        match (multipart, size) {
            (Some(plan), Some(size)) => {
                let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match body {
                    WriteBody::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
                    WriteBody::Reader(reader) => reader,
                };
                MultipartUpload {
                    init_bucket: &bucket,
                    bucket: self.bucket.clone(),
                    key: path,
                    content_type: &content_type,
                    size,
                    plan,
                }
                .run(PartSource::Reader(reader))
                .await
            }
            _ => {
                let data = body.into_bytes().await?;
                tracing::debug!("S3上传: key={}, size={}, content_type={}", path, data.len(), content_type);
                let response = bucket
                    .put_object_with_content_type(path, &data, &content_type)
                    .await
                    .map_err(s3_error("上传S3对象失败"))?;
                check_status(response.status_code(), path)
            }
        }
    }

    async fn copy(
        &self,
        source: &StoredObjectRef,
        path: &str,
        options: &UploadOptions,
        multipart: Option<MultipartPlan>,
    ) -> Result<()> {
        let (content_type, mut headers) = request_headers(options)?;

        // 同桶且不超过CopyObject上限时服务端复制，否则按范围中转
        let relay_size = match source.size {
            Some(size) if size > MAX_COPY_OBJECT => Some(size),
            Some(size) if source.bucket != self.bucket_name => Some(size),
            _ if source.bucket != self.bucket_name => {
                let source_bucket = self.source_bucket(&source.bucket)?;
                let (head, code) = source_bucket
                    .head_object(&source.path)
                    .await
                    .map_err(s3_error("读取源对象元数据失败"))?;
                check_status(code, &source.path)?;
                Some(head.content_length.unwrap_or(0).max(0) as u64)
            }
            _ => None,
        };

        if let Some(size) = relay_size {
            let plan = multipart.unwrap_or(MultipartPlan {
                part_size: size.clamp(1, RELAY_PART_SIZE),
                concurrency: 1,
            });
            let bucket = self.bucket_with_headers(&headers);
            tracing::debug!("S3分片复制: src={}/{}, dst={}, size={}", source.bucket, source.path, path, size);
            return MultipartUpload {
                init_bucket: &bucket,
                bucket: self.bucket.clone(),
                key: path,
                content_type: &content_type,
                size,
                plan,
            }
            .run(PartSource::Object {
                bucket: self.source_bucket(&source.bucket)?,
                key: source.path.clone(),
            })
            .await;
        }

        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = encode_key(&source.path);
        headers.insert("x-amz-metadata-directive".into(), "REPLACE".into());
        headers.insert(CONTENT_TYPE.into(), content_type);
        let bucket = self.bucket_with_headers(&headers);

        tracing::debug!("S3 CopyObject: src_key={}, encoded={}, dst_key={}", source.path, encoded_src, path);
        let code = bucket
            .copy_object_internal(&encoded_src, path)
            .await
            .map_err(s3_error("S3 CopyObject失败"))?;
        check_status(code, &source.path)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectHead>> {
        let (head, code) = self
            .bucket
            .head_object(path)
            .await
            .map_err(s3_error("读取S3对象元数据失败"))?;
        if code == 404 {
            return Ok(None);
        }
        check_status(code, path)?;
        Ok(Some(ObjectHead {
            size: head.content_length.unwrap_or(0).max(0) as u64,
            content_type: head.content_type,
            content_disposition: head.content_disposition,
            etag: head.e_tag,
        }))
    }

    async fn read_to_file(&self, path: &str, file: &mut tokio::fs::File) -> Result<()> {
        let code = self
            .bucket
            .get_object_to_writer(path, file)
            .await
            .map_err(s3_error("下载S3对象失败"))?;
        check_status(code, path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tracing::debug!("S3删除: key={}", path);
        let response = self
            .bucket
            .delete_object(path)
            .await
            .map_err(s3_error("删除S3对象失败"))?;
        match response.status_code() {
            404 => Ok(()),
            code => check_status(code, path),
        }
    }

    async fn batch_delete(&self, objects: &[ObjectVersion]) -> Result<()> {
        if objects.len() > MAX_BATCH_DELETE {
            return Err(StorageError::Configuration(format!(
                "at most {} keys per delete request, got {}",
                MAX_BATCH_DELETE,
                objects.len()
            )));
        }
        if objects.is_empty() {
            return Ok(());
        }

        let identifiers: Vec<ObjectIdentifier> = objects
            .iter()
            .map(|object| match &object.version_id {
                Some(version_id) => ObjectIdentifier::with_version(object.key.as_str(), version_id.as_str()),
                None => ObjectIdentifier::new(object.key.as_str()),
            })
            .collect();
        tracing::debug!("S3批量删除: count={}", identifiers.len());

        let result = self
            .bucket
            .delete_objects(identifiers)
            .await
            .map_err(s3_error("S3批量删除失败"))?;

        match result.errors.first() {
            None => Ok(()),
            Some(first) => {
                tracing::warn!("S3批量删除部分失败: failed={}, total={}", result.errors.len(), objects.len());
                let message = format!(
                    "{} of {} keys failed, first {}: {} {}",
                    result.errors.len(),
                    objects.len(),
                    first.key,
                    first.code,
                    first.message
                );
                Err(match first.code.as_str() {
                    "AccessDenied" => StorageError::Permission(message),
                    _ => StorageError::Transport(message),
                })
            }
        }
    }

    async fn list_versions(&self, prefix: &str) -> Result<Vec<ObjectVersion>> {
        versions::list_all(&self.http, &self.bucket, prefix).await
    }

    async fn sign(
        &self,
        method: SignMethod,
        path: &str,
        expires_in: u32,
        query: &BTreeMap<String, String>,
    ) -> Result<String> {
        let queries: Option<HashMap<String, String>> = if query.is_empty() {
            None
        } else {
            Some(query.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        };
        let url = match method {
            SignMethod::Get => self.bucket.presign_get(path, expires_in, queries).await,
            SignMethod::Put => self.bucket.presign_put(path, expires_in, None, queries).await,
        }
        .map_err(s3_error("生成预签名URL失败"))?;
        Ok(url)
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.bucket.url(), encode_key(path))
    }

    async fn presign_post(
        &self,
        path: &str,
        fields: &UploadOptions,
        expires_in: u32,
        content_length_range: Option<(u64, u64)>,
    ) -> Result<PresignedPost> {
        let mut policy = PostPolicy::new(expires_in)
            .condition(PostPolicyField::Key, PostPolicyValue::Exact(Cow::from(path.to_string())))
            .map_err(policy_error)?;
        for (key, value) in fields.iter() {
            let field = match key {
                ACL => PostPolicyField::Acl,
                CONTENT_TYPE => PostPolicyField::ContentType,
                "content-disposition" => PostPolicyField::ContentDisposition,
                "cache-control" => PostPolicyField::CacheControl,
                other => PostPolicyField::Custom(Cow::from(other.to_string())),
            };
            policy = policy
                .condition(field, PostPolicyValue::Exact(Cow::from(value.to_string())))
                .map_err(policy_error)?;
        }
        if let Some((min, max)) = content_length_range {
            let min = u32::try_from(min).map_err(|_| range_error(min))?;
            let max = u32::try_from(max).map_err(|_| range_error(max))?;
            policy = policy
                .condition(PostPolicyField::ContentLengthRange, PostPolicyValue::Range(min, max))
                .map_err(policy_error)?;
        }

        let post = self
            .bucket
            .presign_post(policy)
            .await
            .map_err(s3_error("生成预签名POST失败"))?;

        let mut form: BTreeMap<String, String> = post.fields.into_iter().collect();
        // 表单必须携带策略中的精确字段
        form.entry("key".into()).or_insert_with(|| path.to_string());
        for (key, value) in fields.iter() {
            form.entry(key.to_string()).or_insert_with(|| value.to_string());
        }

        Ok(PresignedPost { url: post.url, fields: form })
    }
}

fn policy_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Configuration(format!("invalid POST policy: {}", e))
}

fn range_error(value: u64) -> StorageError {
    StorageError::Configuration(format!("content length {} exceeds the POST policy range", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::fake::FakeS3;

    fn backend() -> S3Backend {
        let config = S3Config {
            endpoint: "http://localhost:9000".into(),
            access_key_id: "AK".into(),
            secret_access_key: "SK".into(),
            force_path_style: true,
            ..Default::default()
        };
        S3Backend::new("test", config).unwrap()
    }

    #[test]
    fn test_requires_credentials() {
        let result = S3Backend::new("test", S3Config::default());
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_identity_includes_endpoint() {
        let identity = backend().identity();
        assert_eq!(identity.kind, "s3");
        assert_eq!(identity.account, "AK@http://localhost:9000");
    }

    #[test]
    fn test_request_headers() {
        let options = UploadOptions::new()
            .with("content_type", "image/png")
            .with("acl", "public-read")
            .with("cache_control", "max-age=60");
        let (content_type, headers) = request_headers(&options).unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(headers.get("x-amz-acl").map(String::as_str), Some("public-read"));
        assert_eq!(headers.get("cache-control").map(String::as_str), Some("max-age=60"));
        assert!(!headers.contains_key("content-type"));

        let (content_type, _) = request_headers(&UploadOptions::new()).unwrap();
        assert_eq!(content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_request_headers_rejects_non_ascii() {
        let options = UploadOptions::new().with("content_disposition", "inline; filename=\"ä\"");
        assert!(request_headers(&options).is_err());
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(200, "a").is_ok());
        assert!(check_status(204, "a").is_ok());
        assert!(check_status(404, "a").unwrap_err().is_not_found());
        assert!(matches!(check_status(403, "a"), Err(StorageError::Permission(_))));
    }

    #[test]
    fn test_public_url_path_style() {
        assert_eq!(backend().public_url("cache/a b.jpg"), "http://localhost:9000/test/cache/a%20b.jpg");
    }

    #[tokio::test]
    async fn test_batch_delete_is_one_request() {
        let (fake, backend) = FakeS3::start().await;
        let objects: Vec<ObjectVersion> = (0..5)
            .map(|i| ObjectVersion::current(&format!("cache/{}", i)))
            .chain(std::iter::once(ObjectVersion {
                key: "cache/old".into(),
                version_id: Some("v1".into()),
            }))
            .collect();

        backend.batch_delete(&objects).await.unwrap();

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert!(requests[0].has("delete"));
        let body = requests[0].text();
        for i in 0..5 {
            assert!(body.contains(&format!("<Key>cache/{}</Key>", i)));
        }
        assert!(body.contains("<Key>cache/old</Key><VersionId>v1</VersionId>"));
    }

    #[tokio::test]
    async fn test_batch_delete_reports_key_errors() {
        let (fake, backend) = FakeS3::start().await;
        fake.deny_delete("cache/1");
        let objects = vec![ObjectVersion::current("cache/0"), ObjectVersion::current("cache/1")];

        let err = backend.batch_delete(&objects).await.unwrap_err();
        assert!(matches!(err, StorageError::Permission(ref m) if m.contains("cache/1")));

        backend.batch_delete(&[]).await.unwrap();
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_large_same_bucket_copy_stays_server_side() {
        let (fake, backend) = FakeS3::start().await;
        let source = StoredObjectRef {
            backend: backend.identity(),
            bucket: "test".into(),
            path: "cache/big.bin".into(),
            size: Some(200 * 1024 * 1024),
        };
        let plan = MultipartPlan { part_size: 16 * 1024 * 1024, concurrency: 4 };

        backend
            .copy(&source, "store/big.bin", &UploadOptions::new(), Some(plan))
            .await
            .unwrap();

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].path, "/test/store/big.bin");
        assert_eq!(requests[0].copy_source.as_deref(), Some("test/cache/big.bin"));
    }

    #[tokio::test]
    async fn test_list_versions_follows_markers() {
        let (fake, backend) = FakeS3::start().await;
        fake.push_version_page(
            "<ListVersionsResult><IsTruncated>true</IsTruncated><NextKeyMarker>cache/a</NextKeyMarker>\
             <NextVersionIdMarker>v2</NextVersionIdMarker>\
             <Version><Key>cache/a</Key><VersionId>v1</VersionId></Version>\
             <DeleteMarker><Key>cache/a</Key><VersionId>v2</VersionId></DeleteMarker></ListVersionsResult>",
        );
        fake.push_version_page(
            "<ListVersionsResult><IsTruncated>false</IsTruncated>\
             <Version><Key>cache/b</Key><VersionId>v3</VersionId></Version></ListVersionsResult>",
        );

        let versions = backend.list_versions("cache/").await.unwrap();
        assert_eq!(
            versions.iter().map(|v| (v.key.as_str(), v.version_id.as_deref())).collect::<Vec<_>>(),
            vec![("cache/a", Some("v1")), ("cache/a", Some("v2")), ("cache/b", Some("v3"))]
        );

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].param("prefix"), Some("cache/"));
        assert_eq!(requests[0].param("key-marker"), None);
        assert_eq!(requests[1].param("key-marker"), Some("cache/a"));
        assert_eq!(requests[1].param("version-id-marker"), Some("v2"));
    }

    #[tokio::test]
    async fn test_clear_removes_every_version() {
        use crate::storage::{ObjectStore, StorageConfig};

        let (fake, backend) = FakeS3::start().await;
        fake.push_version_page(
            "<ListVersionsResult><IsTruncated>false</IsTruncated>\
             <Version><Key>cache/a</Key><VersionId>v1</VersionId></Version>\
             <DeleteMarker><Key>cache/a</Key><VersionId>v2</VersionId></DeleteMarker></ListVersionsResult>",
        );
        let store = ObjectStore::new(Arc::new(backend), StorageConfig::new("test").with_prefix("cache")).unwrap();

        store.clear().await.unwrap();

        let requests = fake.requests();
        let deletes: Vec<_> = requests.iter().filter(|r| r.has("delete")).collect();
        assert_eq!(deletes.len(), 1);
        let body = deletes[0].text();
        assert!(body.contains("<Key>cache/a</Key><VersionId>v1</VersionId>"));
        assert!(body.contains("<Key>cache/a</Key><VersionId>v2</VersionId>"));
        // listed again until nothing is left
        assert_eq!(requests.iter().filter(|r| r.has("versions")).count(), 2);
    }

    #[tokio::test]
    async fn test_presign_get_is_local() {
        let mut query = BTreeMap::new();
        query.insert("response-content-disposition".to_string(), "attachment".to_string());
        let url = backend().sign(SignMethod::Get, "cache/a.jpg", 60, &query).await.unwrap();
        assert!(url.starts_with("http://localhost:9000/test/cache/a.jpg?"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=60"));
    }
}
