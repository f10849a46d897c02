//! In-memory object storage backend / 内存对象存储
//!
//! Behaves like a small S3: buckets share one store per "service" (see
//! [`MemoryBackend::sibling`]) and objects can be versioned. Test builds
//! also record every call and can make batch deletes fail on purpose.

use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
#[cfg(test)]
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, StorageError};
use crate::storage::{
    BackendIdentity, MultipartPlan, ObjectHead, ObjectStorageBackend, ObjectVersion, PresignedPost,
    SignMethod, StoredObjectRef, UploadOptions, WriteBody, MAX_BATCH_DELETE,
};
use crate::utils::encode_key;

pub const KIND: &str = "memory";
const DEFAULT_ENDPOINT: &str = "https://objects.memory.test";

/// One stored version / 对象版本
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub options: UploadOptions,
    pub version_id: String,
}

/// A recorded backend call / 调用记录
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Write { path: String, size: u64, multipart: Option<MultipartPlan> },
    Copy { from: String, to: String, multipart: Option<MultipartPlan> },
    Head(String),
    Read(String),
    Delete(String),
    BatchDelete(Vec<String>),
    List(String),
    Sign { method: SignMethod, path: String },
    PresignPost(String),
}

type ObjectMap = HashMap<(String, String), Vec<MemoryObject>>;

/// Call journal and injected failures / 测试钩子
#[cfg(test)]
#[derive(Default)]
struct TestHooks {
    calls: Mutex<Vec<BackendCall>>,
    failing_keys: RwLock<HashSet<String>>,
}

pub struct MemoryBackend {
    bucket: String,
    account: String,
    endpoint: String,
    versioned: bool,
    objects: Arc<RwLock<ObjectMap>>,
    #[cfg(test)]
    hooks: TestHooks,
}

impl MemoryBackend {
    pub fn new(bucket: &str, account: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            account: account.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            versioned: false,
            objects: Arc::new(RwLock::new(HashMap::new())),
            #[cfg(test)]
            hooks: TestHooks::default(),
        }
    }

    /// Another backend on the same service (shared objects) / 共享存储的另一个后端
    pub fn sibling(&self, bucket: &str, account: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            account: account.to_string(),
            endpoint: self.endpoint.clone(),
            versioned: self.versioned,
            objects: self.objects.clone(),
            #[cfg(test)]
            hooks: TestHooks::default(),
        }
    }

    /// Base URL used for signed and public URLs (path style) / 访问端点
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Make every batch delete containing `key` fail / 注入批量删除失败
    #[cfg(test)]
    pub fn fail_batches_containing(&self, key: &str) {
        self.hooks.failing_keys.write().insert(key.to_string());
    }

    #[cfg(test)]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.hooks.calls.lock().clone()
    }

    #[cfg(test)]
    pub fn clear_calls(&self) {
        self.hooks.calls.lock().clear();
    }

    /// Current version of an object in this bucket / 当前版本
    pub fn object(&self, path: &str) -> Option<MemoryObject> {
        self.objects
            .read()
            .get(&(self.bucket.clone(), path.to_string()))
            .and_then(|versions| versions.last().cloned())
    }

    /// Number of stored versions (all keys) in this bucket / 版本总数
    pub fn version_count(&self) -> usize {
        self.objects
            .read()
            .iter()
            .filter(|((bucket, _), _)| *bucket == self.bucket)
            .map(|(_, versions)| versions.len())
            .sum()
    }

    /// Store an object directly, bypassing the journal / 直接写入对象
    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.store(path, data.into(), UploadOptions::new());
    }

    #[cfg(test)]
    fn record(&self, call: BackendCall) {
        self.hooks.calls.lock().push(call);
    }

    fn store(&self, path: &str, data: Bytes, options: UploadOptions) {
        let object = MemoryObject {
            data,
            options,
            version_id: uuid::Uuid::new_v4().to_string(),
        };
        let mut objects = self.objects.write();
        let versions = objects.entry((self.bucket.clone(), path.to_string())).or_default();
        if !self.versioned {
            versions.clear();
        }
        versions.push(object);
    }

    fn remove(&self, object: &ObjectVersion) {
        let mut objects = self.objects.write();
        let key = (self.bucket.clone(), object.key.clone());
        if let Some(versions) = objects.get_mut(&key) {
            match &object.version_id {
                Some(id) => versions.retain(|v| &v.version_id != id),
                None => {
                    versions.pop();
                }
            }
            if versions.is_empty() {
                objects.remove(&key);
            }
        }
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }
}

#[async_trait]
impl ObjectStorageBackend for MemoryBackend {
    fn identity(&self) -> BackendIdentity {
        BackendIdentity::new(KIND, &self.account)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[cfg_attr(not(test), allow(unused_variables))]
    async fn write(
        &self,
        path: &str,
        body: WriteBody,
        _size: Option<u64>,
        options: &UploadOptions,
        multipart: Option<MultipartPlan>,
    ) -> Result<()> {
        let data = body.into_bytes().await?;
        #[cfg(test)]
        self.record(BackendCall::Write {
            path: path.to_string(),
            size: data.len() as u64,
            multipart,
        });
        self.store(path, data, options.clone());
        Ok(())
    }

    #[cfg_attr(not(test), allow(unused_variables))]
    async fn copy(
        &self,
        source: &StoredObjectRef,
        path: &str,
        options: &UploadOptions,
        multipart: Option<MultipartPlan>,
    ) -> Result<()> {
        #[cfg(test)]
        self.record(BackendCall::Copy {
            from: format!("{}/{}", source.bucket, source.path),
            to: path.to_string(),
            multipart,
        });
        let data = self
            .objects
            .read()
            .get(&(source.bucket.clone(), source.path.clone()))
            .and_then(|versions| versions.last())
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::NotFound(source.path.clone()))?;
        self.store(path, data, options.clone());
        Ok(())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectHead>> {
        #[cfg(test)]
        self.record(BackendCall::Head(path.to_string()));
        Ok(self.object(path).map(|object| ObjectHead {
            size: object.data.len() as u64,
            content_type: object.options.content_type().map(str::to_string),
            content_disposition: object.options.content_disposition().map(str::to_string),
            etag: Some(object.version_id),
        }))
    }

    async fn read_to_file(&self, path: &str, file: &mut tokio::fs::File) -> Result<()> {
        #[cfg(test)]
        self.record(BackendCall::Read(path.to_string()));
        let object = self
            .object(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        file.write_all(&object.data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        #[cfg(test)]
        self.record(BackendCall::Delete(path.to_string()));
        self.remove(&ObjectVersion::current(path));
        Ok(())
    }

    async fn batch_delete(&self, objects: &[ObjectVersion]) -> Result<()> {
        #[cfg(test)]
        self.record(BackendCall::BatchDelete(
            objects.iter().map(|o| o.key.clone()).collect(),
        ));
        if objects.len() > MAX_BATCH_DELETE {
            return Err(StorageError::Transport(format!(
                "MalformedXML: {} keys in one delete request",
                objects.len()
            )));
        }
        #[cfg(test)]
        {
            let failing = self.hooks.failing_keys.read();
            if let Some(bad) = objects.iter().find(|o| failing.contains(&o.key)) {
                return Err(StorageError::Transport(format!("InternalError deleting {}", bad.key)));
            }
        }
        for object in objects {
            self.remove(object);
        }
        Ok(())
    }

    async fn list_versions(&self, prefix: &str) -> Result<Vec<ObjectVersion>> {
        #[cfg(test)]
        self.record(BackendCall::List(prefix.to_string()));
        let objects = self.objects.read();
        let mut listed: Vec<ObjectVersion> = objects
            .iter()
            .filter(|((bucket, key), _)| *bucket == self.bucket && key.starts_with(prefix))
            .flat_map(|((_, key), versions)| {
                versions.iter().map(move |v| ObjectVersion {
                    key: key.clone(),
                    version_id: if self.versioned { Some(v.version_id.clone()) } else { None },
                })
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    #[cfg_attr(not(test), allow(unused_variables))]
    async fn sign(
        &self,
        method: SignMethod,
        path: &str,
        expires_in: u32,
        query: &BTreeMap<String, String>,
    ) -> Result<String> {
        #[cfg(test)]
        self.record(BackendCall::Sign { method, path: path.to_string() });
        let base = format!("{}/{}", self.bucket_url(), encode_key(path));
        let mut url = url::Url::parse(&base)
            .map_err(|e| StorageError::Configuration(format!("invalid endpoint {}: {}", base, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("X-Amz-Credential", &self.account);
            pairs.append_pair("X-Amz-Expires", &expires_in.to_string());
            pairs.append_pair("X-Amz-Signature", "memory");
        }
        Ok(url.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.bucket_url(), encode_key(path))
    }

    async fn presign_post(
        &self,
        path: &str,
        fields: &UploadOptions,
        expires_in: u32,
        content_length_range: Option<(u64, u64)>,
    ) -> Result<PresignedPost> {
        #[cfg(test)]
        self.record(BackendCall::PresignPost(path.to_string()));
        let mut form: BTreeMap<String, String> =
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        form.insert("key".into(), path.to_string());
        form.insert("x-amz-credential".into(), self.account.clone());
        form.insert("x-amz-expires".into(), expires_in.to_string());
        if let Some((min, max)) = content_length_range {
            form.insert("content-length-range".into(), format!("{},{}", min, max));
        }
        form.insert("x-amz-signature".into(), "memory".into());
        Ok(PresignedPost {
            url: self.bucket_url(),
            fields: form,
        })
    }
}
