//! Access URL generation / 访问链接生成

use url::Url;

use crate::error::{Result, StorageError};
use crate::utils::encode_content_disposition;
use super::config::MAX_EXPIRES_IN;
use super::options::{UrlOptions, RESPONSE_CONTENT_DISPOSITION};
use super::store::ObjectStore;
use super::SignMethod;

impl ObjectStore {
    /// URL for reading `id` / 获取访问链接
    ///
    /// Public URLs are unsigned and carry no response overrides; everything
    /// else is a signed GET valid for `expires_in` seconds.
    pub async fn url(&self, id: &str, options: &UrlOptions) -> Result<String> {
        let path = self.path(id);
        let public = options.public.unwrap_or(self.config.public);

        let url = if public {
            self.backend.public_url(&path)
        } else {
            let expires_in = expiry(options.expires_in, self.config.url_expires_in)?;
            let mut params = options.params.clone();
            if options.download && !params.contains_key(RESPONSE_CONTENT_DISPOSITION) {
                params.insert(RESPONSE_CONTENT_DISPOSITION.to_string(), "attachment".to_string());
            }
            if let Some(disposition) = params.get_mut(RESPONSE_CONTENT_DISPOSITION) {
                *disposition = encode_content_disposition(disposition);
            }
            self.backend.sign(SignMethod::Get, &path, expires_in, &params).await?
        };

        let host = options.host.as_deref().or(self.config.host.as_deref());
        match host {
            Some(host) => rewrite_host(&url, host, &self.config.bucket),
            None => Ok(url),
        }
    }
}

/// Requested expiry or the configured default, bounded by the signer limit
pub(super) fn expiry(requested: Option<u32>, default: u32) -> Result<u32> {
    let expires_in = requested.unwrap_or(default);
    if expires_in == 0 || expires_in > MAX_EXPIRES_IN {
        return Err(StorageError::Configuration(format!(
            "expires_in must be within 1..={}, got {}",
            MAX_EXPIRES_IN, expires_in
        )));
    }
    Ok(expires_in)
}

/// Move `url` onto a custom host (CDN) / 替换为自定义域名
///
/// Drops the leading `/<bucket>` segment of a path-style URL unless `host`
/// mentions the bucket name. Virtual-hosted URLs already carry the bucket in
/// their host, so their path is the object key and stays whole. A path on
/// `host` is kept in front of the object path.
fn rewrite_host(url: &str, host: &str, bucket: &str) -> Result<String> {
    let original = Url::parse(url)
        .map_err(|e| StorageError::Transport(format!("backend returned invalid url {}: {}", url, e)))?;
    let mut rewritten = Url::parse(host)
        .map_err(|e| StorageError::Configuration(format!("invalid host {}: {}", host, e)))?;

    let virtual_hosted = original
        .host_str()
        .map(|h| h == bucket || h.starts_with(&format!("{}.", bucket)))
        .unwrap_or(false);

    let mut path = original.path();
    if !virtual_hosted && !host.contains(bucket) {
        if let Some(rest) = path.strip_prefix('/').and_then(|p| p.strip_prefix(bucket)) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest;
            }
        }
    }

    let base = rewritten.path().trim_end_matches('/').to_string();
    rewritten.set_path(&format!("{}{}", base, path));
    rewritten.set_query(original.query());
    Ok(rewritten.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::drivers::memory::MemoryBackend;
    use crate::storage::StorageConfig;

    fn adapter(config: StorageConfig) -> ObjectStore {
        let backend = Arc::new(MemoryBackend::new("test", "AK"));
        ObjectStore::new(backend, config.with_prefix("cache")).unwrap()
    }

    fn query(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_signed_url() {
        let store = adapter(StorageConfig::new("test"));
        let url = store.url("a.jpg", &UrlOptions::default()).await.unwrap();
        assert!(url.starts_with("https://objects.memory.test/test/cache/a.jpg?"));
        assert_eq!(query(&url, "X-Amz-Expires").as_deref(), Some("900"));
        assert_eq!(query(&url, RESPONSE_CONTENT_DISPOSITION), None);

        let url = store.url("a.jpg", &UrlOptions::default().expires_in(60)).await.unwrap();
        assert_eq!(query(&url, "X-Amz-Expires").as_deref(), Some("60"));
    }

    #[tokio::test]
    async fn test_download_forces_attachment() {
        let store = adapter(StorageConfig::new("test"));
        let url = store.url("a.jpg", &UrlOptions::download()).await.unwrap();
        assert_eq!(query(&url, RESPONSE_CONTENT_DISPOSITION).as_deref(), Some("attachment"));
    }

    #[tokio::test]
    async fn test_download_keeps_caller_disposition() {
        let store = adapter(StorageConfig::new("test"));
        let options = UrlOptions::download()
            .param(RESPONSE_CONTENT_DISPOSITION, "inline; filename=\"résumé v2.pdf\"");
        let url = store.url("a.pdf", &options).await.unwrap();
        assert_eq!(
            query(&url, RESPONSE_CONTENT_DISPOSITION).as_deref(),
            Some("inline; filename=\"r%C3%A9sum%C3%A9 v2.pdf\"")
        );
    }

    #[tokio::test]
    async fn test_params_forwarded() {
        let store = adapter(StorageConfig::new("test"));
        let options = UrlOptions::default().param("response-content-type", "text/csv");
        let url = store.url("a", &options).await.unwrap();
        assert_eq!(query(&url, "response-content-type").as_deref(), Some("text/csv"));
    }

    #[tokio::test]
    async fn test_public_url_is_unsigned() {
        let store = adapter(StorageConfig::new("test").with_public(true));
        let url = store.url("a b.jpg", &UrlOptions::default()).await.unwrap();
        assert_eq!(url, "https://objects.memory.test/test/cache/a%20b.jpg");

        let store = adapter(StorageConfig::new("test"));
        let url = store.url("a.jpg", &UrlOptions::public()).await.unwrap();
        assert_eq!(url, "https://objects.memory.test/test/cache/a.jpg");
    }

    #[tokio::test]
    async fn test_cdn_host_strips_bucket() {
        let store = adapter(StorageConfig::new("test").with_host("https://cdn.example").with_public(true));
        let url = store.url("abc.jpg", &UrlOptions::default()).await.unwrap();
        assert_eq!(url, "https://cdn.example/cache/abc.jpg");
    }

    #[tokio::test]
    async fn test_cdn_host_keeps_signature() {
        let store = adapter(StorageConfig::new("test").with_host("https://cdn.example"));
        let url = store.url("abc.jpg", &UrlOptions::default()).await.unwrap();
        assert!(url.starts_with("https://cdn.example/cache/abc.jpg?"));
        assert_eq!(query(&url, "X-Amz-Credential").as_deref(), Some("AK"));
    }

    #[tokio::test]
    async fn test_host_with_bucket_name_keeps_path() {
        let store = adapter(StorageConfig::new("test").with_host("https://test.cdn.example").with_public(true));
        let url = store.url("abc.jpg", &UrlOptions::default()).await.unwrap();
        assert_eq!(url, "https://test.cdn.example/test/cache/abc.jpg");
    }

    #[tokio::test]
    async fn test_call_host_overrides_config() {
        let store = adapter(StorageConfig::new("test").with_host("https://cdn.example").with_public(true));
        let url = store
            .url("abc.jpg", &UrlOptions::default().host("https://edge.example/assets/"))
            .await
            .unwrap();
        assert_eq!(url, "https://edge.example/assets/cache/abc.jpg");
    }

    #[test]
    fn test_rewrite_only_strips_whole_segment() {
        let url = rewrite_host("https://s3.example/testing/a.jpg", "https://cdn.example", "test").unwrap();
        assert_eq!(url, "https://cdn.example/testing/a.jpg");
    }

    #[test]
    fn test_virtual_hosted_url_keeps_first_segment() {
        let url = rewrite_host(
            "https://uploads.s3.us-east-1.amazonaws.com/uploads/abc.jpg",
            "https://cdn.example",
            "uploads",
        )
        .unwrap();
        assert_eq!(url, "https://cdn.example/uploads/abc.jpg");
    }

    #[tokio::test]
    async fn test_cdn_host_with_virtual_hosted_s3() {
        use crate::drivers::s3::{S3Backend, S3Config};

        let config = S3Config {
            endpoint: "https://s3.us-east-1.amazonaws.com".into(),
            region: "us-east-1".into(),
            access_key_id: "AK".into(),
            secret_access_key: "SK".into(),
            force_path_style: false,
            ..Default::default()
        };
        let backend = Arc::new(S3Backend::new("uploads", config).unwrap());
        let store = ObjectStore::new(
            backend,
            StorageConfig::new("uploads")
                .with_prefix("uploads")
                .with_host("https://cdn.example")
                .with_public(true),
        )
        .unwrap();

        let url = store.url("abc.jpg", &UrlOptions::default()).await.unwrap();
        assert_eq!(url, "https://cdn.example/uploads/abc.jpg");

        let url = store.url("abc.jpg", &UrlOptions::public().host("https://edge.example")).await.unwrap();
        assert_eq!(url, "https://edge.example/uploads/abc.jpg");
    }

    #[test]
    fn test_expiry_bounds() {
        assert_eq!(expiry(None, 900).unwrap(), 900);
        assert_eq!(expiry(Some(60), 900).unwrap(), 60);
        assert!(expiry(Some(0), 900).is_err());
        assert!(expiry(Some(MAX_EXPIRES_IN + 1), 900).is_err());
    }
}
