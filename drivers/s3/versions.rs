//! S3对象版本列举 / ListObjectVersions
//!
//! 对桶根路径发起预签名 `GET ?versions` 请求，逐页解析XML。
//! 返回的条目同时包含历史版本与删除标记。

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use s3::bucket::Bucket;

use crate::error::{Result, StorageError};
use crate::storage::ObjectVersion;
use super::driver::s3_error;

/// 列举请求签名有效期（秒）
const LIST_EXPIRES: u32 = 300;

/// 一页列举结果
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct VersionPage {
    pub versions: Vec<ObjectVersion>,
    /// 下一页起点 (key-marker, version-id-marker)
    pub next: Option<(String, Option<String>)>,
}

/// 列出前缀下全部对象版本
pub(super) async fn list_all(http: &reqwest::Client, bucket: &Bucket, prefix: &str) -> Result<Vec<ObjectVersion>> {
    let mut versions = Vec::new();
    let mut marker: Option<(String, Option<String>)> = None;

    loop {
        let mut query = HashMap::new();
        query.insert("versions".to_string(), String::new());
        if !prefix.is_empty() {
            query.insert("prefix".to_string(), prefix.to_string());
        }
        if let Some((key, version_id)) = &marker {
            query.insert("key-marker".to_string(), key.clone());
            if let Some(version_id) = version_id {
                query.insert("version-id-marker".to_string(), version_id.clone());
            }
        }

        let url = bucket
            .presign_get("/", LIST_EXPIRES, Some(query))
            .await
            .map_err(s3_error("生成版本列举链接失败"))?;
        let response = http.get(&url).send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(StorageError::from_status(status, format!("list versions {}", prefix)));
        }
        let page = parse_page(&response.text().await?)?;
        tracing::debug!("S3版本列举: prefix={}, count={}", prefix, page.versions.len());
        versions.extend(page.versions);

        match page.next {
            Some(next) if marker.as_ref() == Some(&next) => {
                return Err(StorageError::Transport(format!("版本列举分页标记未推进: {}", next.0)));
            }
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    Ok(versions)
}

/// 解析 ListVersionsResult
pub(super) fn parse_page(xml: &str) -> Result<VersionPage> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut page = VersionPage::default();
    let mut truncated = false;
    let mut next_key: Option<String> = None;
    let mut next_version: Option<String> = None;

    let mut in_entry = false;
    let mut element = String::new();
    let mut key = String::new();
    let mut version_id: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Version" || name == "DeleteMarker" {
                    in_entry = true;
                    key.clear();
                    version_id = None;
                }
                element = name;
            }
            Ok(Event::End(ref e)) => {
                if matches!(e.local_name().as_ref(), b"Version" | b"DeleteMarker") {
                    page.versions.push(ObjectVersion {
                        key: std::mem::take(&mut key),
                        version_id: version_id.take(),
                    });
                    in_entry = false;
                }
                element.clear();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                match (in_entry, element.as_str()) {
                    (true, "Key") => key = text,
                    (true, "VersionId") => version_id = Some(text),
                    (false, "IsTruncated") => truncated = text == "true",
                    (false, "NextKeyMarker") => next_key = Some(text),
                    (false, "NextVersionIdMarker") => next_version = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    if truncated {
        let key = next_key
            .ok_or_else(|| StorageError::Transport("版本列举被截断但缺少NextKeyMarker".into()))?;
        page.next = Some((key, next_version));
    }
    Ok(page)
}

fn xml_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transport(format!("解析S3版本列表失败: {}", e))
}
