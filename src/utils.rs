//! Path and header encoding utility functions / 路径与请求头编码工具函数

/// Resolve the backend object path for an id / 解析对象在存储中的完整路径
///
/// `prefix/id` when a prefix is configured, otherwise the id itself.
/// The id is not validated; the backend decides what a legal key is.
pub fn object_path(prefix: Option<&str>, id: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, id),
        _ => id.to_string(),
    }
}

/// Normalize a configured prefix: trim surrounding `/`, empty means none / 规范化前缀
pub fn normalize_prefix(prefix: Option<&str>) -> Option<String> {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// Build a `<disposition>; filename="<name>"` header value / 构造Content-Disposition
pub fn content_disposition(disposition: &str, filename: &str) -> String {
    format!("{}; filename=\"{}\"", disposition, filename)
}

const FILENAME_MARKER: &str = "filename=\"";

/// Percent-encode only the filename inside a Content-Disposition value / 只编码文件名部分
///
/// Object-storage signatures reject non-ASCII header bytes, so the filename
/// between `filename="` and the next `"` is percent-encoded. Spaces stay
/// literal spaces (some backends never decode `+` in this header).
/// Values without a non-empty `filename="..."` segment are returned unchanged.
pub fn encode_content_disposition(value: &str) -> String {
    let Some(marker) = value.find(FILENAME_MARKER) else {
        return value.to_string();
    };
    let start = marker + FILENAME_MARKER.len();
    let Some(len) = value[start..].find('"') else {
        return value.to_string();
    };
    if len == 0 {
        return value.to_string();
    }
    let end = start + len;

    let encoded = value[start..end]
        .split(' ')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    format!("{}{}{}", &value[..start], encoded, &value[end..])
}

/// Percent-encode an object key for use in a URL path, keeping `/` / 编码对象键
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
