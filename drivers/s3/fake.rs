//! 驱动测试用的本地S3服务 / in-process S3 endpoint for driver tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;

use super::{S3Backend, S3Config};

/// 一次收到的请求
#[derive(Debug, Clone)]
pub(super) struct Recorded {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub copy_source: Option<String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn has(&self, param: &str) -> bool {
        self.params.iter().any(|(k, _)| k == param)
    }

    pub fn param(&self, param: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == param).map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct Inner {
    requests: Vec<Recorded>,
    fail_part: Option<u32>,
    denied_keys: Vec<String>,
    version_pages: VecDeque<String>,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Clone, Default)]
pub(super) struct FakeS3 {
    inner: Arc<Mutex<Inner>>,
}

impl FakeS3 {
    /// 启动服务，返回连接它的后端（桶名 `test`，路径风格）
    pub async fn start() -> (Self, S3Backend) {
        let fake = FakeS3::default();
        let app = Router::new().fallback(handle).with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = S3Config {
            endpoint: format!("http://{}", addr),
            access_key_id: "AK".into(),
            secret_access_key: "SK".into(),
            force_path_style: true,
            ..Default::default()
        };
        (fake, S3Backend::new("test", config).unwrap())
    }

    /// 该分片号返回HTTP 500
    pub fn fail_part(&self, part_number: u32) {
        self.inner.lock().fail_part = Some(part_number);
    }

    /// DeleteObjects 对这些键报告 AccessDenied
    pub fn deny_delete(&self, key: &str) {
        self.inner.lock().denied_keys.push(key.to_string());
    }

    /// 依次返回的 `?versions` 响应；用完后返回空列表
    pub fn push_version_page(&self, xml: &str) {
        self.inner.lock().version_pages.push_back(xml.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().requests.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().max_in_flight
    }
}

async fn handle(State(fake): State<FakeS3>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let params: Vec<(String, String)> = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let request = Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        params,
        copy_source: headers
            .get("x-amz-copy-source")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    };
    fake.inner.lock().requests.push(request.clone());

    if method == Method::POST && request.has("uploads") {
        let xml = format!(
            "<InitiateMultipartUploadResult><Bucket>test</Bucket><Key>{}</Key><UploadId>upload-1</UploadId></InitiateMultipartUploadResult>",
            request.path
        );
        return (StatusCode::OK, xml).into_response();
    }

    if method == Method::PUT && request.has("partNumber") {
        let part_number: u32 = request.param("partNumber").unwrap_or("0").parse().unwrap_or(0);
        {
            let mut inner = fake.inner.lock();
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fail = {
            let mut inner = fake.inner.lock();
            inner.in_flight -= 1;
            inner.fail_part == Some(part_number)
        };
        if fail {
            return (StatusCode::INTERNAL_SERVER_ERROR, "<Error><Code>InternalError</Code></Error>").into_response();
        }
        return (StatusCode::OK, [("ETag", format!("\"etag-{}\"", part_number))], "").into_response();
    }

    if method == Method::POST && request.has("uploadId") {
        let xml = "<CompleteMultipartUploadResult><Bucket>test</Bucket><ETag>\"done\"</ETag></CompleteMultipartUploadResult>";
        return (StatusCode::OK, xml).into_response();
    }

    if method == Method::DELETE && request.has("uploadId") {
        return StatusCode::NO_CONTENT.into_response();
    }

    if method == Method::POST && request.has("delete") {
        let text = request.text();
        let denied = fake.inner.lock().denied_keys.clone();
        let errors: String = denied
            .iter()
            .filter(|key| text.contains(&format!("<Key>{}</Key>", key)))
            .map(|key| format!("<Error><Key>{}</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>", key))
            .collect();
        return (StatusCode::OK, format!("<DeleteResult>{}</DeleteResult>", errors)).into_response();
    }

    if method == Method::GET && request.has("versions") {
        let page = fake.inner.lock().version_pages.pop_front();
        let xml = page.unwrap_or_else(|| "<ListVersionsResult><IsTruncated>false</IsTruncated></ListVersionsResult>".into());
        return (StatusCode::OK, xml).into_response();
    }

    if method == Method::PUT {
        let xml = "<CopyObjectResult><ETag>\"copied\"</ETag></CopyObjectResult>";
        return (StatusCode::OK, xml).into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}
