use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const CALL_TIMEOUT: Duration = Duration::from_secs(300);

const KEY_SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Default)]
pub struct UploadResult {
    pub success: bool,
    pub already_exists: bool,
    pub doc_id: Option<String>,
    pub sha256: Option<String>,
    pub detected_content_type: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponseBody {
    doc_id: String,
    sha256: String,
    detected_content_type: String,
}

#[derive(serde::Serialize)]
struct CreateBucketBody<'a> {
    name: &'a str,
}

/// HTTP client the migrator uses against the storage engine. A 409 on
/// upload means an earlier run already moved the record, so it counts
/// as success.
#[derive(Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    base_url: Url,
}

impl UploadClient {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let base_url =
            Url::parse(base_url).map_err(|err| format!("invalid target url: {err}"))?;
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|err| format!("http client build failed: {err}"))?;
        Ok(Self { http, base_url })
    }

    pub async fn ensure_bucket_exists(&self, name: &str) -> Result<bool, String> {
        let url = self.endpoint(&format!("api/buckets/{name}"))?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| format!("bucket lookup failed: {err}"))?;
        if response.status().is_success() {
            return Ok(true);
        }
        if response.status() != StatusCode::NOT_FOUND {
            tracing::warn!(bucket = name, status = %response.status(), "bucket lookup rejected");
            return Ok(false);
        }
        let create_url = self.endpoint("api/buckets")?;
        let response = self
            .http
            .post(create_url)
            .json(&CreateBucketBody { name })
            .send()
            .await
            .map_err(|err| format!("bucket create failed: {err}"))?;
        if response.status().is_success() {
            return Ok(true);
        }
        tracing::warn!(bucket = name, status = %response.status(), "bucket create rejected");
        Ok(false)
    }

    pub async fn upload(
        &self,
        bucket: &str,
        filename: &str,
        bytes: Vec<u8>,
        claimed_content_type: Option<&str>,
        year: i32,
    ) -> UploadResult {
        let url = match self.upload_url(bucket, filename, year) {
            Ok(url) => url,
            Err(err) => return failed(err),
        };
        let mut request = self
            .http
            .put(url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes);
        if let Some(claimed) = claimed_content_type {
            request = request.header(crate::api::objects::CLAIMED_CONTENT_TYPE_HEADER, claimed);
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return failed(format!("upload request failed: {err}")),
        };
        self.interpret_response(response).await
    }

    async fn interpret_response(&self, response: reqwest::Response) -> UploadResult {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return UploadResult {
                success: true,
                already_exists: true,
                ..UploadResult::default()
            };
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return failed(format!("upload rejected with {status}: {body}"));
        }
        match response.json::<UploadResponseBody>().await {
            Ok(body) => UploadResult {
                success: true,
                already_exists: false,
                doc_id: Some(body.doc_id),
                sha256: Some(body.sha256),
                detected_content_type: Some(body.detected_content_type),
                error_message: None,
            },
            Err(err) => failed(format!("upload response unreadable: {err}")),
        }
    }

    fn upload_url(&self, bucket: &str, filename: &str, year: i32) -> Result<Url, String> {
        let key = encode_key(filename);
        let mut url = self.endpoint(&format!("api/buckets/{bucket}/objects/{key}"))?;
        url.query_pairs_mut().append_pair("year", &year.to_string());
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, String> {
        self.base_url
            .join(path)
            .map_err(|err| format!("url join failed: {err}"))
    }
}

fn failed(message: String) -> UploadResult {
    UploadResult {
        success: false,
        error_message: Some(message),
        ..UploadResult::default()
    }
}

fn encode_key(filename: &str) -> String {
    filename
        .split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
