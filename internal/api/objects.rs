use crate::api::errors::ApiError;
use crate::api::{AppState, RequestId};
use crate::meta::models::ObjectRecord;
use crate::storage::engine::{ObjectPage, UploadParams, DEFAULT_PAGE_SIZE};
use crate::storage::errors::EngineError;
use crate::storage::hasher;
use crate::storage::validate;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, RawPathParams, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, on, post, MethodFilter};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

pub const CLAIMED_CONTENT_TYPE_HEADER: &str = "x-claimed-content-type";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/buckets/{bucket}/objects", get(list_objects))
        .route("/api/buckets/{bucket}/objects/form", post(upload_form))
        // get() would claim HEAD as well, so the HEAD handlers are
        // registered through explicit method filters.
        .route(
            "/api/buckets/{bucket}/objects/by-name/{*key}",
            on(MethodFilter::GET, download_by_name)
                .on(MethodFilter::HEAD, head_by_name)
                .on(MethodFilter::DELETE, delete_by_name),
        )
        .route(
            "/api/buckets/{bucket}/objects/{*key}",
            on(MethodFilter::PUT, upload_object)
                .on(MethodFilter::GET, download_by_id)
                .on(MethodFilter::HEAD, head_by_id)
                .on(MethodFilter::DELETE, delete_by_id),
        )
        .route(
            "/api/objects/{doc_id}",
            get(download_any).delete(delete_any),
        )
        // Upload size is policed by DS_MAX_UPLOAD_BYTES, not the transport.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResponse {
    pub doc_id: String,
    pub bucket: String,
    pub filename: String,
    pub year: i32,
    pub size_bytes: i64,
    pub sha256: String,
    pub served_content_type: String,
    pub detected_content_type: String,
    pub claimed_content_type: Option<String>,
    pub detected_extension: Option<String>,
    pub detection_method: String,
    pub is_mismatch: bool,
    pub is_dangerous_mismatch: bool,
    pub created_at: DateTime<Utc>,
    pub download_url: String,
    pub download_by_name_url: String,
}

impl From<&ObjectRecord> for ObjectResponse {
    fn from(record: &ObjectRecord) -> Self {
        Self {
            doc_id: record.doc_id.clone(),
            bucket: record.bucket.clone(),
            filename: record.filename.clone(),
            year: record.year,
            size_bytes: record.size_bytes,
            sha256: hasher::to_hex(&record.sha256),
            served_content_type: record.served_content_type.clone(),
            detected_content_type: record.detected_content_type.clone(),
            claimed_content_type: record.claimed_content_type.clone(),
            detected_extension: record.detected_extension.clone(),
            detection_method: record.detection_method.clone(),
            is_mismatch: record.is_mismatch,
            is_dangerous_mismatch: record.is_dangerous_mismatch,
            created_at: record.created_at,
            download_url: format!("/api/buckets/{}/objects/{}", record.bucket, record.doc_id),
            download_by_name_url: format!(
                "/api/buckets/{}/objects/by-name/{}",
                record.bucket,
                encode_key_path(&record.filename)
            ),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectListResponse {
    pub items: Vec<ObjectResponse>,
    pub page: i64,
    pub page_size: i64,
    pub total_count: i64,
}

impl From<ObjectPage> for ObjectListResponse {
    fn from(page: ObjectPage) -> Self {
        Self {
            items: page.items.iter().map(ObjectResponse::from).collect(),
            page: page.page,
            page_size: page.page_size,
            total_count: page.total_count,
        }
    }
}

#[derive(Deserialize)]
struct UploadQuery {
    year: Option<i32>,
}

#[derive(Deserialize)]
struct ListQuery {
    page: Option<i64>,
    #[serde(rename = "pageSize")]
    page_size: Option<i64>,
    prefix: Option<String>,
}

// The key-bearing routes read their segments raw: normalization owns
// the single percent-decode, axum must not add another.
fn raw_bucket_and_key(params: &RawPathParams) -> Result<(String, String), EngineError> {
    let mut bucket = None;
    let mut key = None;
    for (name, value) in params.iter() {
        match name {
            "bucket" => bucket = Some(value.to_string()),
            "key" => key = Some(value.to_string()),
            _ => {}
        }
    }
    match (bucket, key) {
        (Some(bucket), Some(key)) => Ok((bucket, key)),
        _ => Err(EngineError::InvalidFilename(
            "object key is missing from the request path".into(),
        )),
    }
}

async fn upload_object(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    params: RawPathParams,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<ObjectResponse>), ApiError> {
    let (bucket, key) =
        raw_bucket_and_key(&params).map_err(|err| ApiError::new(err, &request_id))?;
    let filename = validate::normalize_object_key(&key)
        .map_err(|msg| ApiError::new(EngineError::InvalidFilename(msg), &request_id))?;
    let claimed_content_type = headers
        .get(CLAIMED_CONTENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let params = UploadParams {
        bucket,
        filename,
        claimed_content_type,
        year: query.year,
    };
    let record = state
        .engine
        .upload(params, body.into_data_stream())
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok((StatusCode::CREATED, Json(ObjectResponse::from(&record))))
}

async fn upload_form(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(bucket): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ObjectResponse>), ApiError> {
    loop {
        let field = multipart.next_field().await.map_err(|err| {
            ApiError::new(
                EngineError::InvalidContentType(format!("malformed multipart body: {err}")),
                &request_id,
            )
        })?;
        let Some(field) = field else {
            return Err(ApiError::new(
                EngineError::InvalidContentType("multipart body carries no file part".into()),
                &request_id,
            ));
        };
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let claimed_content_type = field.content_type().map(str::to_string);
        let params = UploadParams {
            bucket,
            filename,
            claimed_content_type,
            year: query.year,
        };
        let stream = futures_util::stream::try_unfold(field, |mut field| async move {
            match field.chunk().await {
                Ok(Some(bytes)) => Ok(Some((bytes, field))),
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            }
        });
        let record = state
            .engine
            .upload(params, Box::pin(stream))
            .await
            .map_err(|err| ApiError::new(err, &request_id))?;
        return Ok((StatusCode::CREATED, Json(ObjectResponse::from(&record))));
    }
}

async fn list_objects(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(bucket): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ObjectListResponse>, ApiError> {
    let page = state
        .engine
        .list_objects(
            &bucket,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            query.prefix.as_deref(),
        )
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(Json(page.into()))
}

async fn download_by_id(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((bucket, doc_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (record, file) = state
        .engine
        .download_by_id(&bucket, &doc_id)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    blob_response(&state, &record, Some(file))
        .map_err(|err| ApiError::new(err, &request_id))
}

async fn download_by_name(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    params: RawPathParams,
) -> Result<Response, ApiError> {
    let (bucket, key) =
        raw_bucket_and_key(&params).map_err(|err| ApiError::new(err, &request_id))?;
    let filename = validate::normalize_object_key(&key)
        .map_err(|msg| ApiError::new(EngineError::InvalidFilename(msg), &request_id))?;
    let (record, file) = state
        .engine
        .download_by_name(&bucket, &filename)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    blob_response(&state, &record, Some(file))
        .map_err(|err| ApiError::new(err, &request_id))
}

async fn download_any(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(doc_id): Path<String>,
) -> Result<Response, ApiError> {
    let (record, file) = state
        .engine
        .download_any(&doc_id)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    blob_response(&state, &record, Some(file))
        .map_err(|err| ApiError::new(err, &request_id))
}

async fn head_by_id(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((bucket, doc_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let record = state
        .engine
        .head_by_id(&bucket, &doc_id)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    blob_response(&state, &record, None).map_err(|err| ApiError::new(err, &request_id))
}

async fn head_by_name(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    params: RawPathParams,
) -> Result<Response, ApiError> {
    let (bucket, key) =
        raw_bucket_and_key(&params).map_err(|err| ApiError::new(err, &request_id))?;
    let filename = validate::normalize_object_key(&key)
        .map_err(|msg| ApiError::new(EngineError::InvalidFilename(msg), &request_id))?;
    let record = state
        .engine
        .head_by_name(&bucket, &filename)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    blob_response(&state, &record, None).map_err(|err| ApiError::new(err, &request_id))
}

async fn delete_by_id(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((bucket, doc_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .delete_by_id(&bucket, &doc_id)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_by_name(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    params: RawPathParams,
) -> Result<StatusCode, ApiError> {
    let (bucket, key) =
        raw_bucket_and_key(&params).map_err(|err| ApiError::new(err, &request_id))?;
    let filename = validate::normalize_object_key(&key)
        .map_err(|msg| ApiError::new(EngineError::InvalidFilename(msg), &request_id))?;
    state
        .engine
        .delete_by_name(&bucket, &filename)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_any(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(doc_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .delete_any(&doc_id)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

fn blob_response(
    state: &AppState,
    record: &ObjectRecord,
    file: Option<tokio::fs::File>,
) -> Result<Response, EngineError> {
    let body = match file {
        Some(file) => Body::from_stream(ReaderStream::with_capacity(
            file,
            state.config.upload_buffer_size,
        )),
        None => Body::empty(),
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.served_content_type.clone())
        .header(header::CONTENT_LENGTH, record.size_bytes)
        .header(header::ETAG, format!("\"{}\"", hasher::to_hex(&record.sha256)))
        .header(
            header::CONTENT_DISPOSITION,
            disposition_header(state, record)?,
        )
        .body(body)
        .map_err(|err| EngineError::Storage(format!("response build failed: {err}")))
}

fn disposition_header(state: &AppState, record: &ObjectRecord) -> Result<HeaderValue, EngineError> {
    let value = content_disposition(
        &record.filename,
        &record.served_content_type,
        record.is_dangerous_mismatch,
        |content_type| state.config.content_type_inline(content_type),
    );
    HeaderValue::from_str(&value)
        .map_err(|err| EngineError::Storage(format!("disposition header failed: {err}")))
}

// RFC 5987 attr-char: ALPHA / DIGIT / "!#$&+-.^_`|~"
const RFC5987_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

// Path segments keep unreserved characters readable in download URLs.
const PATH_SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn content_disposition<F>(
    filename: &str,
    served_content_type: &str,
    is_dangerous_mismatch: bool,
    inline_allowed: F,
) -> String
where
    F: Fn(&str) -> bool,
{
    let kind = if is_dangerous_mismatch {
        "attachment"
    } else if inline_allowed(served_content_type) {
        "inline"
    } else {
        "attachment"
    };
    let fallback = ascii_fallback(filename);
    let encoded = utf8_percent_encode(filename, RFC5987_SET);
    format!("{kind}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

fn ascii_fallback(filename: &str) -> String {
    filename
        .chars()
        .map(|ch| {
            if ch.is_ascii_graphic() && ch != '"' && ch != '\\' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Percent-encode each segment of an object key, keeping `/` separators.
pub fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
