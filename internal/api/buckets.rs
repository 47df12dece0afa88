use crate::api::errors::ApiError;
use crate::api::{AppState, RequestId};
use crate::meta::models::BucketSummary;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/buckets", get(list_buckets).post(create_bucket))
        .route(
            "/api/buckets/{name}",
            get(get_bucket).put(ensure_bucket).delete(delete_bucket),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateBucketRequest {
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketResponse {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub object_count: i64,
    pub total_size_bytes: i64,
}

impl From<BucketSummary> for BucketResponse {
    fn from(summary: BucketSummary) -> Self {
        Self {
            name: summary.name,
            created_at: summary.created_at,
            object_count: summary.object_count,
            total_size_bytes: summary.total_size_bytes,
        }
    }
}

async fn list_buckets(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<Vec<BucketResponse>>, ApiError> {
    let buckets = state
        .buckets
        .list()
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(Json(buckets.into_iter().map(BucketResponse::from).collect()))
}

async fn create_bucket(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<CreateBucketRequest>,
) -> Result<(StatusCode, Json<BucketResponse>), ApiError> {
    let summary = state
        .buckets
        .create(&payload.name)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok((StatusCode::CREATED, Json(summary.into())))
}

async fn ensure_bucket(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<Json<BucketResponse>, ApiError> {
    let summary = state
        .buckets
        .ensure(&name)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(Json(summary.into()))
}

async fn get_bucket(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<Json<BucketResponse>, ApiError> {
    let summary = state
        .buckets
        .get(&name)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(Json(summary.into()))
}

async fn delete_bucket(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .buckets
        .delete(&name)
        .await
        .map_err(|err| ApiError::new(err, &request_id))?;
    Ok(StatusCode::NO_CONTENT)
}
