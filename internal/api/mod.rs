use crate::meta::repos::Repo;
use crate::storage::buckets::BucketManager;
use crate::storage::engine::StorageEngine;
use crate::util::config::Config;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod buckets;
pub mod errors;
pub mod objects;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repo: Repo,
    pub engine: StorageEngine,
    pub buckets: BucketManager,
}

impl AppState {
    pub async fn new(config: Config, pool: PgPool) -> Result<Self, String> {
        let repo = Repo::new(pool);
        let engine = StorageEngine::new(repo.clone(), config.clone());
        let buckets = BucketManager::new(repo.clone());
        let state = Self {
            config,
            repo,
            engine,
            buckets,
        };
        state.seed_default_buckets().await?;
        Ok(state)
    }

    async fn seed_default_buckets(&self) -> Result<(), String> {
        for name in &self.config.default_buckets {
            self.buckets
                .ensure(name)
                .await
                .map_err(|err| format!("seed bucket {name} failed: {err}"))?;
            tracing::info!(bucket = %name, "default bucket ensured");
        }
        Ok(())
    }
}

/// Trace identifier assigned to every request; surfaced in error
/// bodies and the x-request-id response header.
#[derive(Clone)]
pub struct RequestId(pub String);

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(buckets::router(state.clone()))
        .merge(objects::router(state))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured listen address and serve until SIGINT/SIGTERM.
pub async fn serve(state: AppState) -> Result<(), String> {
    let listen = state.config.api_listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|err| format!("bind {listen} failed: {err}"))?;
    tracing::info!(listen = %listen, "storage engine listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(crate::util::shutdown::shutdown_signal())
        .await
        .map_err(|err| format!("server failed: {err}"))
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
