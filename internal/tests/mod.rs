use crate::api::{self, AppState};
use crate::test_support;
use std::net::SocketAddr;

mod api_integration;

pub(crate) struct TestServer {
    pub state: AppState,
    pub base_url: String,
    _root: test_support::TempRoot,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Full engine + router on an ephemeral port, over a clean catalog,
/// migration schema, and blob root. Holds the DB lock until dropped.
pub(crate) async fn spawn_server() -> TestServer {
    let root = test_support::locked_temp_root("server").await;
    let pool = test_support::setup_pool().await;
    test_support::reset_db(&pool).await;
    test_support::reset_migration_log(&pool).await;

    let config = test_support::base_config(root.path().to_path_buf());
    let state = AppState::new(config, pool).await.expect("app state");
    let router = api::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestServer {
        state,
        base_url: format!("http://{addr}"),
        _root: root,
    }
}
