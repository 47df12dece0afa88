use crate::meta::repos::Repo;
use crate::storage::engine::StorageEngine;
use crate::util::config::Config;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use uuid::Uuid;

static MIGRATIONS: OnceCell<()> = OnceCell::const_new();
static DB_MUTEX: OnceLock<Arc<Mutex<()>>> = OnceLock::new();

pub type DbGuard = OwnedMutexGuard<()>;

/// Tests that truncate shared tables serialize on this lock.
pub async fn lock_db() -> DbGuard {
    DB_MUTEX
        .get_or_init(|| Arc::new(Mutex::new(())))
        .clone()
        .lock_owned()
        .await
}

pub async fn setup_pool() -> PgPool {
    let dsn = std::env::var("DS_POSTGRES_DSN")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .expect("DS_POSTGRES_DSN or DATABASE_URL must be set");
    let options = PgConnectOptions::from_str(&dsn)
        .expect("parse postgres dsn")
        .statement_cache_capacity(0);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("connect to postgres");
    MIGRATIONS
        .get_or_init(|| async {
            let migrator = sqlx::migrate::Migrator::new(crate_migrations_dir())
                .await
                .expect("load migrations");
            migrator.run(&pool).await.expect("run migrations");
        })
        .await;
    pool
}

pub fn crate_migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("meta")
        .join("migrations")
}

pub async fn reset_db(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE objects, buckets RESTART IDENTITY CASCADE")
        .execute(pool)
        .await
        .expect("truncate tables");
}

pub async fn reset_migration_log(pool: &PgPool) {
    sqlx::query("DROP SCHEMA IF EXISTS migration CASCADE")
        .execute(pool)
        .await
        .expect("drop migration schema");
}

/// Throwaway blob root removed on drop; also parks the DB lock for
/// tests that pair a filesystem root with truncated tables.
pub struct TempRoot {
    path: PathBuf,
    _guard: Option<DbGuard>,
}

impl TempRoot {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempRoot {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub async fn new_temp_root(prefix: &str) -> TempRoot {
    let path = std::env::temp_dir().join(format!("ds-{prefix}-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&path).await.expect("create dir");
    TempRoot { path, _guard: None }
}

/// Temp root that also holds the DB lock for the test's lifetime.
pub async fn locked_temp_root(prefix: &str) -> TempRoot {
    let guard = lock_db().await;
    let mut root = new_temp_root(prefix).await;
    root._guard = Some(guard);
    root
}

pub fn base_config(root: PathBuf) -> Config {
    Config {
        postgres_dsn: "postgres://unused".to_string(),
        root_path: root,
        max_upload_bytes: 4096,
        upload_buffer_size: 1024,
        first_chunk_size: 1024,
        allowed_extensions: [
            "pdf", "png", "jpg", "gif", "txt", "csv", "json", "zip", "doc", "docx", "xls", "xlsx",
            "ppt", "pptx", "msg", "bin",
        ]
        .iter()
        .map(|ext| ext.to_string())
        .collect(),
        inline_content_types: ["application/pdf", "image/png", "text/plain"]
            .iter()
            .map(|mime| mime.to_string())
            .collect(),
        default_buckets: Vec::new(),
        api_listen: "127.0.0.1:0".to_string(),
        log_level: "info".to_string(),
    }
}

pub async fn build_engine() -> (StorageEngine, TempRoot) {
    let guard = lock_db().await;
    let pool = setup_pool().await;
    reset_db(&pool).await;
    let mut root = new_temp_root("engine").await;
    root._guard = Some(guard);
    let config = base_config(root.path().to_path_buf());
    (StorageEngine::new(Repo::new(pool), config), root)
}

pub async fn no_temp_files(root: &Path) -> bool {
    fn walk(dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return true;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if !walk(&path) {
                    return false;
                }
            } else if path.file_name().is_some_and(|name| name == "blob.tmp") {
                return false;
            }
        }
        true
    }
    walk(root)
}
