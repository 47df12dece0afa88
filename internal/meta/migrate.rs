use sqlx::migrate::{MigrateError, Migrator};
use sqlx::PgPool;
use std::path::PathBuf;

pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    let migrator = load_migrator().await?;
    migrator.run(pool).await
}

fn migration_directory_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(raw) = std::env::var("DS_MIGRATIONS_DIR") {
        if !raw.trim().is_empty() {
            paths.push(PathBuf::from(raw));
        }
    }
    paths.push(PathBuf::from("/app/migrations"));
    paths.push(PathBuf::from("internal/meta/migrations"));
    paths.push(PathBuf::from("meta/migrations"));
    paths
}

pub(crate) async fn load_migrator() -> Result<Migrator, MigrateError> {
    for path in migration_directory_candidates() {
        if path.is_dir() {
            return Migrator::new(path).await;
        }
    }
    let error = std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "migration directory not found",
    );
    Err(MigrateError::Source(Box::new(error)))
}
