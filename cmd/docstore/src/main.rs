use docstore_core::util::config::Config;
use docstore_core::util::usage;
use docstore_core::{api, meta};
use tracing_subscriber::EnvFilter;

const APP_VERSION: &str = match option_env!("DS_APP_VERSION") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if usage::handle_server_cli_flags(APP_VERSION) {
        return Ok(());
    }

    init_tracing();

    let config = Config::load()?;
    let pool = meta::db::connect(&config.postgres_dsn).await?;
    meta::migrate::run_migrations(&pool).await?;

    if is_migrate_only() {
        tracing::info!("migrations completed");
        return Ok(());
    }

    let state = api::AppState::new(config, pool).await?;
    api::serve(state).await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn is_migrate_only() -> bool {
    std::env::args().any(|arg| arg == "--migrate-only")
}
